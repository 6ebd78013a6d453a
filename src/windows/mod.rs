//! Statistical building blocks for the adaptive limit controller: a
//! short-RTT quantile digest, a smoothed long-RTT baseline, a rolling
//! mean/variance/slope window, and a guarded correlation window.
//!
//! Each piece is deliberately dumb on its own; the controller in
//! [`crate::controller`] composes them into the gradient/queue-size decision.

mod correlation;
mod digest;
mod ewma;
mod rolling;

pub use correlation::CorrelationWindow;
pub use digest::{ShortRttWindow, TDigest};
pub use ewma::LongRttEwma;
pub use rolling::RollingWindow;

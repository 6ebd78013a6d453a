//! Adaptive concurrency limiter for the compio async runtime.
//!
//! A self-tuning semaphore: instead of a fixed capacity, [`AdaptiveLimiter`]
//! continuously retunes its own limit from completed-operation latency,
//! using a Vegas-style gradient between a long-term RTT baseline and a
//! short-term quantile. Three overflow layers ([`QueueingLimiter`],
//! [`LatencyLimiter`], [`PriorityLimiter`]) wrap the base limiter with
//! different answers to "what happens when it's full".
//!
//! # Example
//!
//! ```rust,no_run
//! use adaptive_limiter::{AdaptiveLimiter, CancellationToken};
//! use std::time::Duration;
//!
//! #[compio::main]
//! async fn main() {
//!     let limiter = AdaptiveLimiter::builder().limits(1.0, 200.0, 20.0).build();
//!     let cancellation = CancellationToken::none();
//!
//!     let permit = limiter.acquire(&cancellation).await.unwrap();
//!     // ... do work ...
//!     permit.record(Duration::from_millis(12));
//! }
//! ```

mod builder;
mod cancellation;
mod condvar;
mod controller;
mod error;
mod overflow;
mod prioritizer;
pub mod semaphore;
mod waiter_queue;
mod windows;

pub use builder::Builder;
pub use cancellation::CancellationToken;
pub use condvar::Condvar;
pub use controller::{
    default_alpha, default_beta, default_decrease, default_increase, AdaptiveLimiter, ControllerConfig,
    LimitChangedListener, OverloadSignal, Permit, TuningFn,
};
pub use error::{Error, Result};
pub use overflow::{LatencyLimiter, PriorityBand, PriorityLimiter, QueueingLimiter};
pub use prioritizer::{LimiterStats, Prioritizer, StatsSupplier, ThresholdChangedListener, UsageTracker};

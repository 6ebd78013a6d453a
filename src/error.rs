//! Crate-wide error type.
//!
//! The core never fails in more than two ways on the admission path: the
//! caller was rejected because some limit would be exceeded, or the caller's
//! own cancellation token fired first. Everything else (programming errors
//! like a double release) is a `debug_assert!`, not a recoverable `Error`.

use thiserror::Error;

/// Result alias used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a limiter's admission path.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The limit (or queue, or latency bound, or priority threshold) would be
    /// exceeded by admitting this caller.
    #[error("concurrency limit exceeded")]
    Exceeded,

    /// The caller's cancellation token fired before a permit was admitted.
    #[error("acquire canceled before a permit was admitted")]
    Canceled,
}

//! Cooperative cancellation for blocking `acquire` calls.
//!
//! The spec treats "the caller's cancellation token" as an external
//! capability without mandating a concrete type. `CancellationToken` fills
//! that seam: it is the same atomic-flag-plus-`WaiterQueue` shape as
//! [`crate::Condvar`], specialized to a one-shot, sticky "cancelled" flag
//! instead of a reusable notification.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::waiter_queue::WaiterQueue;

struct Inner {
    cancelled: AtomicBool,
    waiters: WaiterQueue,
}

/// A cheaply-cloneable, one-shot cancellation signal.
///
/// Cloning shares the same underlying flag: cancelling any clone cancels all
/// of them. There is no way to "uncancel" a token, matching the usual
/// cancellation-token contract in async ecosystems.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Create a new, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                waiters: WaiterQueue::new(),
            }),
        }
    }

    /// A token that can never be cancelled and never blocks `acquire`.
    ///
    /// Useful as a default for callers who don't need cancellation.
    #[must_use]
    pub fn none() -> Self {
        Self::new()
    }

    /// Trip the cancellation flag and wake every task parked in
    /// [`CancellationToken::cancelled`].
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.waiters.wake_all();
    }

    /// Whether this token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Suspend until this token is cancelled. Returns immediately if it
    /// already has been.
    pub async fn cancelled(&self) {
        self.inner
            .waiters
            .add_waiter_if(|| self.inner.cancelled.load(Ordering::Acquire))
            .await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

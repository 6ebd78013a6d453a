//! Dynamic permit semaphore.
//!
//! A bounded counting semaphore whose capacity can be changed at runtime
//! without losing in-flight accounting, built on the same [`WaiterQueue`]
//! abstraction the teacher crate uses for its fixed-capacity semaphore and
//! condition variable. Unlike that fixed-capacity semaphore, this one also
//! tracks how long the oldest waiter has been blocked, since the adaptive
//! controller's overload detection depends on that duration.
//!
//! # Example
//!
//! ```rust,no_run
//! use adaptive_limiter::semaphore::DynamicSemaphore;
//! use adaptive_limiter::CancellationToken;
//!
//! # async fn example() -> Result<(), adaptive_limiter::Error> {
//! let sem = DynamicSemaphore::new(4);
//! let cancellation = CancellationToken::new();
//!
//! let guard = sem.acquire(&cancellation).await?;
//! // Do work while holding the permit...
//! drop(guard);
//!
//! sem.set_capacity(8);
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use futures_util::future::{select, Either};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::waiter_queue::WaiterQueue;
use crate::CancellationToken;

/// A resizable counting semaphore with a FIFO waiter queue and blocked-since
/// tracking.
///
/// # Design
///
/// - **Lock-free fast path**: atomics for the capacity/inflight counters.
/// - **FIFO waiters**: only the head waiter is retried on each `release`, so
///   admission order matches arrival order.
/// - **Live resize**: [`DynamicSemaphore::set_capacity`] changes capacity
///   without revoking in-flight permits; `inflight` may transiently exceed
///   `capacity` after a shrink.
pub struct DynamicSemaphore {
    capacity: AtomicUsize,
    inflight: AtomicUsize,
    waiters: WaiterQueue,
    blocked_since: Mutex<Option<Instant>>,
}

impl DynamicSemaphore {
    /// Create a semaphore with the given initial capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "semaphore capacity must be at least 1");
        Self {
            capacity: AtomicUsize::new(capacity),
            inflight: AtomicUsize::new(0),
            waiters: WaiterQueue::new(),
            blocked_since: Mutex::new(None),
        }
    }

    /// Current capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Number of permits currently held.
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    /// `true` iff `inflight >= capacity`.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.inflight() >= self.capacity()
    }

    /// Number of callers currently parked waiting for a permit.
    #[must_use]
    pub fn blocked_count(&self) -> usize {
        self.waiters.waiter_count()
    }

    /// When the oldest currently-waiting caller started waiting, or `None`
    /// if nobody is waiting.
    #[must_use]
    pub fn blocked_since(&self) -> Option<Instant> {
        *self.blocked_since.lock()
    }

    /// How long the oldest waiter has been blocked, or `None` if nobody is
    /// waiting.
    #[must_use]
    pub fn blocked_duration(&self) -> Option<std::time::Duration> {
        self.blocked_since().map(|since| since.elapsed())
    }

    #[inline]
    fn has_capacity(&self) -> bool {
        self.inflight.load(Ordering::Acquire) < self.capacity.load(Ordering::Acquire)
    }

    /// Atomically increment `inflight` iff a slot is available, ignoring the
    /// waiter queue. Only safe to call when the caller knows it is entitled
    /// to the next slot (either it observed an empty queue, or it was
    /// explicitly woken as the head waiter).
    fn try_admit_raw(&self) -> bool {
        let mut current = self.inflight.load(Ordering::Acquire);
        loop {
            let capacity = self.capacity.load(Ordering::Acquire);
            if current >= capacity {
                return false;
            }
            match self.inflight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn mark_blocked_start(&self) {
        let mut guard = self.blocked_since.lock();
        if guard.is_none() {
            *guard = Some(Instant::now());
        }
    }

    fn clear_blocked_if_empty(&self) {
        if self.waiters.waiter_count() == 0 {
            *self.blocked_since.lock() = None;
        }
    }

    /// Try to acquire a permit without waiting.
    ///
    /// Returns `None` if there is no available capacity, *or* if there is
    /// already at least one waiter parked — a `try_acquire` must never cut
    /// ahead of a FIFO waiter when capacity exists.
    #[must_use]
    pub fn try_acquire(&self) -> Option<SemaphoreGuard<'_>> {
        if self.waiters.waiter_count() > 0 {
            return None;
        }
        if self.try_admit_raw() {
            Some(SemaphoreGuard { semaphore: self })
        } else {
            None
        }
    }

    /// Acquire a permit, suspending until one is available or `cancellation`
    /// fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Canceled`] if `cancellation` is tripped before a
    /// permit is admitted.
    pub async fn acquire(&self, cancellation: &CancellationToken) -> Result<SemaphoreGuard<'_>> {
        if cancellation.is_cancelled() {
            return Err(Error::Canceled);
        }

        // Fast path: no contention at all.
        if self.waiters.waiter_count() == 0 && self.try_admit_raw() {
            return Ok(SemaphoreGuard { semaphore: self });
        }

        loop {
            self.mark_blocked_start();

            let admit_ready = self.waiters.add_waiter_if(|| self.has_capacity());
            let cancelled = cancellation.cancelled();
            futures_util::pin_mut!(admit_ready);
            futures_util::pin_mut!(cancelled);

            match select(admit_ready, cancelled).await {
                Either::Left(_) => {
                    if self.try_admit_raw() {
                        self.clear_blocked_if_empty();
                        tracing::trace!(inflight = self.inflight(), "semaphore permit acquired");
                        return Ok(SemaphoreGuard { semaphore: self });
                    }
                    // Spurious wake (e.g. capacity observed transiently):
                    // go around again as the still-head waiter.
                }
                Either::Right(_) => {
                    self.clear_blocked_if_empty();
                    return Err(Error::Canceled);
                }
            }
        }
    }

    /// Release a permit and wake the head waiter, if any.
    fn release(&self) {
        let prev = self.inflight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "released a permit that was never acquired");
        tracing::trace!(inflight = self.inflight(), "semaphore permit released");
        self.waiters.wake_one();
        self.clear_blocked_if_empty();
    }

    /// Change the capacity, clamped to `>= 1`.
    ///
    /// Growing wakes up to `new - old` head waiters. Shrinking does not
    /// revoke in-flight permits; `release` will simply stop waking waiters
    /// until `inflight` has drained below the new capacity.
    pub fn set_capacity(&self, new: usize) {
        let new = new.max(1);
        let old = self.capacity.swap(new, Ordering::AcqRel);
        tracing::debug!(old, new, "semaphore capacity changed");
        if new > old {
            self.waiters.wake_n(new - old);
        }
    }
}

/// RAII guard released back to a [`DynamicSemaphore`] on drop.
pub struct SemaphoreGuard<'a> {
    semaphore: &'a DynamicSemaphore,
}

impl<'a> Drop for SemaphoreGuard<'a> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

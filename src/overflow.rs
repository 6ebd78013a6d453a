//! Overflow policies stacked on top of an [`AdaptiveLimiter`].
//!
//! Each layer wraps the inner limiter with a different answer to "what do I
//! do when the semaphore is full": absorb the burst in a sized virtual
//! queue, bound how long a caller is willing to wait, or defer to a
//! cross-limiter priority threshold. They compose by choice (pick one), not
//! by stacking several.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::info;

use crate::cancellation::CancellationToken;
use crate::controller::{AdaptiveLimiter, Permit};
use crate::error::{Error, Result};
use crate::prioritizer::{LimiterStats, Prioritizer};

/// Shared admission-probability calculation used by the queueing layer, the
/// latency-bounded layer, and the prioritizer's cross-limiter rate.
///
/// Guards the degenerate case where `max <= threshold` (no room between the
/// threshold and the ceiling) by treating it as a hard cutoff rather than
/// dividing by zero.
pub(crate) fn rejection_rate(value: f64, threshold: f64, max: f64) -> f64 {
    if max <= threshold {
        return if value >= max { 1.0 } else { 0.0 };
    }
    ((value - threshold) / (max - threshold)).clamp(0.0, 1.0)
}

fn probabilistic_admit(rate: f64) -> bool {
    if rate >= 1.0 {
        return false;
    }
    let u: f64 = rand::thread_rng().gen();
    rate < u
}

/// Absorbs bursts by allowing blocked acquirers into a sized virtual queue
/// beyond the semaphore's own capacity.
pub struct QueueingLimiter {
    inner: AdaptiveLimiter,
    initial_rejection_factor: f64,
    max_rejection_factor: f64,
}

impl QueueingLimiter {
    pub fn new(inner: AdaptiveLimiter, initial_rejection_factor: f64, max_rejection_factor: f64) -> Self {
        Self {
            inner,
            initial_rejection_factor,
            max_rejection_factor,
        }
    }

    pub fn inner(&self) -> &AdaptiveLimiter {
        &self.inner
    }

    fn rejection_threshold(&self) -> f64 {
        (self.inner.limit_f64() * self.initial_rejection_factor).floor()
    }

    fn max_queue(&self) -> f64 {
        (self.inner.limit_f64() * self.max_rejection_factor).floor()
    }

    /// Current rejection rate for the virtual queue, in `[0, 1]`.
    pub fn rejection_rate(&self) -> f64 {
        rejection_rate(self.inner.blocked() as f64, self.rejection_threshold(), self.max_queue())
    }

    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        self.inner.try_acquire()
    }

    /// Admit immediately if the semaphore has room; otherwise admit, reject
    /// probabilistically, or reject outright based on how full the virtual
    /// queue is, per [`rejection_rate`].
    pub async fn acquire(&self, cancellation: &CancellationToken) -> Result<Permit<'_>> {
        if let Some(permit) = self.inner.try_acquire() {
            return Ok(permit);
        }

        let rate = self.rejection_rate();
        if !probabilistic_admit(rate) {
            info!(rate = rate, blocked = self.inner.blocked(), "queueing layer rejected caller");
            return Err(Error::Exceeded);
        }

        self.inner.acquire(cancellation).await
    }

    pub(crate) fn stats(&self) -> LimiterStats {
        LimiterStats {
            limit: self.inner.limit_f64(),
            blocked: self.inner.blocked() as f64,
            rejection_threshold: self.rejection_threshold(),
            max_queue: self.max_queue(),
        }
    }
}

/// Rejects callers whose *estimated* total RTT (queueing plus execution)
/// would exceed a hard ceiling, rather than bounding queue depth directly.
pub struct LatencyLimiter {
    inner: AdaptiveLimiter,
    rejection_threshold: Duration,
    max_execution_time: Duration,
}

impl LatencyLimiter {
    pub fn new(inner: AdaptiveLimiter, rejection_threshold: Duration, max_execution_time: Duration) -> Self {
        Self {
            inner,
            rejection_threshold,
            max_execution_time,
        }
    }

    pub fn inner(&self) -> &AdaptiveLimiter {
        &self.inner
    }

    /// Estimated wait-plus-execution time for a new caller arriving right
    /// now: how many full batches of `limit` operations must drain before
    /// this request's turn comes up, at the controller's own tracked
    /// long-RTT baseline.
    fn estimated_rtt(&self) -> Duration {
        let limit = self.inner.limit().max(1) as f64;
        let blocked = self.inner.blocked() as f64;
        let batches = ((blocked + 1.0) / limit).ceil();
        let long_rtt_ms = self.inner.long_rtt();
        Duration::from_secs_f64((batches * long_rtt_ms / 1000.0).max(0.0))
    }

    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        self.inner.try_acquire()
    }

    pub async fn acquire(&self, cancellation: &CancellationToken) -> Result<Permit<'_>> {
        if let Some(permit) = self.inner.try_acquire() {
            return Ok(permit);
        }

        let estimate = self.estimated_rtt();
        if estimate > self.max_execution_time {
            info!(estimate_ms = estimate.as_secs_f64() * 1000.0, "latency layer rejected caller outright");
            return Err(Error::Exceeded);
        }

        let rate = rejection_rate(
            estimate.as_secs_f64() * 1000.0,
            self.rejection_threshold.as_secs_f64() * 1000.0,
            self.max_execution_time.as_secs_f64() * 1000.0,
        );
        if !probabilistic_admit(rate) {
            info!(rate = rate, "latency layer rejected caller probabilistically");
            return Err(Error::Exceeded);
        }

        self.inner.acquire(cancellation).await
    }
}

/// One of five contiguous 100-level priority ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityBand {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl PriorityBand {
    pub fn range(self) -> (u32, u32) {
        match self {
            PriorityBand::VeryLow => (0, 99),
            PriorityBand::Low => (100, 199),
            PriorityBand::Medium => (200, 299),
            PriorityBand::High => (300, 399),
            PriorityBand::VeryHigh => (400, 499),
        }
    }
}

/// Rejects operations whose priority level falls below a threshold shared
/// across every limiter registered with the same [`Prioritizer`]; otherwise
/// queues exactly like [`QueueingLimiter`].
pub struct PriorityLimiter {
    queueing: Arc<QueueingLimiter>,
    prioritizer: Arc<Prioritizer>,
    handle: u64,
}

impl PriorityLimiter {
    pub fn new(
        inner: AdaptiveLimiter,
        initial_rejection_factor: f64,
        max_rejection_factor: f64,
        prioritizer: Arc<Prioritizer>,
    ) -> Self {
        let queueing = Arc::new(QueueingLimiter::new(inner, initial_rejection_factor, max_rejection_factor));
        let supplier = Arc::clone(&queueing);
        let handle = prioritizer.register(Arc::new(move || supplier.stats()));
        Self {
            queueing,
            prioritizer,
            handle,
        }
    }

    pub fn inner(&self) -> &AdaptiveLimiter {
        self.queueing.inner()
    }

    /// Resolve a numeric level for this acquire: an explicit level wins;
    /// otherwise the prioritizer's usage tracker derives one from
    /// `(band, user)`; otherwise a uniform-random level within `band`.
    fn resolve_level(&self, band: PriorityBand, user: Option<&str>, explicit_level: Option<u32>) -> u32 {
        if let Some(level) = explicit_level {
            return level;
        }
        if let (Some(tracker), Some(user)) = (self.prioritizer.usage_tracker(), user) {
            return tracker.level_for(band, user);
        }
        let (lo, hi) = band.range();
        rand::thread_rng().gen_range(lo..=hi)
    }

    pub async fn acquire(
        &self,
        cancellation: &CancellationToken,
        band: PriorityBand,
        user: Option<&str>,
        explicit_level: Option<u32>,
    ) -> Result<Permit<'_>> {
        let level = self.resolve_level(band, user, explicit_level);
        let threshold = self.prioritizer.rejection_threshold();

        if level < threshold {
            info!(level = level, threshold = threshold, "priority layer rejected caller");
            return Err(Error::Exceeded);
        }

        let permit = self.queueing.acquire(cancellation).await?;
        self.prioritizer.record_level(level);
        Ok(permit)
    }
}

impl Drop for PriorityLimiter {
    fn drop(&mut self) {
        self.prioritizer.unregister(self.handle);
    }
}

//! The adaptive limit controller: turns completed-operation RTT samples into
//! a concurrency limit that tracks the downstream system's actual capacity.
//!
//! This is a from-scratch implementation of a Vegas-style gradient
//! controller: it compares a short-horizon RTT quantile against a smoothed
//! long-horizon baseline, derives a virtual queue-size estimate, and walks
//! the limit up or down a step at a time. See the module-level docs on
//! [`crate::windows`] for the statistical primitives this builds on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::cancellation::CancellationToken;
use crate::error::Result;
use crate::semaphore::{DynamicSemaphore, SemaphoreGuard};
use crate::windows::{CorrelationWindow, LongRttEwma, RollingWindow, ShortRttWindow};

/// A tuning function injection point: `alpha`, `beta`, `increase`, and
/// `decrease` are all `fn(limit) -> value`.
pub type TuningFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Invoked whenever the integer-truncated limit changes.
pub type LimitChangedListener = Arc<dyn Fn(f64, f64) + Send + Sync>;

/// Default `alpha(limit) = 3 / log10(max(limit, 2))`.
pub fn default_alpha(limit: f64) -> f64 {
    3.0 / limit.max(2.0).log10()
}

/// Default `beta(limit) = 6 / log10(max(limit, 2))`.
pub fn default_beta(limit: f64) -> f64 {
    6.0 / limit.max(2.0).log10()
}

/// Default additive increase: one permit per update.
pub fn default_increase(limit: f64) -> f64 {
    limit + 1.0
}

/// Default additive decrease: one permit per update, never below 1.
pub fn default_decrease(limit: f64) -> f64 {
    (limit - 1.0).max(1.0)
}

/// Which signal marks the limiter as "overloaded" for decision rules 2 and 3.
///
/// An overflow layer that queues or bounds latency gives callers a
/// meaningful `blocked_since` duration to reason about; a bare limiter with
/// no overflow layer has nothing to queue on, so overload collapses to
/// "the semaphore is full".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverloadSignal {
    /// `blocked_since` has been set for at least `overload_blocked_duration`.
    BlockedDuration,
    /// The semaphore is at capacity right now.
    IsFull,
}

/// Static configuration for an [`AdaptiveLimiter`]. Constructed by
/// [`crate::builder::Builder`]; exposed here so the controller's own tests
/// can build one directly.
#[derive(Clone)]
pub struct ControllerConfig {
    pub short_window_min_duration: Duration,
    pub short_window_max_duration: Duration,
    pub short_window_min_samples: usize,
    pub long_window_size: f64,
    pub quantile: f64,
    pub min_limit: f64,
    pub max_limit: f64,
    pub initial_limit: f64,
    pub max_limit_factor: f64,
    pub correlation_window_size: usize,
    pub stabilization_window_size: usize,
    pub overload_blocked_duration: Duration,
    pub overload_signal: OverloadSignal,
    pub alpha_fn: TuningFn,
    pub beta_fn: TuningFn,
    pub increase_fn: TuningFn,
    pub decrease_fn: TuningFn,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            short_window_min_duration: Duration::from_secs(1),
            short_window_max_duration: Duration::from_secs(1),
            short_window_min_samples: 1,
            long_window_size: 60.0,
            quantile: 0.9,
            min_limit: 1.0,
            max_limit: 200.0,
            initial_limit: 20.0,
            max_limit_factor: 5.0,
            correlation_window_size: 20,
            stabilization_window_size: 10,
            overload_blocked_duration: Duration::from_secs(5),
            overload_signal: OverloadSignal::IsFull,
            alpha_fn: Arc::new(default_alpha),
            beta_fn: Arc::new(default_beta),
            increase_fn: Arc::new(default_increase),
            decrease_fn: Arc::new(default_decrease),
        }
    }
}

struct ControllerState {
    limit: f64,
    short_digest: ShortRttWindow,
    long_rtt: LongRttEwma,
    rtt_window: RollingWindow,
    inflight_window: RollingWindow,
    throughput_corr_window: CorrelationWindow,
    rtt_corr_window: CorrelationWindow,
    next_update_time: Instant,
}

impl ControllerState {
    fn new(config: &ControllerConfig) -> Self {
        Self {
            limit: config.initial_limit,
            short_digest: ShortRttWindow::new(),
            long_rtt: LongRttEwma::new(config.long_window_size),
            rtt_window: RollingWindow::new(config.stabilization_window_size),
            inflight_window: RollingWindow::new(config.stabilization_window_size),
            throughput_corr_window: CorrelationWindow::new(config.correlation_window_size),
            rtt_corr_window: CorrelationWindow::new(config.correlation_window_size),
            next_update_time: Instant::now(),
        }
    }
}

/// A self-tuning concurrency limiter.
///
/// Wraps a [`DynamicSemaphore`] whose capacity is continuously retuned from
/// completed-operation latency, the way [`crate::overflow`] layers wrap this
/// limiter in turn to add admission policy on top.
pub struct AdaptiveLimiter {
    semaphore: DynamicSemaphore,
    state: Mutex<ControllerState>,
    config: ControllerConfig,
    listener: Option<LimitChangedListener>,
    // Atomic mirror of `state.limit`'s floor, so `limit()` doesn't need the
    // controller mutex on the hot read path.
    limit_cache: AtomicU64,
}

impl AdaptiveLimiter {
    /// Start building an `AdaptiveLimiter` with the crate's defaults.
    pub fn builder() -> crate::builder::Builder {
        crate::builder::Builder::new()
    }

    pub(crate) fn with_config(config: ControllerConfig, listener: Option<LimitChangedListener>) -> Self {
        let state = ControllerState::new(&config);
        let semaphore = DynamicSemaphore::new(state.limit.floor().max(1.0) as usize);
        let limit_cache = AtomicU64::new(state.limit.floor() as u64);
        Self {
            semaphore,
            state: Mutex::new(state),
            config,
            listener,
            limit_cache,
        }
    }

    /// Current limit, truncated to an integer permit count.
    pub fn limit(&self) -> usize {
        self.limit_cache.load(Ordering::Acquire) as usize
    }

    /// Current limit as the raw float the controller tracks internally.
    pub fn limit_f64(&self) -> f64 {
        self.state.lock().limit
    }

    /// Current long-horizon RTT baseline the controller tracks internally,
    /// in milliseconds.
    pub fn long_rtt(&self) -> f64 {
        self.state.lock().long_rtt.value()
    }

    pub fn inflight(&self) -> usize {
        self.semaphore.inflight()
    }

    pub fn blocked(&self) -> usize {
        self.semaphore.blocked_count()
    }

    pub fn blocked_since(&self) -> Option<Instant> {
        self.semaphore.blocked_since()
    }

    pub fn blocked_duration(&self) -> Option<Duration> {
        self.semaphore.blocked_duration()
    }

    pub fn is_full(&self) -> bool {
        self.semaphore.is_full()
    }

    pub(crate) fn semaphore(&self) -> &DynamicSemaphore {
        &self.semaphore
    }

    pub(crate) fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Block until a permit is available or `cancellation` fires.
    pub async fn acquire(&self, cancellation: &CancellationToken) -> Result<Permit<'_>> {
        let guard = self.semaphore.acquire(cancellation).await?;
        Ok(self.make_permit(guard))
    }

    /// Non-blocking acquire; `None` if the limit is reached or callers are
    /// already queued.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let guard = self.semaphore.try_acquire()?;
        Some(self.make_permit(guard))
    }

    fn make_permit(&self, guard: SemaphoreGuard<'_>) -> Permit<'_> {
        let inflight_at_acquire = self.semaphore.inflight();
        trace!(inflight = inflight_at_acquire, "permit acquired");
        Permit {
            limiter: self,
            guard: Some(guard),
            start: Instant::now(),
            inflight_at_acquire,
        }
    }

    /// Feed one completed-operation RTT sample (milliseconds) and the
    /// inflight count observed when that operation's permit was acquired.
    /// Runs the update algorithm if the gate (time elapsed, enough samples)
    /// is open.
    fn record_sample(&self, rtt_ms: f64, inflight_at_acquire: usize) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.short_digest.add(rtt_ms);

        if now >= state.next_update_time
            && state.short_digest.count() >= self.config.short_window_min_samples
        {
            self.update_locked(&mut state, inflight_at_acquire, now);
        }
    }

    fn update_locked(&self, state: &mut ControllerState, inflight: usize, now: Instant) {
        let old_limit = state.limit;

        let short_rtt = state.short_digest.quantile(self.config.quantile).max(f64::EPSILON);
        let long_rtt = state.long_rtt.update(short_rtt);

        let gradient = long_rtt / short_rtt;
        let queue_size = (inflight as f64 * (1.0 - gradient)).ceil();
        let throughput = inflight as f64 / short_rtt;

        let (throughput_corr, _, throughput_cv) = state
            .throughput_corr_window
            .add(inflight as f64, throughput);
        let throughput_cv = if throughput_cv.is_nan() { 1.0 } else { throughput_cv };
        let (rtt_corr, _, _) = state.rtt_corr_window.add(inflight as f64, short_rtt);

        state.rtt_window.add(short_rtt);
        let rtt_cv = state.rtt_window.cv();
        let rtt_cv = if rtt_cv.is_nan() { 1.0 } else { rtt_cv };

        state.inflight_window.add(inflight as f64);
        let inflight_slope = state.inflight_window.slope();

        let alpha = (self.config.alpha_fn)(old_limit);
        let beta = (self.config.beta_fn)(old_limit);

        let overloaded = match self.config.overload_signal {
            OverloadSignal::BlockedDuration => self
                .semaphore
                .blocked_duration()
                .is_some_and(|d| d >= self.config.overload_blocked_duration),
            OverloadSignal::IsFull => self.semaphore.is_full(),
        };

        enum Decision {
            Increase,
            Decrease,
            Hold,
        }

        let mut decision = if queue_size > beta {
            Decision::Decrease
        } else if overloaded && throughput_corr < 0.0 {
            Decision::Decrease
        } else if overloaded && throughput_cv < 0.1 && rtt_corr > 0.7 {
            Decision::Decrease
        } else if queue_size < alpha {
            Decision::Increase
        } else {
            Decision::Hold
        };

        if matches!(decision, Decision::Decrease) && rtt_cv < 0.05 && inflight_slope < 0.0 {
            decision = Decision::Hold;
        }

        let mut new_limit = match decision {
            Decision::Increase => (self.config.increase_fn)(old_limit),
            Decision::Decrease => (self.config.decrease_fn)(old_limit),
            Decision::Hold => old_limit,
        };

        new_limit = new_limit.clamp(self.config.min_limit, self.config.max_limit);

        if new_limit > inflight as f64 * self.config.max_limit_factor {
            new_limit = (self.config.decrease_fn)(old_limit).clamp(self.config.min_limit, self.config.max_limit);
        }

        state.limit = new_limit;

        if new_limit.floor() != old_limit.floor() {
            debug!(
                old_limit = old_limit,
                new_limit = new_limit,
                gradient = gradient,
                queue_size = queue_size,
                alpha = alpha,
                beta = beta,
                "adaptive limit changed"
            );
            if let Some(listener) = &self.listener {
                listener(old_limit, new_limit);
            }
        }

        self.limit_cache.store(new_limit.floor() as u64, Ordering::Release);
        self.semaphore.set_capacity(new_limit.floor().max(1.0) as usize);

        let min_rtt_ms = state.short_digest.min_rtt();
        let min_interval = Duration::from_secs_f64((2.0 * min_rtt_ms / 1000.0).max(0.0));
        let interval = min_interval
            .max(self.config.short_window_min_duration)
            .min(self.config.short_window_max_duration.max(self.config.short_window_min_duration));
        state.next_update_time = now + interval;
        state.short_digest.reset();
    }
}

/// A value handle representing the right to run exactly one operation.
///
/// Must be terminated by exactly one of [`Permit::record`] or simply letting
/// it drop (the "`drop()`" case in the spec): both release the underlying
/// semaphore slot, but only `record` contributes a sample to the controller.
pub struct Permit<'a> {
    limiter: &'a AdaptiveLimiter,
    guard: Option<SemaphoreGuard<'a>>,
    start: Instant,
    inflight_at_acquire: usize,
}

impl<'a> Permit<'a> {
    /// Inflight count observed when this permit was acquired; stable across
    /// the operation's lifetime even if the limit changes mid-flight.
    pub fn inflight_at_acquire(&self) -> usize {
        self.inflight_at_acquire
    }

    /// Record `duration` as a completed-operation sample and release the
    /// slot.
    pub fn record(mut self, duration: Duration) {
        self.limiter
            .record_sample(duration.as_secs_f64() * 1000.0, self.inflight_at_acquire);
        self.guard.take();
    }

    /// Record the time elapsed since acquisition as the sample.
    pub fn record_elapsed(self) {
        let elapsed = self.start.elapsed();
        self.record(elapsed);
    }
}

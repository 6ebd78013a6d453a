//! Builder surface for [`AdaptiveLimiter`] and its overflow layers.
//!
//! Follows the teacher's constructor style (validate, then construct)
//! extended to the richer option set: every option defaults to a sensible
//! value, and `build*` is infallible — misconfiguration (e.g. `min > max`)
//! is a caller programming error caught by `debug_assert!`, not a runtime
//! `Error`.

use std::sync::Arc;
use std::time::Duration;

use crate::controller::{AdaptiveLimiter, ControllerConfig, LimitChangedListener, OverloadSignal};
use crate::overflow::{LatencyLimiter, PriorityLimiter, QueueingLimiter};
use crate::prioritizer::Prioritizer;

/// Incrementally configures an [`AdaptiveLimiter`], then builds either the
/// bare limiter or one of its overflow-layer wrappers.
///
/// Which `build*` method is called is the overflow mode selector: there is
/// no stored "mode" field, since the four limiter kinds are distinct types
/// rather than variants of one enum.
#[derive(Clone)]
pub struct Builder {
    config: ControllerConfig,
    listener: Option<LimitChangedListener>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            config: ControllerConfig::default(),
            listener: None,
        }
    }

    pub fn short_window(mut self, min_duration: Duration, max_duration: Duration, min_samples: usize) -> Self {
        self.config.short_window_min_duration = min_duration;
        self.config.short_window_max_duration = max_duration;
        self.config.short_window_min_samples = min_samples;
        self
    }

    pub fn long_window_size(mut self, size: f64) -> Self {
        self.config.long_window_size = size;
        self
    }

    pub fn quantile(mut self, quantile: f64) -> Self {
        self.config.quantile = quantile;
        self
    }

    pub fn limits(mut self, min: f64, max: f64, initial: f64) -> Self {
        self.config.min_limit = min;
        self.config.max_limit = max;
        self.config.initial_limit = initial;
        self
    }

    pub fn max_limit_factor(mut self, factor: f64) -> Self {
        self.config.max_limit_factor = factor;
        self
    }

    pub fn correlation_window_size(mut self, size: usize) -> Self {
        self.config.correlation_window_size = size;
        self
    }

    pub fn stabilization_window_size(mut self, size: usize) -> Self {
        self.config.stabilization_window_size = size;
        self
    }

    pub fn overload_blocked_duration(mut self, duration: Duration) -> Self {
        self.config.overload_blocked_duration = duration;
        self
    }

    pub fn overload_signal(mut self, signal: OverloadSignal) -> Self {
        self.config.overload_signal = signal;
        self
    }

    pub fn alpha_fn(mut self, f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        self.config.alpha_fn = Arc::new(f);
        self
    }

    pub fn beta_fn(mut self, f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        self.config.beta_fn = Arc::new(f);
        self
    }

    pub fn increase_fn(mut self, f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        self.config.increase_fn = Arc::new(f);
        self
    }

    pub fn decrease_fn(mut self, f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        self.config.decrease_fn = Arc::new(f);
        self
    }

    /// Fires under the controller's internal lock whenever a limit update
    /// crosses an integer boundary; see the re-entrancy note in the
    /// crate's design notes.
    pub fn on_limit_changed(mut self, listener: impl Fn(f64, f64) + Send + Sync + 'static) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    fn validate(&self) {
        debug_assert!(self.config.min_limit >= 1.0, "min_limit must be at least 1");
        debug_assert!(self.config.max_limit >= self.config.min_limit, "max_limit must be >= min_limit");
        debug_assert!(
            self.config.initial_limit >= self.config.min_limit && self.config.initial_limit <= self.config.max_limit,
            "initial_limit must fall within [min_limit, max_limit]"
        );
        debug_assert!(self.config.quantile > 0.0 && self.config.quantile <= 1.0, "quantile must be in (0, 1]");
        debug_assert!(self.config.max_limit_factor > 0.0, "max_limit_factor must be positive");
        debug_assert!(
            self.config.short_window_max_duration >= self.config.short_window_min_duration,
            "short_window_max_duration must be >= short_window_min_duration"
        );
    }

    /// Build the bare adaptive limiter, with no overflow layer.
    pub fn build(self) -> AdaptiveLimiter {
        self.validate();
        AdaptiveLimiter::with_config(self.config, self.listener)
    }

    /// Build with a virtual-queue overflow layer absorbing bursts beyond the
    /// semaphore's own capacity.
    pub fn build_queueing(self, initial_rejection_factor: f64, max_rejection_factor: f64) -> QueueingLimiter {
        debug_assert!(
            max_rejection_factor >= initial_rejection_factor,
            "max_rejection_factor must be >= initial_rejection_factor"
        );
        QueueingLimiter::new(self.build(), initial_rejection_factor, max_rejection_factor)
    }

    /// Build with a latency-bounded overflow layer rejecting callers whose
    /// estimated total RTT would exceed `max_execution_time`.
    pub fn build_latency(self, rejection_threshold: Duration, max_execution_time: Duration) -> LatencyLimiter {
        debug_assert!(
            max_execution_time >= rejection_threshold,
            "max_execution_time must be >= rejection_threshold"
        );
        LatencyLimiter::new(self.build(), rejection_threshold, max_execution_time)
    }

    /// Build with a priority-coordinated overflow layer deferring to a
    /// shared [`Prioritizer`]'s threshold.
    pub fn build_prioritized(
        self,
        initial_rejection_factor: f64,
        max_rejection_factor: f64,
        prioritizer: Arc<Prioritizer>,
    ) -> PriorityLimiter {
        debug_assert!(
            max_rejection_factor >= initial_rejection_factor,
            "max_rejection_factor must be >= initial_rejection_factor"
        );
        PriorityLimiter::new(self.build(), initial_rejection_factor, max_rejection_factor, prioritizer)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_scenario_one() {
        let limiter = Builder::new().build();
        assert_eq!(limiter.limit(), 20);
        assert_eq!(limiter.inflight(), 0);
        assert_eq!(limiter.blocked(), 0);
    }

    #[test]
    fn limits_and_quantile_are_applied() {
        let limiter = Builder::new().limits(1.0, 20.0, 1.0).quantile(0.9).build();
        assert_eq!(limiter.limit(), 1);
    }

    #[test]
    fn build_queueing_wraps_the_base_limiter() {
        let q = Builder::new().limits(1.0, 10.0, 1.0).build_queueing(2.0, 4.0);
        assert_eq!(q.inner().limit(), 1);
        assert!(q.try_acquire().is_some());
    }

    #[test]
    fn build_latency_wraps_the_base_limiter() {
        let l = Builder::new()
            .limits(1.0, 10.0, 1.0)
            .build_latency(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(l.inner().limit(), 1);
    }

    #[test]
    fn build_prioritized_registers_with_the_prioritizer() {
        let prioritizer = Arc::new(Prioritizer::new());
        let p = Builder::new().limits(1.0, 10.0, 1.0).build_prioritized(2.0, 4.0, Arc::clone(&prioritizer));
        prioritizer.calibrate();
        assert_eq!(p.inner().limit(), 1);
        drop(p);
    }

    #[test]
    fn custom_tuning_functions_are_used() {
        let limiter = Builder::new()
            .limits(1.0, 10.0, 1.0)
            .alpha_fn(|_| 100.0)
            .beta_fn(|_| 200.0)
            .build();
        assert_eq!(limiter.limit(), 1);
    }
}

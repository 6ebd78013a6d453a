//! Long-RTT tracker: a plain arithmetic mean during an initial warmup, then
//! an exponentially weighted moving average once enough samples have been
//! seen to make the smoothing factor meaningful.

/// Number of samples averaged arithmetically before switching to EWMA
/// smoothing. Not exposed as a builder option: it only shapes how quickly
/// the long-RTT baseline settles in, not the steady-state behavior.
const DEFAULT_WARMUP_SAMPLES: usize = 10;

/// Tracks a smoothed long-horizon RTT baseline.
pub struct LongRttEwma {
    warmup_samples: usize,
    window_size: f64,
    count: usize,
    warmup_sum: f64,
    value: f64,
}

impl LongRttEwma {
    /// `window_size` is the EWMA's `N`; the smoothing factor is `2/(N+1)`.
    pub fn new(window_size: f64) -> Self {
        assert!(window_size > 0.0, "EWMA window_size must be positive");
        Self {
            warmup_samples: DEFAULT_WARMUP_SAMPLES,
            window_size,
            count: 0,
            warmup_sum: 0.0,
            value: 0.0,
        }
    }

    /// Feed a new sample, returning the updated value.
    pub fn update(&mut self, sample: f64) -> f64 {
        self.count += 1;

        if self.count <= self.warmup_samples {
            self.warmup_sum += sample;
            self.value = self.warmup_sum / self.count as f64;
        } else {
            let alpha = 2.0 / (self.window_size + 1.0);
            self.value += (sample - self.value) * alpha;
        }

        self.value
    }

    /// Current smoothed value. `0.0` before the first sample.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_warming_up(&self) -> bool {
        self.count < self.warmup_samples
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.warmup_sum = 0.0;
        self.value = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let e = LongRttEwma::new(60.0);
        assert_eq!(e.value(), 0.0);
        assert!(e.is_warming_up());
    }

    #[test]
    fn warmup_phase_is_arithmetic_mean() {
        let mut e = LongRttEwma::new(60.0);
        let v1 = e.update(100.0);
        assert!((v1 - 100.0).abs() < 1e-9);
        let v2 = e.update(200.0);
        assert!((v2 - 150.0).abs() < 1e-9);
    }

    #[test]
    fn ten_identical_warmup_samples_settle_exactly() {
        let mut e = LongRttEwma::new(60.0);
        let mut last = 0.0;
        for _ in 0..10 {
            last = e.update(1000.0);
        }
        assert!((last - 1000.0).abs() < 1e-9);
        assert!(!e.is_warming_up());
    }

    #[test]
    fn post_warmup_smooths_toward_new_samples_without_jumping() {
        let mut e = LongRttEwma::new(60.0);
        for _ in 0..10 {
            e.update(1000.0);
        }
        let after = e.update(2000.0);
        assert!(after > 1000.0 && after < 2000.0);
        // alpha = 2/61 ~= 0.0328, so the jump should be small.
        assert!(after < 1100.0, "expected small step, got {}", after);
    }

    #[test]
    fn reset_returns_to_initial_state() {
        let mut e = LongRttEwma::new(60.0);
        e.update(500.0);
        e.reset();
        assert_eq!(e.value(), 0.0);
        assert_eq!(e.count(), 0);
    }
}

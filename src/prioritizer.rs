//! Cross-limiter prioritizer: aggregates queue pressure across every
//! registered [`crate::overflow::PriorityLimiter`] and derives a single
//! rejection rate and priority threshold that sheds load fairly across all
//! of them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::cancellation::CancellationToken;
use crate::overflow::{rejection_rate, PriorityBand};
use crate::windows::{RollingWindow, TDigest};

/// A snapshot of one registered limiter's queue pressure, read by the
/// prioritizer on each `calibrate()`.
#[derive(Debug, Clone, Copy)]
pub struct LimiterStats {
    pub limit: f64,
    pub blocked: f64,
    pub rejection_threshold: f64,
    pub max_queue: f64,
}

/// A capability object reading one limiter's current stats, without the
/// prioritizer holding a typed reference back into that limiter.
pub type StatsSupplier = Arc<dyn Fn() -> LimiterStats + Send + Sync>;

/// Invoked when the rejection threshold changes, `(old, new)`.
pub type ThresholdChangedListener = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Quantile estimator over recorded priority levels in `[0, 499]`, used to
/// pick the threshold that corresponds to a desired rejection fraction.
struct LevelTracker {
    digest: TDigest,
}

impl LevelTracker {
    fn new() -> Self {
        Self { digest: TDigest::new() }
    }

    fn record(&mut self, level: u32) {
        self.digest.add(level as f64);
    }

    fn get_level(&mut self, quantile: f64) -> u32 {
        self.digest
            .quantile(quantile.clamp(0.0, 1.0))
            .round()
            .clamp(0.0, 499.0) as u32
    }
}

struct PrioritizerState {
    suppliers: HashMap<u64, StatsSupplier>,
    next_handle: u64,
    level_tracker: LevelTracker,
}

/// Aggregates registered priority limiters' queue pressure into one
/// rejection rate and priority threshold.
pub struct Prioritizer {
    state: Mutex<PrioritizerState>,
    rejection_threshold: AtomicU32,
    rejection_rate_bits: AtomicU64,
    usage_tracker: Option<Arc<UsageTracker>>,
    listener: Option<ThresholdChangedListener>,
}

impl Prioritizer {
    pub fn new() -> Self {
        Self::with_options(None, None)
    }

    pub fn with_usage_tracker(usage_tracker: Arc<UsageTracker>) -> Self {
        Self::with_options(Some(usage_tracker), None)
    }

    pub fn with_options(usage_tracker: Option<Arc<UsageTracker>>, listener: Option<ThresholdChangedListener>) -> Self {
        Self {
            state: Mutex::new(PrioritizerState {
                suppliers: HashMap::new(),
                next_handle: 0,
                level_tracker: LevelTracker::new(),
            }),
            rejection_threshold: AtomicU32::new(0),
            rejection_rate_bits: AtomicU64::new(0.0f64.to_bits()),
            usage_tracker,
            listener,
        }
    }

    pub fn usage_tracker(&self) -> Option<&Arc<UsageTracker>> {
        self.usage_tracker.as_ref()
    }

    /// Register a limiter's stats supplier; returns a handle for
    /// `unregister`.
    pub fn register(&self, supplier: StatsSupplier) -> u64 {
        let mut state = self.state.lock();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.suppliers.insert(handle, supplier);
        handle
    }

    pub fn unregister(&self, handle: u64) {
        self.state.lock().suppliers.remove(&handle);
    }

    /// Current aggregate rejection rate, `0.0` with no registered limiters.
    pub fn rejection_rate(&self) -> f64 {
        f64::from_bits(self.rejection_rate_bits.load(Ordering::Acquire))
    }

    /// Current priority threshold; levels below this are rejected.
    pub fn rejection_threshold(&self) -> u32 {
        self.rejection_threshold.load(Ordering::Acquire)
    }

    pub(crate) fn record_level(&self, level: u32) {
        self.state.lock().level_tracker.record(level);
    }

    /// Recompute the aggregate rate and threshold from every registered
    /// limiter's current stats.
    pub fn calibrate(&self) {
        let mut state = self.state.lock();

        let (mut sum_limit, mut sum_queued, mut sum_threshold, mut sum_max_queue) = (0.0, 0.0, 0.0, 0.0);
        for supplier in state.suppliers.values() {
            let stats = supplier();
            sum_limit += stats.limit;
            sum_queued += stats.blocked;
            sum_threshold += stats.rejection_threshold;
            sum_max_queue += stats.max_queue;
        }
        let _ = sum_limit;

        let rate = if state.suppliers.is_empty() {
            0.0
        } else {
            rejection_rate(sum_queued, sum_threshold, sum_max_queue)
        };
        self.rejection_rate_bits.store(rate.to_bits(), Ordering::Release);

        let old_threshold = self.rejection_threshold.load(Ordering::Acquire);
        let new_threshold = if rate == 0.0 {
            0
        } else {
            state.level_tracker.get_level(rate)
        };
        self.rejection_threshold.store(new_threshold, Ordering::Release);
        drop(state);

        if new_threshold != old_threshold {
            debug!(old = old_threshold, new = new_threshold, rate = rate, "priority threshold changed");
            if let Some(listener) = &self.listener {
                listener(old_threshold, new_threshold);
            }
        }

        if let Some(usage) = &self.usage_tracker {
            usage.calibrate();
        }
    }

    /// Spawn a background task running `calibrate()` on a fixed tick until
    /// `cancellation` fires.
    pub fn schedule_calibrations(self: &Arc<Self>, interval: Duration, cancellation: CancellationToken) {
        let this = Arc::clone(self);
        compio::runtime::spawn(async move {
            loop {
                let sleep = compio::time::sleep(interval);
                futures_util::pin_mut!(sleep);
                let cancelled = cancellation.cancelled();
                futures_util::pin_mut!(cancelled);

                match futures_util::future::select(sleep, cancelled).await {
                    futures_util::future::Either::Left(_) => this.calibrate(),
                    futures_util::future::Either::Right(_) => break,
                }
            }
        })
        .detach();
    }
}

impl Default for Prioritizer {
    fn default() -> Self {
        Self::new()
    }
}

struct UsageEntry {
    last_activity: Instant,
    usage: RollingWindow,
}

/// Maps user identity to recent resource usage, for per-user fairness
/// within a priority band: heavier users get lower levels within the band.
///
/// A bounded map with LRU eviction on insert and TTL-style expiry (entries
/// untouched for longer than twice `usage_window`) swept on `calibrate`.
pub struct UsageTracker {
    capacity: usize,
    usage_window: Duration,
    entries: Mutex<HashMap<String, UsageEntry>>,
    ranks: Mutex<HashMap<String, f64>>,
}

impl UsageTracker {
    pub fn new(capacity: usize, usage_window: Duration) -> Self {
        Self {
            capacity,
            usage_window,
            entries: Mutex::new(HashMap::new()),
            ranks: Mutex::new(HashMap::new()),
        }
    }

    /// Record `amount` of usage for `user` (e.g. one unit per admitted
    /// operation).
    pub fn record_usage(&self, user: &str, amount: f64) {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(user) {
            entry.last_activity = Instant::now();
            entry.usage.add(amount);
            return;
        }

        if entries.len() >= self.capacity {
            if let Some(lru_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_activity)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&lru_key);
            }
        }

        let mut usage = RollingWindow::new(32);
        usage.add(amount);
        entries.insert(
            user.to_string(),
            UsageEntry {
                last_activity: Instant::now(),
                usage,
            },
        );
    }

    /// Recompute each active user's usage rank (0.0 = heaviest, towards 1.0
    /// = lightest) and sweep expired entries. Heavier users land at lower
    /// levels within their band.
    pub fn calibrate(&self) {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let expiry = self.usage_window * 2;
        entries.retain(|_, e| now.duration_since(e.last_activity) < expiry);

        let mut by_usage: Vec<(String, f64)> = entries.iter().map(|(k, e)| (k.clone(), e.usage.mean())).collect();
        by_usage.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let n = by_usage.len().max(1) as f64;
        let mut ranks = HashMap::with_capacity(by_usage.len());
        for (i, (user, _)) in by_usage.into_iter().enumerate() {
            ranks.insert(user, i as f64 / n);
        }
        *self.ranks.lock() = ranks;
    }

    /// Level within `band` for `user`; users with no recorded usage (or not
    /// yet calibrated) land at the band's midpoint.
    pub fn level_for(&self, band: PriorityBand, user: &str) -> u32 {
        let (lo, hi) = band.range();
        let rank = self.ranks.lock().get(user).copied().unwrap_or(0.5);
        let span = (hi - lo) as f64;
        (lo as f64 + rank * span).round().clamp(lo as f64, hi as f64) as u32
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

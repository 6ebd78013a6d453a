//! Short-RTT tracking: an approximate quantile sketch (a simplified
//! t-digest) over the samples seen since the last limit-update cycle, plus
//! the exact minimum and a sample count.
//!
//! Built from scratch rather than pulled in from a sketch crate, the same
//! way the rest of this crate's synchronization primitives are hand-rolled
//! instead of wrapped.

/// A weighted mean used as a digest's unit of compression.
#[derive(Debug, Clone, Copy)]
struct Centroid {
    mean: f64,
    weight: f64,
}

/// Approximate quantile sketch over a stream of `f64` samples.
///
/// Samples are buffered as singleton centroids and periodically compressed:
/// adjacent centroids are merged as long as the merged weight stays under a
/// size bound that shrinks near the tails (q close to 0 or 1) and grows near
/// the median, the same scaling idea the t-digest algorithm uses to keep
/// extreme quantiles precise while bounding total memory.
pub struct TDigest {
    compression: f64,
    unmerged: Vec<Centroid>,
    merged: Vec<Centroid>,
    count: usize,
    min: f64,
}

const DEFAULT_COMPRESSION: f64 = 100.0;
const COMPRESS_THRESHOLD: usize = 64;

impl TDigest {
    pub fn new() -> Self {
        Self::with_compression(DEFAULT_COMPRESSION)
    }

    pub fn with_compression(compression: f64) -> Self {
        assert!(compression > 0.0, "t-digest compression must be positive");
        Self {
            compression,
            unmerged: Vec::new(),
            merged: Vec::new(),
            count: 0,
            min: f64::INFINITY,
        }
    }

    pub fn add(&mut self, x: f64) {
        self.count += 1;
        if x < self.min {
            self.min = x;
        }
        self.unmerged.push(Centroid { mean: x, weight: 1.0 });
        if self.unmerged.len() >= COMPRESS_THRESHOLD {
            self.compress();
        }
    }

    /// Approximate value at quantile `q` (0.0..=1.0). `0.0` on an empty
    /// digest.
    pub fn quantile(&mut self, q: f64) -> f64 {
        self.compress();
        if self.merged.is_empty() {
            return 0.0;
        }

        let total_weight: f64 = self.merged.iter().map(|c| c.weight).sum();
        let target = q.clamp(0.0, 1.0) * total_weight;

        let mut cumulative = 0.0;
        for c in &self.merged {
            cumulative += c.weight;
            if cumulative >= target {
                return c.mean;
            }
        }
        self.merged.last().map(|c| c.mean).unwrap_or(0.0)
    }

    /// Exact minimum sample seen, or `f64::INFINITY` if none have.
    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn reset(&mut self) {
        self.unmerged.clear();
        self.merged.clear();
        self.count = 0;
        self.min = f64::INFINITY;
    }

    fn compress(&mut self) {
        if self.unmerged.is_empty() {
            return;
        }

        self.merged.append(&mut self.unmerged);
        self.merged
            .sort_by(|a, b| a.mean.partial_cmp(&b.mean).expect("non-NaN centroid means"));

        let total_weight: f64 = self.merged.iter().map(|c| c.weight).sum();
        if total_weight <= 0.0 {
            return;
        }

        let mut result: Vec<Centroid> = Vec::with_capacity(self.merged.len());
        let mut q_so_far = 0.0;
        let mut iter = self.merged.drain(..);
        let mut current = iter.next().expect("checked non-empty above");

        for next in iter {
            let q_mid = (q_so_far + current.weight / 2.0) / total_weight;
            let max_weight = 4.0 * total_weight * q_mid * (1.0 - q_mid) / self.compression;
            let max_weight = max_weight.max(1.0);

            if current.weight + next.weight <= max_weight {
                let merged_weight = current.weight + next.weight;
                current.mean =
                    (current.mean * current.weight + next.mean * next.weight) / merged_weight;
                current.weight = merged_weight;
            } else {
                q_so_far += current.weight;
                result.push(current);
                current = next;
            }
        }
        result.push(current);

        self.merged = result;
    }
}

impl Default for TDigest {
    fn default() -> Self {
        Self::new()
    }
}

/// Short-RTT window: a [`TDigest`] reset on each limit-update cycle, giving
/// the adaptive controller a quantile estimate plus the minimum and count
/// observed since the last update.
pub struct ShortRttWindow {
    digest: TDigest,
}

impl ShortRttWindow {
    pub fn new() -> Self {
        Self { digest: TDigest::new() }
    }

    pub fn add(&mut self, sample: f64) {
        self.digest.add(sample);
    }

    pub fn quantile(&mut self, q: f64) -> f64 {
        self.digest.quantile(q)
    }

    pub fn min_rtt(&self) -> f64 {
        self.digest.min()
    }

    pub fn count(&self) -> usize {
        self.digest.count()
    }

    pub fn is_empty(&self) -> bool {
        self.digest.is_empty()
    }

    pub fn reset(&mut self) {
        self.digest.reset();
    }
}

impl Default for ShortRttWindow {
    fn default() -> Self {
        Self::new()
    }
}

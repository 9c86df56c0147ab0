//! Decaying log-bucketed histogram.
//!
//! Usage samples land in geometrically growing buckets and carry an
//! exponentially decayed weight, so percentile queries favor recent
//! load without storing individual samples. Bucket 0 covers
//! `[0, first_bucket)`; every later bucket grows by the configured
//! ratio; values past the last bucket saturate into it.

use tracing::debug;

use crate::error::{RecommendError, RecommendResult};

/// Decay exponents past this trigger a reference shift so weights stay
/// well inside f64 range.
const MAX_DECAY_EXPONENT: f64 = 40.0;

/// Shape and decay parameters for a [`DecayingHistogram`].
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramOptions {
    /// Upper edge of bucket 0.
    pub first_bucket: f64,
    /// Geometric growth ratio between consecutive bucket edges.
    pub growth: f64,
    /// Bucket count; the last bucket absorbs everything above it.
    pub max_buckets: usize,
    /// Half-life of sample weight.
    pub half_life_secs: u64,
    /// Weights at or below this count as zero.
    pub epsilon: f64,
}

impl HistogramOptions {
    /// CPU usage in millicores: 10m first bucket, 5% growth, topping
    /// out around a thousand cores.
    pub fn cpu_millis() -> Self {
        Self {
            first_bucket: 10.0,
            growth: 1.05,
            max_buckets: 240,
            half_life_secs: 24 * 3600,
            epsilon: 1e-10,
        }
    }

    /// Memory usage in bytes: 10MiB first bucket, 5% growth, topping
    /// out around a tebibyte.
    pub fn memory_bytes() -> Self {
        Self {
            first_bucket: 10.0 * 1024.0 * 1024.0,
            growth: 1.05,
            max_buckets: 240,
            half_life_secs: 24 * 3600,
            epsilon: 1e-10,
        }
    }

    /// Same shape, different decay half-life.
    pub fn with_half_life(mut self, half_life_secs: u64) -> Self {
        self.half_life_secs = half_life_secs;
        self
    }

    pub(crate) fn validate(&self) -> RecommendResult<()> {
        if !(self.first_bucket > 0.0) {
            return Err(RecommendError::InvalidConfig(
                "histogram first bucket must be positive".to_string(),
            ));
        }
        if !(self.growth > 1.0) {
            return Err(RecommendError::InvalidConfig(format!(
                "histogram growth ratio {} must exceed 1",
                self.growth
            )));
        }
        if self.max_buckets < 2 {
            return Err(RecommendError::InvalidConfig(
                "histogram needs at least 2 buckets".to_string(),
            ));
        }
        if self.half_life_secs == 0 {
            return Err(RecommendError::InvalidConfig(
                "histogram half-life must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Histogram of decayed sample weights over log-scale buckets.
#[derive(Debug, Clone)]
pub struct DecayingHistogram {
    opts: HistogramOptions,
    weights: Vec<f64>,
    total: f64,
    /// Decay reference time; a sample at `ref_secs` has weight 1.
    ref_secs: u64,
}

impl DecayingHistogram {
    pub fn new(opts: HistogramOptions) -> Self {
        let weights = vec![0.0; opts.max_buckets];
        Self {
            opts,
            weights,
            total: 0.0,
            ref_secs: 0,
        }
    }

    /// Add one sample observed at `at` epoch seconds.
    ///
    /// Non-finite or negative values are dropped.
    pub fn record(&mut self, value: f64, at: u64) {
        if !value.is_finite() || value < 0.0 {
            debug!(value, "dropping unusable histogram sample");
            return;
        }
        self.renormalize(at);
        let weight = self.weight_at(at);
        let idx = self.bucket_index(value);
        self.weights[idx] += weight;
        self.total += weight;
    }

    /// Upper edge of the first bucket at which cumulative weight
    /// reaches `p` of the total. `None` while empty.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let threshold = p.clamp(0.0, 1.0) * self.total;
        let mut cumulative = 0.0;
        let mut top = None;
        for (idx, weight) in self.weights.iter().enumerate() {
            if *weight <= self.opts.epsilon {
                continue;
            }
            cumulative += weight;
            top = Some(idx);
            if cumulative >= threshold {
                return Some(self.bucket_upper(idx));
            }
        }
        // Cumulative float drift can land a hair under the threshold;
        // the highest occupied bucket is the right answer then.
        top.map(|idx| self.bucket_upper(idx))
    }

    pub fn is_empty(&self) -> bool {
        self.total <= self.opts.epsilon
    }

    pub fn reset(&mut self) {
        self.weights.fill(0.0);
        self.total = 0.0;
        self.ref_secs = 0;
    }

    fn bucket_index(&self, value: f64) -> usize {
        if value < self.opts.first_bucket {
            return 0;
        }
        let exact = (value / self.opts.first_bucket).ln() / self.opts.growth.ln();
        let idx = 1 + exact.floor() as usize;
        idx.min(self.opts.max_buckets - 1)
    }

    fn bucket_upper(&self, idx: usize) -> f64 {
        self.opts.first_bucket * self.opts.growth.powi(idx as i32)
    }

    /// Relative weight of a sample observed at `at`.
    fn weight_at(&self, at: u64) -> f64 {
        let exponent = (at as f64 - self.ref_secs as f64) / self.opts.half_life_secs as f64;
        exponent.exp2()
    }

    /// Shift the decay reference forward once exponents grow large,
    /// rescaling stored weights so ratios are preserved.
    fn renormalize(&mut self, at: u64) {
        let exponent = at.saturating_sub(self.ref_secs) as f64 / self.opts.half_life_secs as f64;
        if exponent < MAX_DECAY_EXPONENT {
            return;
        }
        let scale = (-exponent).exp2();
        self.total = 0.0;
        for weight in &mut self.weights {
            *weight *= scale;
            if *weight <= self.opts.epsilon {
                *weight = 0.0;
            }
            self.total += *weight;
        }
        self.ref_secs = at;
    }
}

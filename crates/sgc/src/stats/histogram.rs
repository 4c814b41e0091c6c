//! Histogram - Pause Time Histogram
//!
//! Tracks the distribution of collection pause times in logarithmic buckets
//! for percentile reporting (P50, P95, P99).

use std::collections::BTreeMap;

/// Histogram - pause time histogram
///
/// Values are nanoseconds. Bucket `b` holds values in `[2^(b-1), 2^b)`;
/// percentiles report the upper bound of the bucket they fall into.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Bucket counts (logarithmic buckets)
    buckets: BTreeMap<u32, u64>,

    /// Total count
    count: u64,

    /// Sum of all values
    sum: u64,

    min: u64,
    max: u64,
}

impl Histogram {
    /// Create new histogram
    pub fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
            count: 0,
            sum: 0,
            min: u64::MAX,
            max: 0,
        }
    }

    /// Record value
    pub fn record(&mut self, value: u64) {
        *self.buckets.entry(Self::bucket(value)).or_insert(0) += 1;
        self.count += 1;
        self.sum = self.sum.saturating_add(value);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Logarithmic bucket: 0, then 1, 2, 4, 8, ...
    fn bucket(value: u64) -> u32 {
        64 - value.leading_zeros()
    }

    fn bucket_upper_bound(bucket: u32) -> u64 {
        match bucket {
            0 => 0,
            64.. => u64::MAX,
            b => (1u64 << b) - 1,
        }
    }

    /// Get percentile, `p` in `[0, 1]`
    pub fn percentile(&self, p: f64) -> u64 {
        if self.count == 0 {
            return 0;
        }

        let target = ((self.count as f64 * p).ceil() as u64).max(1);
        let mut cumulative = 0;

        for (&bucket, &count) in self.buckets.iter() {
            cumulative += count;
            if cumulative >= target {
                return Self::bucket_upper_bound(bucket).min(self.max);
            }
        }

        self.max
    }

    /// Get P50 (median)
    pub fn p50(&self) -> u64 {
        self.percentile(0.50)
    }

    /// Get P95
    pub fn p95(&self) -> u64 {
        self.percentile(0.95)
    }

    /// Get P99
    pub fn p99(&self) -> u64 {
        self.percentile(0.99)
    }

    /// Get mean
    pub fn mean(&self) -> u64 {
        if self.count == 0 {
            return 0;
        }
        self.sum / self.count
    }

    /// Get min
    pub fn min(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.min
        }
    }

    /// Get max
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Get count
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Get sum
    pub fn sum(&self) -> u64 {
        self.sum
    }

    /// Clear histogram
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

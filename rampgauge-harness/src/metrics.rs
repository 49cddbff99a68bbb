use dashmap::DashMap;
use hdrhistogram::Histogram;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::worker::RequestRecord;

/// Longest latency the histogram resolves (one hour, in microseconds).
/// Larger values are clamped, so a bucket's memory never grows with traffic.
const HISTOGRAM_MAX_US: u64 = 3_600_000_000;
const HISTOGRAM_SIGFIG: u8 = 3;

fn new_histogram() -> Histogram<u64> {
    Histogram::new_with_bounds(1, HISTOGRAM_MAX_US, HISTOGRAM_SIGFIG)
        .expect("static histogram bounds are valid")
}

/// Streaming aggregate for one stage or one endpoint.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub requests: u64,
    pub failures: u64,
    pub slow_count: u64,
    pub duration_sum_us: u64,
    pub duration_count: u64,
    pub duration_max_us: u64,
    histogram: Histogram<u64>,
}

impl Default for Bucket {
    fn default() -> Self {
        Self::new()
    }
}

impl Bucket {
    pub fn new() -> Self {
        Self {
            requests: 0,
            failures: 0,
            slow_count: 0,
            duration_sum_us: 0,
            duration_count: 0,
            duration_max_us: 0,
            histogram: new_histogram(),
        }
    }

    pub fn observe(&mut self, duration: Duration, success: bool, slow: bool) {
        let us = duration.as_micros().min(u64::MAX as u128) as u64;
        self.requests += 1;
        if !success {
            self.failures += 1;
        }
        if slow {
            self.slow_count += 1;
        }
        self.duration_sum_us = self.duration_sum_us.saturating_add(us);
        self.duration_count += 1;
        self.duration_max_us = self.duration_max_us.max(us);
        self.histogram.saturating_record(us);
    }

    pub fn observe_record(&mut self, record: &RequestRecord) {
        self.observe(record.duration, record.success, record.slow);
    }

    /// Fold `other` into `self`.
    pub fn merge(&mut self, other: &Bucket) {
        self.requests += other.requests;
        self.failures += other.failures;
        self.slow_count += other.slow_count;
        self.duration_sum_us = self.duration_sum_us.saturating_add(other.duration_sum_us);
        self.duration_count += other.duration_count;
        self.duration_max_us = self.duration_max_us.max(other.duration_max_us);
        if let Err(e) = self.histogram.add(&other.histogram) {
            tracing::warn!(error = %e, "failed to merge latency histograms");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.requests == 0
    }

    /// `failures / requests`, or `None` for an empty bucket.
    pub fn failure_rate(&self) -> Option<f64> {
        ratio(self.failures, self.requests)
    }

    /// `slow_count / requests`, or `None` for an empty bucket.
    pub fn slow_rate(&self) -> Option<f64> {
        ratio(self.slow_count, self.requests)
    }

    pub fn success_rate(&self) -> Option<f64> {
        ratio(self.requests - self.failures, self.requests)
    }

    pub fn mean_ms(&self) -> Option<f64> {
        ratio(self.duration_sum_us, self.duration_count).map(|us| us / 1_000.0)
    }

    pub fn max_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| us_to_ms(self.duration_max_us))
    }

    /// Estimated latency at `percentile` (0..=100). Accurate to the histogram's
    /// three significant digits, and never above the exact observed maximum.
    pub fn percentile_ms(&self, percentile: f64) -> Option<f64> {
        if self.histogram.len() == 0 {
            return None;
        }
        let us = self
            .histogram
            .value_at_percentile(percentile)
            .min(self.duration_max_us);
        Some(us_to_ms(us))
    }
}

fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

fn us_to_ms(us: u64) -> f64 {
    us as f64 / 1_000.0
}

/// Run-scoped aggregation store shared by every virtual user.
///
/// Each bucket lives in a sharded map and is updated under its shard's lock, so
/// concurrent writers never lose an update. Memory is proportional to the number
/// of distinct stage and endpoint keys.
#[derive(Debug, Default)]
pub struct MetricsStore {
    stages: DashMap<usize, Bucket>,
    endpoints: DashMap<String, Bucket>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute `record` to exactly one stage bucket and one endpoint bucket.
    pub fn record(&self, record: &RequestRecord) {
        self.stages
            .entry(record.stage_key)
            .or_default()
            .observe_record(record);

        // Skip the key allocation on the hot path once the bucket exists.
        if let Some(mut bucket) = self.endpoints.get_mut(&record.endpoint) {
            bucket.observe_record(record);
            return;
        }
        self.endpoints
            .entry(record.endpoint.clone())
            .or_default()
            .observe_record(record);
    }

    /// Copy out every bucket. Call only after all writers have stopped.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let stages = self
            .stages
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        let endpoints = self
            .endpoints
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        MetricsSnapshot { stages, endpoints }
    }

    /// Consume the store once the run is over.
    pub fn into_snapshot(self) -> MetricsSnapshot {
        MetricsSnapshot {
            stages: self.stages.into_iter().collect(),
            endpoints: self.endpoints.into_iter().collect(),
        }
    }
}

/// Frozen view of a finished run's buckets.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub stages: BTreeMap<usize, Bucket>,
    pub endpoints: BTreeMap<String, Bucket>,
}

impl MetricsSnapshot {
    /// Every record lands in exactly one stage bucket, so their sum is the run total.
    pub fn overall(&self) -> Bucket {
        let mut total = Bucket::new();
        for bucket in self.stages.values() {
            total.merge(bucket);
        }
        total
    }

    pub fn stage(&self, index: usize) -> Option<&Bucket> {
        self.stages.get(&index)
    }

    pub fn endpoint(&self, endpoint: &str) -> Option<&Bucket> {
        self.endpoints.get(endpoint)
    }
}

//! # Benchmark Metrics
//!
//! Provide lightweight counters and a latency histogram shared by the load
//! workers, plus the exact per-trial statistics written to the report.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Use atomic counters to aggregate events cheaply.
//! 2. **Fixed Buckets**: Keep histogram buckets in a contiguous array for cache locality.
//! 3. **Exact Medians**: Workers also keep raw samples locally; they are merged
//!    once per trial, so the hot path never takes a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default latency bucket boundaries in microseconds.
pub const DEFAULT_LATENCY_BUCKETS_US: [u64; 14] = [
    50, 100, 200, 500, 1_000, 2_000, 5_000, 10_000, 20_000, 50_000, 100_000, 200_000, 500_000,
    1_000_000,
];

/// Snapshot of all counters at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub errors_total: u64,
    pub latency: LatencySnapshot,
}

/// Snapshot of the latency histogram.
#[derive(Debug, Clone)]
pub struct LatencySnapshot {
    /// Bucket boundaries in microseconds.
    pub bounds_us: Vec<u64>,
    /// Bucket counts, including the overflow bucket at the end.
    pub buckets: Vec<u64>,
    pub samples: u64,
}

impl LatencySnapshot {
    /// Upper bound (microseconds) of the bucket holding the `q` quantile.
    /// `None` when empty or when the quantile falls in the overflow bucket.
    pub fn quantile_upper_bound_us(&self, q: f64) -> Option<u64> {
        if self.samples == 0 {
            return None;
        }
        let target = ((self.samples as f64) * q.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (idx, count) in self.buckets.iter().enumerate() {
            seen += count;
            if seen >= target {
                return self.bounds_us.get(idx).copied();
            }
        }
        None
    }
}

/// Thread-safe counters shared by every worker of a trial.
pub struct Metrics {
    requests_total: AtomicU64,
    errors_total: AtomicU64,
    latency: LatencyHistogram,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            requests_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            latency: LatencyHistogram::new(DEFAULT_LATENCY_BUCKETS_US.to_vec()),
        }
    }

    /// Records a completed request and its latency.
    pub fn record_request(&self, latency: Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.latency.record(latency);
    }

    /// Records a failed request; failed requests carry no latency sample.
    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            latency: self.latency.snapshot(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket latency histogram.
///
/// Uses a linear scan to pick buckets; the list is small and stays hot in cache.
pub struct LatencyHistogram {
    bounds_us: Vec<u64>,
    buckets: Vec<AtomicU64>,
    samples: AtomicU64,
}

impl LatencyHistogram {
    /// `bounds_us` must be sorted ascending; one overflow bucket is appended.
    pub fn new(bounds_us: Vec<u64>) -> Self {
        let buckets = (0..=bounds_us.len()).map(|_| AtomicU64::new(0)).collect();
        LatencyHistogram {
            bounds_us,
            buckets,
            samples: AtomicU64::new(0),
        }
    }

    pub fn record(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.samples.fetch_add(1, Ordering::Relaxed);
        let idx = self
            .bounds_us
            .iter()
            .position(|bound| micros <= *bound)
            .unwrap_or(self.bounds_us.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            bounds_us: self.bounds_us.clone(),
            buckets: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            samples: self.samples.load(Ordering::Relaxed),
        }
    }
}

/// Result line of one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialStats {
    pub requests: u64,
    pub median_ms: f64,
    pub average_ms: f64,
    /// Payload bytes moved per second of wall time.
    pub throughput_bytes_per_sec: f64,
    pub errors: u64,
    /// Histogram bucket bound holding the 99th percentile; `None` when
    /// empty or beyond the last bucket.
    pub p99_upper_us: Option<u64>,
}

impl TrialStats {
    /// Builds the trial line from raw per-request latencies.
    ///
    /// The median is the upper middle sample for even counts.
    pub fn from_samples(mut samples: Vec<Duration>, elapsed: Duration, value_size: usize) -> Self {
        samples.sort_unstable();
        let requests = samples.len() as u64;
        let to_ms = |d: &Duration| d.as_secs_f64() * 1_000.0;

        let median_ms = samples.get(samples.len() / 2).map(to_ms).unwrap_or(0.0);
        let average_ms = if samples.is_empty() {
            0.0
        } else {
            samples.iter().map(to_ms).sum::<f64>() / samples.len() as f64
        };
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            round2((requests as f64 * value_size as f64) / secs)
        } else {
            0.0
        };

        TrialStats {
            requests,
            median_ms: round2(median_ms),
            average_ms: round2(average_ms),
            throughput_bytes_per_sec: throughput,
            errors: 0,
            p99_upper_us: None,
        }
    }

    /// Adds the shared counters collected during the trial.
    pub fn with_counters(mut self, snapshot: &MetricsSnapshot) -> Self {
        self.errors = snapshot.errors_total;
        self.p99_upper_us = snapshot.latency.quantile_upper_bound_us(0.99);
        self
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

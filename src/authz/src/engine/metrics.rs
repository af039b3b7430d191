//! Decision and latency metrics for the authorization checker
//!
//! Recording is lock-free for counters and a short push for latency samples.
//! Averages and percentiles are only computed when a snapshot is taken.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default number of latency samples kept
pub const DEFAULT_SAMPLE_WINDOW: usize = 10_000;

/// Snapshot of checker metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineMetrics {
    /// Permission checks, each batch entry counted once
    pub total_checks: u64,
    pub granted: u64,
    pub denied: u64,

    /// Effective sets served from cache / resolved from the stores
    pub cache_hits: u64,
    pub cache_misses: u64,

    /// Latency over the sample window, in milliseconds
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    pub avg_latency_ms: f64,
}

impl EngineMetrics {
    pub fn cache_hit_rate(&self) -> f64 {
        ratio(self.cache_hits, self.cache_hits + self.cache_misses)
    }

    pub fn grant_rate(&self) -> f64 {
        ratio(self.granted, self.granted + self.denied)
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Bounded ring of latency samples
struct LatencyWindow {
    samples: Mutex<VecDeque<f64>>,
    capacity: usize,
}

impl LatencyWindow {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_SAMPLE_WINDOW))),
            capacity,
        }
    }

    fn observe(&self, value_ms: f64) {
        let mut samples = self.samples.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(value_ms);
    }

    /// `(avg, p50, p99)`; the sort runs on a copy, outside the lock
    fn summary(&self) -> (f64, f64, f64) {
        let mut sorted: Vec<f64> = self.samples.lock().iter().copied().collect();
        if sorted.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        sorted.sort_by(f64::total_cmp);
        let avg = sorted.iter().sum::<f64>() / sorted.len() as f64;
        (avg, nearest_rank(&sorted, 0.50), nearest_rank(&sorted, 0.99))
    }

    fn clear(&self) {
        self.samples.lock().clear();
    }
}

fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    let idx = ((sorted.len() as f64) * p) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Metrics collector shared by concurrent checks
pub struct MetricsCollector {
    checks: AtomicU64,
    granted: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    latency: LatencyWindow,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_SAMPLE_WINDOW)
    }

    /// Collector keeping at most `max_samples` latency samples
    pub fn with_window(max_samples: usize) -> Self {
        Self {
            checks: AtomicU64::new(0),
            granted: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            latency: LatencyWindow::new(max_samples),
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision(&self, granted: bool) {
        self.checks.fetch_add(1, Ordering::Relaxed);
        if granted {
            self.granted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_latency(&self, latency: Duration) {
        self.latency.observe(latency.as_secs_f64() * 1000.0);
    }

    pub fn get_metrics(&self) -> EngineMetrics {
        let total_checks = self.checks.load(Ordering::Relaxed);
        let granted = self.granted.load(Ordering::Relaxed).min(total_checks);
        let (avg_latency_ms, latency_p50_ms, latency_p99_ms) = self.latency.summary();

        EngineMetrics {
            total_checks,
            granted,
            denied: total_checks - granted,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            latency_p50_ms,
            latency_p99_ms,
            avg_latency_ms,
        }
    }

    pub fn reset(&self) {
        for counter in [&self.checks, &self.granted, &self.cache_hits, &self.cache_misses] {
            counter.store(0, Ordering::Relaxed);
        }
        self.latency.clear();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

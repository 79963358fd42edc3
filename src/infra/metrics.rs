//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention. All
//! counter updates are lock-free; reporting swaps the interval counter.
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

pub struct Metrics {
    readings_received: AtomicU64,
    readings_rejected: AtomicU64,
    journal_write_errors: AtomicU64,
    aggregation_runs: AtomicU64,
    aggregation_failures: AtomicU64,
    status_builds: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    /// Readings since the last report, swapped to zero when reporting
    interval_readings: AtomicU64,
    last_report: Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            readings_received: AtomicU64::new(0),
            readings_rejected: AtomicU64::new(0),
            journal_write_errors: AtomicU64::new(0),
            aggregation_runs: AtomicU64::new(0),
            aggregation_failures: AtomicU64::new(0),
            status_builds: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            interval_readings: AtomicU64::new(0),
            last_report: Mutex::new(Instant::now()),
        }
    }

    pub fn record_reading_received(&self) {
        self.readings_received.fetch_add(1, Ordering::Relaxed);
        self.interval_readings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reading_rejected(&self) {
        self.readings_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_journal_write_error(&self) {
        self.journal_write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aggregation_run(&self) {
        self.aggregation_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aggregation_failure(&self) {
        self.aggregation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_status_build(&self) {
        self.status_builds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Build a summary and reset the interval counter.
    pub fn report(&self) -> MetricsSummary {
        let mut last_report = self.last_report.lock();
        let elapsed = last_report.elapsed().as_secs_f64();
        *last_report = Instant::now();
        drop(last_report);

        let interval_readings = self.interval_readings.swap(0, Ordering::Relaxed);
        let readings_per_sec =
            if elapsed > 0.0 { interval_readings as f64 / elapsed } else { 0.0 };

        MetricsSummary {
            readings_received: self.readings_received.load(Ordering::Relaxed),
            readings_rejected: self.readings_rejected.load(Ordering::Relaxed),
            readings_per_sec,
            journal_write_errors: self.journal_write_errors.load(Ordering::Relaxed),
            aggregation_runs: self.aggregation_runs.load(Ordering::Relaxed),
            aggregation_failures: self.aggregation_failures.load(Ordering::Relaxed),
            status_builds: self.status_builds.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter snapshot for logging and the /metrics endpoint.
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub readings_received: u64,
    pub readings_rejected: u64,
    pub readings_per_sec: f64,
    pub journal_write_errors: u64,
    pub aggregation_runs: u64,
    pub aggregation_failures: u64,
    pub status_builds: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            readings_received = %self.readings_received,
            readings_rejected = %self.readings_rejected,
            readings_per_sec = format!("{:.2}", self.readings_per_sec),
            journal_write_errors = %self.journal_write_errors,
            aggregation_runs = %self.aggregation_runs,
            aggregation_failures = %self.aggregation_failures,
            status_builds = %self.status_builds,
            cache_hits = %self.cache_hits,
            cache_misses = %self.cache_misses,
            "metrics_summary"
        );
    }
}

//! Query outcome counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Atomic counters of what happened to each query.
///
/// Rejections (a filter said no) and failures (the pipeline or upstream could
/// not answer) are counted separately.
pub struct Stats {
    started: Instant,
    requests: AtomicU64,
    forwarded: AtomicU64,
    rejected: AtomicU64,
    filter_errors: AtomicU64,
    upstream_errors: AtomicU64,
    /// Cumulative response time in microseconds for averaging.
    total_response_time_us: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            requests: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            filter_errors: AtomicU64::new(0),
            upstream_errors: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
        }
    }

    pub fn record_forwarded(&self, elapsed: Duration) {
        self.record(&self.forwarded, elapsed);
    }

    pub fn record_rejected(&self, elapsed: Duration) {
        self.record(&self.rejected, elapsed);
    }

    pub fn record_filter_error(&self, elapsed: Duration) {
        self.record(&self.filter_errors, elapsed);
    }

    pub fn record_upstream_error(&self, elapsed: Duration) {
        self.record(&self.upstream_errors, elapsed);
    }

    fn record(&self, counter: &AtomicU64, elapsed: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let requests = self.requests.swap(0, Ordering::Relaxed);
        let forwarded = self.forwarded.swap(0, Ordering::Relaxed);
        let rejected = self.rejected.swap(0, Ordering::Relaxed);
        let filter_errors = self.filter_errors.swap(0, Ordering::Relaxed);
        let upstream_errors = self.upstream_errors.swap(0, Ordering::Relaxed);
        let total_us = self.total_response_time_us.swap(0, Ordering::Relaxed);

        let avg_response_ms = if requests > 0 {
            (total_us as f64 / requests as f64) / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            requests,
            forwarded,
            rejected,
            filter_errors,
            upstream_errors,
            avg_response_ms,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub requests: u64,
    pub forwarded: u64,
    pub rejected: u64,
    pub filter_errors: u64,
    pub upstream_errors: u64,
    pub avg_response_ms: f64,
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

/// Live counters for one worker, shared by all of its poll loops
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    jobs_processed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_released: AtomicU64,
    pop_errors: AtomicU64,
    failed_records_dropped: AtomicU64,
    busy_micros: AtomicU64,
    per_signature: DashMap<String, JobTypeMetrics>,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&self, signature: &str, took: Duration) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
        self.add_busy(took);
        self.per_signature
            .entry(signature.to_string())
            .or_default()
            .completed += 1;
    }

    pub fn record_failed(&self, signature: &str, took: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        self.add_busy(took);
        self.per_signature
            .entry(signature.to_string())
            .or_default()
            .failed += 1;
    }

    pub fn record_released(&self, signature: &str, took: Duration) {
        self.jobs_released.fetch_add(1, Ordering::Relaxed);
        self.add_busy(took);
        self.per_signature
            .entry(signature.to_string())
            .or_default()
            .released += 1;
    }

    pub fn record_pop_error(&self) {
        self.pop_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A failed job that could not be persisted
    pub fn record_failed_record_dropped(&self) {
        self.failed_records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn add_busy(&self, took: Duration) {
        let micros = u64::try_from(took.as_micros()).unwrap_or(u64::MAX);
        self.busy_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn jobs_released(&self) -> u64 {
        self.jobs_released.load(Ordering::Relaxed)
    }

    pub fn pop_errors(&self) -> u64 {
        self.pop_errors.load(Ordering::Relaxed)
    }

    pub fn failed_records_dropped(&self) -> u64 {
        self.failed_records_dropped.load(Ordering::Relaxed)
    }

    /// Counters for one job signature
    pub fn job_type_metrics(&self, signature: &str) -> Option<JobTypeMetrics> {
        self.per_signature.get(signature).map(|m| m.value().clone())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_processed: self.jobs_processed(),
            jobs_failed: self.jobs_failed(),
            jobs_released: self.jobs_released(),
            pop_errors: self.pop_errors(),
            failed_records_dropped: self.failed_records_dropped(),
            busy: Duration::from_micros(self.busy_micros.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time copy of [`WorkerMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    pub jobs_released: u64,
    pub pop_errors: u64,
    pub failed_records_dropped: u64,
    /// Total time spent inside job handlers
    pub busy: Duration,
}

/// Metrics for a specific job signature
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobTypeMetrics {
    pub completed: u64,
    pub failed: u64,
    pub released: u64,
}

impl JobTypeMetrics {
    /// Calculate success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            100.0
        } else {
            (self.completed as f64 / total as f64) * 100.0
        }
    }
}

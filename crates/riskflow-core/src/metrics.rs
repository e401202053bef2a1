//! Process-wide job and scaling counters.
//!
//! Counters are bumped silently where work happens; [`Metrics::flush`] emits
//! all of them as one `info!` event and is called on every controller tick.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_timed_out: u64,
    pub jobs_cancelled: u64,
    pub rows_scored: u64,
    pub rows_rejected: u64,
    pub scaling_applied: u64,
    pub scaling_failed: u64,
}

pub struct Metrics {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_timed_out: AtomicU64,
    jobs_cancelled: AtomicU64,
    rows_scored: AtomicU64,
    rows_rejected: AtomicU64,
    scaling_applied: AtomicU64,
    scaling_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_timed_out: AtomicU64::new(0),
            jobs_cancelled: AtomicU64::new(0),
            rows_scored: AtomicU64::new(0),
            rows_rejected: AtomicU64::new(0),
            scaling_applied: AtomicU64::new(0),
            scaling_failed: AtomicU64::new(0),
        }
    }

    /// A job finished with every row scored.
    pub fn inc_jobs_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts every failed job; timeouts are additionally counted separately.
    pub fn inc_jobs_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A job hit its processing limit.
    pub fn inc_jobs_timed_out(&self) {
        self.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Chunks pulled off the queue by a submission cancel.
    pub fn add_jobs_cancelled(&self, n: u64) {
        self.jobs_cancelled.fetch_add(n, Ordering::Relaxed);
    }

    /// Per-row outcomes of one finished job.
    pub fn add_rows(&self, scored: u64, rejected: u64) {
        self.rows_scored.fetch_add(scored, Ordering::Relaxed);
        self.rows_rejected.fetch_add(rejected, Ordering::Relaxed);
    }

    /// The scale target accepted a decision.
    pub fn inc_scaling_applied(&self) {
        self.scaling_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// The scale target rejected a decision.
    pub fn inc_scaling_failed(&self) {
        self.scaling_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_timed_out: self.jobs_timed_out.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            rows_scored: self.rows_scored.load(Ordering::Relaxed),
            rows_rejected: self.rows_rejected.load(Ordering::Relaxed),
            scaling_applied: self.scaling_applied.load(Ordering::Relaxed),
            scaling_failed: self.scaling_failed.load(Ordering::Relaxed),
        }
    }

    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            jobs_completed = s.jobs_completed,
            jobs_failed = s.jobs_failed,
            jobs_timed_out = s.jobs_timed_out,
            jobs_cancelled = s.jobs_cancelled,
            rows_scored = s.rows_scored,
            rows_rejected = s.rows_rejected,
            scaling_applied = s.scaling_applied,
            scaling_failed = s.scaling_failed,
        );
    }

    /// Zero all counters (tests).
    pub fn reset(&self) {
        for counter in [
            &self.jobs_completed,
            &self.jobs_failed,
            &self.jobs_timed_out,
            &self.jobs_cancelled,
            &self.rows_scored,
            &self.rows_rejected,
            &self.scaling_applied,
            &self.scaling_failed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

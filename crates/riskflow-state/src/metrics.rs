//! Point-in-time queue metrics consumed by the autoscaler.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::job::Lane;

/// Pending work in one lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneMetrics {
    pub lane: Lane,
    pub pending_jobs: usize,
    pub pending_rows: usize,
    pub oldest_submitted_at: Option<DateTime<Utc>>,
}

impl LaneMetrics {
    pub fn empty(lane: Lane) -> Self {
        Self {
            lane,
            pending_jobs: 0,
            pending_rows: 0,
            oldest_submitted_at: None,
        }
    }

    /// Age of the oldest queued job, if any.
    pub fn oldest_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.oldest_submitted_at.map(|at| now - at)
    }
}

/// Queue depth, age and worker counts captured in a single consistent read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    /// Highest priority first.
    pub lanes: [LaneMetrics; 3],
    pub running_jobs: usize,
    /// Worker instances in the pool.
    pub workers: usize,
    /// Executor tasks alive across all instances.
    pub live_executors: usize,
    /// Executors currently processing a job.
    pub busy_executors: usize,
}

impl QueueMetricsSnapshot {
    pub fn empty(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            lanes: Lane::ALL.map(LaneMetrics::empty),
            running_jobs: 0,
            workers: 0,
            live_executors: 0,
            busy_executors: 0,
        }
    }

    pub fn lane(&self, lane: Lane) -> &LaneMetrics {
        &self.lanes[lane.index()]
    }

    /// Total queued jobs across lanes.
    pub fn total_pending(&self) -> usize {
        self.lanes.iter().map(|l| l.pending_jobs).sum()
    }

    pub fn total_pending_rows(&self) -> usize {
        self.lanes.iter().map(|l| l.pending_rows).sum()
    }

    /// Rows queued in `lane` and every lane ahead of it.
    pub fn pending_rows_at_or_above(&self, lane: Lane) -> usize {
        self.lanes[..=lane.index()]
            .iter()
            .map(|l| l.pending_rows)
            .sum()
    }

    /// Age of the oldest queued job across all lanes.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.lanes
            .iter()
            .filter_map(|l| l.oldest_age(self.taken_at))
            .max()
    }

    /// Fill in the worker-side counts (the store only knows about jobs).
    pub fn with_workers(mut self, workers: usize, live: usize, busy: usize) -> Self {
        self.workers = workers;
        self.live_executors = live;
        self.busy_executors = busy;
        self
    }

    /// Busy share of live executors, 0.0 when none are alive.
    pub fn utilization(&self) -> f64 {
        if self.live_executors == 0 {
            0.0
        } else {
            self.busy_executors as f64 / self.live_executors as f64
        }
    }
}

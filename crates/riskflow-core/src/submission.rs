//! Submission service: split a batch into jobs, report status, cancel.

use std::sync::Arc;
use std::time::Duration;

use riskflow_inference::{FeatureVector, ModelFamily};
use riskflow_state::{Job, JobId, JobStatus, JobStore, Lane, RowReport, SubmissionId};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{QueueConfig, WorkerConfig};
use crate::error::{CoreError, CoreResult};
use crate::lanes::{LanePolicy, PriorityHint};
use crate::metrics::METRICS;
use crate::obs;
use crate::pool::ScaleTarget;
use crate::queue::PriorityQueue;

/// A batch of rows to score with one model family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub family: ModelFamily,
    #[serde(default)]
    pub priority: Option<PriorityHint>,
    pub rows: Vec<FeatureVector>,
}

/// Returned to the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub submission_id: SubmissionId,
    pub lane: Lane,
    pub chunks: usize,
    pub estimated_completion_minutes: u64,
    /// 1-based place of the first chunk in global dequeue order.
    pub queue_position: usize,
}

/// Aggregate status over a submission's chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SubmissionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Completed | SubmissionStatus::Failed | SubmissionStatus::Cancelled
        )
    }

    fn aggregate(statuses: &[JobStatus]) -> Self {
        let all = |s: JobStatus| statuses.iter().all(|x| *x == s);
        if all(JobStatus::Cancelled) {
            SubmissionStatus::Cancelled
        } else if all(JobStatus::Queued) {
            SubmissionStatus::Queued
        } else if statuses.iter().all(|s| s.is_terminal()) {
            if statuses.contains(&JobStatus::Failed) {
                SubmissionStatus::Failed
            } else {
                SubmissionStatus::Completed
            }
        } else {
            SubmissionStatus::Running
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubmissionStatus::Queued => "queued",
            SubmissionStatus::Running => "running",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Failed => "failed",
            SubmissionStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Status, progress and (once finished) results of a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub submission_id: SubmissionId,
    pub status: SubmissionStatus,
    pub rows_total: usize,
    pub rows_done: usize,
    /// `rows_done / rows_total`.
    pub progress: f64,
    /// Row and job failure lines, in chunk order.
    pub failures: Vec<String>,
    /// Every row outcome, present once all chunks have finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<RowReport>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    NotCancellable { status: SubmissionStatus },
}

/// Front door for batch scoring.
pub struct JobService {
    store: Arc<dyn JobStore>,
    queue: Arc<PriorityQueue>,
    workers: Arc<dyn ScaleTarget>,
    lanes: LanePolicy,
    queue_config: QueueConfig,
    concurrency: usize,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<PriorityQueue>,
        workers: Arc<dyn ScaleTarget>,
        queue_config: QueueConfig,
        worker_config: &WorkerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            workers,
            lanes: LanePolicy::from_config(&queue_config),
            queue_config,
            concurrency: worker_config.concurrency,
        }
    }

    /// Chunk, store and enqueue a batch.
    pub async fn submit(&self, submission: Submission) -> CoreResult<SubmissionReceipt> {
        let total = submission.rows.len();
        if total == 0 {
            return Err(CoreError::EmptySubmission);
        }
        if total > self.queue_config.max_rows_per_submission {
            return Err(CoreError::SubmissionTooLarge {
                rows: total,
                limit: self.queue_config.max_rows_per_submission,
            });
        }

        let lane = self.lanes.classify(submission.priority, total);
        let snapshot = self.store.snapshot_metrics().await?;
        let rows_ahead = snapshot.pending_rows_at_or_above(lane);
        let workers = self.workers.current_workers().await;
        let estimated_completion_minutes = self.estimate_minutes(rows_ahead + total, workers);

        let submission_id = SubmissionId::new();
        let mut ids: Vec<JobId> = Vec::new();
        let chunk_size = self.queue_config.chunk_size;
        for (index, chunk) in submission.rows.chunks(chunk_size).enumerate() {
            let job = Job::new(
                submission_id,
                index,
                index * chunk_size,
                lane,
                submission.family,
                chunk.to_vec(),
            );
            ids.push(self.store.create(job).await?);
        }

        let positions = match self.queue.enqueue_all(lane, &ids).await {
            Ok(positions) => positions,
            Err(e) => {
                if let Err(cancel) = self.store.cancel_submission(&submission_id).await {
                    warn!(submission_id = %submission_id, error = %cancel, "failed to withdraw rejected submission");
                }
                return Err(e.into());
            }
        };
        let queue_position = positions.first().copied().unwrap_or_default();

        obs::emit_submission_accepted(&submission_id, lane, total, ids.len(), queue_position);
        Ok(SubmissionReceipt {
            submission_id,
            lane,
            chunks: ids.len(),
            estimated_completion_minutes,
            queue_position,
        })
    }

    /// Minutes to clear `rows` with the current pool, at least one.
    pub fn estimate_minutes(&self, rows: usize, workers: usize) -> u64 {
        let per_minute = workers.max(1) * self.concurrency * self.queue_config.rows_per_minute_per_worker;
        rows.div_ceil(per_minute.max(1)).max(1) as u64
    }

    pub async fn status(&self, submission_id: &SubmissionId) -> CoreResult<StatusReport> {
        let jobs = self.store.submission_jobs(submission_id).await?;
        let statuses: Vec<JobStatus> = jobs.iter().map(|j| j.status).collect();
        let status = SubmissionStatus::aggregate(&statuses);

        let rows_total: usize = jobs.iter().map(Job::row_count).sum();
        let rows_done: usize = jobs.iter().map(|j| j.rows_done).sum();
        let progress = if rows_total == 0 {
            0.0
        } else {
            rows_done as f64 / rows_total as f64
        };

        let mut failures = Vec::new();
        for job in &jobs {
            match &job.failure {
                Some(failure) if failure.kind.is_job_level() => failures.push(format!(
                    "chunk {}: {}",
                    job.chunk_index,
                    failure.describe()
                )),
                _ => failures.extend(job.results.iter().filter_map(RowReport::failure_line)),
            }
        }

        let results = (status.is_terminal() && status != SubmissionStatus::Cancelled).then(|| {
            jobs.iter()
                .flat_map(|j| j.results.iter().cloned())
                .collect::<Vec<_>>()
        });

        Ok(StatusReport {
            submission_id: *submission_id,
            status,
            rows_total,
            rows_done,
            progress,
            failures,
            results,
        })
    }

    /// Cancel a submission if none of its chunks has started.
    pub async fn cancel(&self, submission_id: &SubmissionId) -> CoreResult<CancelOutcome> {
        if !self.store.cancel_submission(submission_id).await? {
            let report = self.status(submission_id).await?;
            return Ok(CancelOutcome::NotCancellable {
                status: report.status,
            });
        }

        let jobs = self.store.submission_jobs(submission_id).await?;
        let mut removed = 0u64;
        for job in &jobs {
            if self.queue.remove(&job.id).await {
                removed += 1;
            }
        }
        METRICS.add_jobs_cancelled(removed);
        obs::emit_submission_cancelled(submission_id, jobs.len());
        Ok(CancelOutcome::Cancelled)
    }

    /// Poll until the submission reaches a terminal status or `limit` passes.
    /// A `limit` past the clock's range waits for the terminal status.
    pub async fn wait(
        &self,
        submission_id: &SubmissionId,
        poll: Duration,
        limit: Duration,
    ) -> CoreResult<StatusReport> {
        let deadline = tokio::time::Instant::now().checked_add(limit);
        loop {
            let report = self.status(submission_id).await?;
            let expired = deadline.is_some_and(|d| tokio::time::Instant::now() >= d);
            if report.status.is_terminal() || expired {
                return Ok(report);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

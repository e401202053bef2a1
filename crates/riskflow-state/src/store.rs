//! Job store trait.
//!
//! The store is the single source of truth for job lifecycle and results.
//! Executors, the submission service and the autoscaler all go through it,
//! so every transition is checked here rather than by callers.
//!
//! Guarantees:
//! - Terminal statuses (`Completed`, `Failed`, `Cancelled`) are final.
//! - `claim` is the only way into `Running` and succeeds at most once per job.
//! - `cancel` only affects jobs that are still `Queued`.
//! - `snapshot_metrics` reads all lanes under one lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::job::{Job, JobFailure, JobId, RowReport, SubmissionId};
use crate::metrics::QueueMetricsSnapshot;

/// Persistent record of jobs and their results.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `Queued` job.
    async fn create(&self, job: Job) -> StoreResult<JobId>;

    /// Move a `Queued` job to `Running`.
    ///
    /// Returns `false` without error if the job is no longer queued (it was
    /// cancelled between dequeue and claim).
    async fn claim(&self, job_id: &JobId) -> StoreResult<bool>;

    /// Record how many rows a running job has processed.
    async fn report_progress(&self, job_id: &JobId, rows_done: usize) -> StoreResult<()>;

    /// `Running → Completed` with every row scored.
    async fn complete(&self, job_id: &JobId, results: Vec<RowReport>) -> StoreResult<()>;

    /// `Running → Failed`, keeping whatever rows were processed.
    async fn fail(
        &self,
        job_id: &JobId,
        failure: JobFailure,
        results: Vec<RowReport>,
    ) -> StoreResult<()>;

    /// `Queued → Cancelled`. Returns `false` if the job had already started.
    async fn cancel(&self, job_id: &JobId) -> StoreResult<bool>;

    /// Cancel every chunk of a submission, all or nothing.
    ///
    /// Returns `false` (and changes nothing) if any chunk has left `Queued`
    /// for anything other than `Cancelled`.
    async fn cancel_submission(&self, submission_id: &SubmissionId) -> StoreResult<bool>;

    /// Fetch one job.
    async fn get(&self, job_id: &JobId) -> StoreResult<Job>;

    /// All chunks of a submission, ordered by chunk index.
    async fn submission_jobs(&self, submission_id: &SubmissionId) -> StoreResult<Vec<Job>>;

    /// Queue depth and age per lane plus running count.
    async fn snapshot_metrics(&self) -> StoreResult<QueueMetricsSnapshot>;

    /// Drop whole submissions whose chunks are all terminal and whose last
    /// chunk finished before `before`. Returns how many jobs were removed.
    async fn purge_terminal(&self, before: DateTime<Utc>) -> StoreResult<usize>;
}

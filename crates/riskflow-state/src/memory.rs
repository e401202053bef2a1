//! In-memory job store.
//!
//! Keeps per-lane queued indexes and row counters up to date on every
//! transition so `snapshot_metrics` never has to scan the job table.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::job::{Job, JobFailure, JobId, JobStatus, Lane, RowReport, SubmissionId};
use crate::metrics::QueueMetricsSnapshot;
use crate::store::JobStore;

#[derive(Debug, Default)]
struct LaneIndex {
    /// Queued jobs ordered by submission time.
    queued: BTreeSet<(DateTime<Utc>, JobId)>,
    rows: usize,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    submissions: HashMap<SubmissionId, Vec<JobId>>,
    lanes: [LaneIndex; 3],
    running: usize,
}

impl Inner {
    fn job_mut(&mut self, job_id: &JobId) -> StoreResult<&mut Job> {
        self.jobs
            .get_mut(job_id)
            .ok_or(StoreError::JobNotFound(*job_id))
    }

    fn unindex(&mut self, lane: Lane, submitted_at: DateTime<Utc>, job_id: JobId, rows: usize) {
        let index = &mut self.lanes[lane.index()];
        if index.queued.remove(&(submitted_at, job_id)) {
            index.rows = index.rows.saturating_sub(rows);
        }
    }

    /// Leave `Queued` for `to`, keeping the lane index in step.
    fn leave_queue(&mut self, job_id: &JobId, to: JobStatus) -> StoreResult<()> {
        let job = self.job_mut(job_id)?;
        if job.status != JobStatus::Queued {
            return Err(StoreError::InvalidTransition {
                job_id: *job_id,
                from: job.status,
                to,
            });
        }
        let now = Utc::now();
        job.status = to;
        match to {
            JobStatus::Running => job.started_at = Some(now),
            _ => job.finished_at = Some(now),
        }
        let (lane, submitted_at, rows) = (job.lane, job.submitted_at, job.rows.len());
        self.unindex(lane, submitted_at, *job_id, rows);
        if to == JobStatus::Running {
            self.running += 1;
        }
        Ok(())
    }

    /// Leave `Running` for a terminal status with the given results.
    fn finish(
        &mut self,
        job_id: &JobId,
        to: JobStatus,
        results: Vec<RowReport>,
        failure: Option<JobFailure>,
    ) -> StoreResult<()> {
        let job = self.job_mut(job_id)?;
        if job.status != JobStatus::Running {
            return Err(StoreError::InvalidTransition {
                job_id: *job_id,
                from: job.status,
                to,
            });
        }
        job.status = to;
        job.finished_at = Some(Utc::now());
        job.rows_done = results.len();
        job.results = results;
        job.failure = failure;
        self.running = self.running.saturating_sub(1);
        Ok(())
    }
}

/// In-memory [`JobStore`] backed by a `HashMap<JobId, Job>`.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs currently held, terminal ones included.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: Job) -> StoreResult<JobId> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::DuplicateJob(job.id));
        }
        if job.status != JobStatus::Queued {
            return Err(StoreError::InvalidTransition {
                job_id: job.id,
                from: job.status,
                to: JobStatus::Queued,
            });
        }

        let id = job.id;
        let index = &mut inner.lanes[job.lane.index()];
        index.queued.insert((job.submitted_at, id));
        index.rows += job.rows.len();
        inner
            .submissions
            .entry(job.submission_id)
            .or_default()
            .push(id);
        debug!(job_id = %id, lane = %job.lane, rows = job.rows.len(), "job created");
        inner.jobs.insert(id, job);
        Ok(id)
    }

    async fn claim(&self, job_id: &JobId) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.leave_queue(job_id, JobStatus::Running) {
            Ok(()) => Ok(true),
            Err(StoreError::InvalidTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn report_progress(&self, job_id: &JobId, rows_done: usize) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.job_mut(job_id)?;
        if job.status != JobStatus::Running {
            return Err(StoreError::InvalidTransition {
                job_id: *job_id,
                from: job.status,
                to: JobStatus::Running,
            });
        }
        job.rows_done = rows_done.min(job.rows.len());
        Ok(())
    }

    async fn complete(&self, job_id: &JobId, results: Vec<RowReport>) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.finish(job_id, JobStatus::Completed, results, None)
    }

    async fn fail(
        &self,
        job_id: &JobId,
        failure: JobFailure,
        results: Vec<RowReport>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.finish(job_id, JobStatus::Failed, results, Some(failure))
    }

    async fn cancel(&self, job_id: &JobId) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.leave_queue(job_id, JobStatus::Cancelled) {
            Ok(()) => Ok(true),
            Err(StoreError::InvalidTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn cancel_submission(&self, submission_id: &SubmissionId) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let ids = inner
            .submissions
            .get(submission_id)
            .cloned()
            .ok_or(StoreError::SubmissionNotFound(*submission_id))?;

        let started = ids.iter().any(|id| {
            inner.jobs.get(id).is_some_and(|job| {
                !matches!(job.status, JobStatus::Queued | JobStatus::Cancelled)
            })
        });
        if started {
            return Ok(false);
        }

        for id in &ids {
            let queued = inner
                .jobs
                .get(id)
                .is_some_and(|job| job.status == JobStatus::Queued);
            if queued {
                inner.leave_queue(id, JobStatus::Cancelled)?;
            }
        }
        debug!(submission_id = %submission_id, chunks = ids.len(), "submission cancelled");
        Ok(true)
    }

    async fn get(&self, job_id: &JobId) -> StoreResult<Job> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .get(job_id)
            .cloned()
            .ok_or(StoreError::JobNotFound(*job_id))
    }

    async fn submission_jobs(&self, submission_id: &SubmissionId) -> StoreResult<Vec<Job>> {
        let inner = self.inner.lock().await;
        let ids = inner
            .submissions
            .get(submission_id)
            .ok_or(StoreError::SubmissionNotFound(*submission_id))?;
        let mut jobs: Vec<Job> = ids
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect();
        jobs.sort_by_key(|job| job.chunk_index);
        Ok(jobs)
    }

    async fn snapshot_metrics(&self) -> StoreResult<QueueMetricsSnapshot> {
        let inner = self.inner.lock().await;
        let mut snapshot = QueueMetricsSnapshot::empty(Utc::now());
        for lane in Lane::ALL {
            let index = &inner.lanes[lane.index()];
            let metrics = &mut snapshot.lanes[lane.index()];
            metrics.pending_jobs = index.queued.len();
            metrics.pending_rows = index.rows;
            metrics.oldest_submitted_at = index.queued.first().map(|(at, _)| *at);
        }
        snapshot.running_jobs = inner.running;
        Ok(snapshot)
    }

    async fn purge_terminal(&self, before: DateTime<Utc>) -> StoreResult<usize> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        // A submission goes as a whole, once its last chunk finished before the cutoff.
        let expired: Vec<SubmissionId> = inner
            .submissions
            .iter()
            .filter(|(_, chunks)| {
                let mut latest: Option<DateTime<Utc>> = None;
                for id in chunks.iter() {
                    match inner.jobs.get(id) {
                        Some(job) if job.status.is_terminal() => {
                            latest = latest.max(job.finished_at);
                        }
                        Some(_) => return false,
                        None => {}
                    }
                }
                latest.is_some_and(|at| at < before)
            })
            .map(|(submission_id, _)| *submission_id)
            .collect();

        let mut purged = 0;
        for submission_id in &expired {
            if let Some(chunks) = inner.submissions.remove(submission_id) {
                for id in chunks {
                    if inner.jobs.remove(&id).is_some() {
                        purged += 1;
                    }
                }
            }
        }
        if purged > 0 {
            debug!(purged, submissions = expired.len(), "terminal submissions purged");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskflow_inference::{fixtures, ModelFamily};

    fn job(lane: Lane, rows: usize) -> Job {
        Job::single(
            lane,
            ModelFamily::Annual,
            vec![fixtures::healthy_annual_row(); rows],
        )
    }

    #[tokio::test]
    async fn counters_follow_transitions() {
        let store = MemoryJobStore::new();
        let a = store.create(job(Lane::Low, 3)).await.unwrap();
        let b = store.create(job(Lane::Low, 2)).await.unwrap();

        let snap = store.snapshot_metrics().await.unwrap();
        assert_eq!(snap.lane(Lane::Low).pending_jobs, 2);
        assert_eq!(snap.lane(Lane::Low).pending_rows, 5);

        assert!(store.claim(&a).await.unwrap());
        let snap = store.snapshot_metrics().await.unwrap();
        assert_eq!(snap.lane(Lane::Low).pending_rows, 2);
        assert_eq!(snap.running_jobs, 1);

        assert!(store.cancel(&b).await.unwrap());
        store.complete(&a, Vec::new()).await.unwrap();
        let snap = store.snapshot_metrics().await.unwrap();
        assert_eq!(snap.total_pending(), 0);
        assert_eq!(snap.running_jobs, 0);
    }

    #[tokio::test]
    async fn oldest_queued_tracks_submission_time() {
        let store = MemoryJobStore::new();
        let mut old = job(Lane::Medium, 1);
        old.submitted_at = Utc::now() - chrono::Duration::seconds(120);
        let old_id = store.create(old.clone()).await.unwrap();
        store.create(job(Lane::Medium, 1)).await.unwrap();

        let snap = store.snapshot_metrics().await.unwrap();
        assert_eq!(
            snap.lane(Lane::Medium).oldest_submitted_at,
            Some(old.submitted_at)
        );

        store.claim(&old_id).await.unwrap();
        let snap = store.snapshot_metrics().await.unwrap();
        assert!(snap.lane(Lane::Medium).oldest_submitted_at.unwrap() > old.submitted_at);
    }
}

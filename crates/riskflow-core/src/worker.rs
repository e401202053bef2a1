//! Executor loop: dequeue, claim, score every row, record the outcome.
//!
//! Row-level `InvalidFeature` errors are recorded against the row and the
//! remaining rows still run. Any other inference error aborts the job and
//! retires the executor. The per-job deadline is checked between rows, so
//! partial results survive a timeout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use riskflow_inference::{InferenceError, Scorer};
use riskflow_state::{
    FailureKind, Job, JobFailure, JobId, JobStatus, JobStore, RowReport,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::WorkerConfig;
use crate::metrics::METRICS;
use crate::obs::{self, JobSpan};
use crate::queue::{PriorityQueue, QueueEntry};

/// Rows scored between progress reports.
const PROGRESS_EVERY: usize = 50;

/// Rejected rows listed by name in a job failure message.
const MAX_LISTED_FAILURES: usize = 10;

/// Liveness signal published by an executor and sampled by the pool.
#[derive(Debug)]
pub struct Heartbeat {
    origin: Instant,
    last_beat_ms: AtomicU64,
    busy: AtomicBool,
    jobs_processed: AtomicU64,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_beat_ms: AtomicU64::new(0),
            busy: AtomicBool::new(false),
            jobs_processed: AtomicU64::new(0),
        }
    }

    pub fn beat(&self) {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.last_beat_ms.store(elapsed, Ordering::Relaxed);
    }

    fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::Relaxed);
        self.beat();
    }

    fn job_done(&self) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
        self.set_busy(false);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }

    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    /// Time since the last beat.
    pub fn age(&self) -> Duration {
        let last = Duration::from_millis(self.last_beat_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

/// Shared dependencies of every executor.
#[derive(Clone)]
pub struct ExecutorContext {
    pub queue: Arc<PriorityQueue>,
    pub store: Arc<dyn JobStore>,
    pub scorer: Arc<dyn Scorer>,
    pub config: WorkerConfig,
}

/// Why an executor stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorExit {
    /// Asked to drain; any job in hand was finished first.
    Drained,
    /// The queue was closed and empty.
    QueueClosed,
    /// A fatal inference error; the pool replaces the executor.
    Retired { reason: String },
}

enum BatchStep {
    Done,
    TimedOut,
    Fatal(InferenceError),
}

enum Verdict {
    Completed,
    Failed(JobFailure),
    Retire(JobFailure),
}

/// A single executor task.
pub struct Executor {
    name: String,
    ctx: ExecutorContext,
    heartbeat: Arc<Heartbeat>,
    drain: watch::Receiver<bool>,
}

impl Executor {
    pub fn new(
        name: impl Into<String>,
        ctx: ExecutorContext,
        heartbeat: Arc<Heartbeat>,
        drain: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name: name.into(),
            ctx,
            heartbeat,
            drain,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(mut self) -> ExecutorExit {
        debug!(executor = %self.name, "executor started");
        loop {
            if *self.drain.borrow() {
                debug!(executor = %self.name, "executor drained");
                return ExecutorExit::Drained;
            }
            self.heartbeat.beat();

            let wait = self.ctx.config.dequeue_timeout();
            let dequeued = tokio::select! {
                biased;
                changed = self.drain.changed() => {
                    if changed.is_err() {
                        return ExecutorExit::Drained;
                    }
                    continue;
                }
                res = self.ctx.queue.dequeue(wait) => res,
            };

            let entry = match dequeued {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(_) => return ExecutorExit::QueueClosed,
            };

            if let Some(reason) = self.execute(entry).await {
                obs::emit_executor_retired(&self.name, &reason);
                return ExecutorExit::Retired { reason };
            }
        }
    }

    /// Run one dequeued job. Returns a reason when the executor must retire.
    async fn execute(&self, entry: QueueEntry) -> Option<String> {
        let store = &self.ctx.store;
        match store.claim(&entry.job_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %entry.job_id, "job no longer queued, skipping");
                return None;
            }
            Err(e) => {
                warn!(job_id = %entry.job_id, error = %e, "claim failed");
                return None;
            }
        }
        let job = match store.get(&entry.job_id).await {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %entry.job_id, error = %e, "claimed job vanished");
                return None;
            }
        };

        self.heartbeat.set_busy(true);
        obs::emit_job_started(&job.id, job.lane, job.rows.len());
        let started = Instant::now();

        let (results, verdict) = self.run_job(&job, started).await;
        let scored = results.iter().filter(|r| r.is_scored()).count();
        let rejected = results.len() - scored;
        METRICS.add_rows(scored as u64, rejected as u64);

        let (status, retire) = match verdict {
            Verdict::Completed => {
                self.finish(&job.id, store.complete(&job.id, results).await);
                METRICS.inc_jobs_completed();
                (JobStatus::Completed, None)
            }
            Verdict::Failed(failure) => {
                if failure.kind == FailureKind::Timeout {
                    METRICS.inc_jobs_timed_out();
                }
                self.finish(&job.id, store.fail(&job.id, failure, results).await);
                METRICS.inc_jobs_failed();
                (JobStatus::Failed, None)
            }
            Verdict::Retire(failure) => {
                let reason = failure.message.clone();
                self.finish(&job.id, store.fail(&job.id, failure, results).await);
                METRICS.inc_jobs_failed();
                (JobStatus::Failed, Some(reason))
            }
        };

        self.heartbeat.job_done();
        obs::emit_job_finished(
            &job.id,
            status,
            scored,
            rejected,
            started.elapsed().as_millis() as u64,
        );
        retire
    }

    fn finish(&self, job_id: &JobId, stored: riskflow_state::StoreResult<()>) {
        if let Err(e) = stored {
            warn!(job_id = %job_id, executor = %self.name, error = %e, "failed to record job outcome");
        }
    }

    async fn run_job(&self, job: &Job, started: Instant) -> (Vec<RowReport>, Verdict) {
        let timeout = self.ctx.config.job_timeout();
        // Out of the clock's range means no limit.
        let deadline = started.checked_add(timeout);
        let mut results = Vec::with_capacity(job.rows.len());

        for batch in 0..job.rows.len().div_ceil(PROGRESS_EVERY) {
            let step = {
                let _span = JobSpan::enter(&job.id, &self.name);
                self.score_batch(job, batch * PROGRESS_EVERY, deadline, &mut results)
            };

            match step {
                BatchStep::Done => {}
                BatchStep::TimedOut => {
                    let failure = JobFailure::new(
                        FailureKind::Timeout,
                        format!(
                            "exceeded {}s processing limit after {} of {} rows",
                            timeout.as_secs(),
                            results.len(),
                            job.rows.len()
                        ),
                    );
                    return (results, Verdict::Failed(failure));
                }
                BatchStep::Fatal(err) => {
                    let row = job.row_offset + results.len();
                    obs::emit_artifact_mismatch(&job.id, &self.name, &err);
                    let failure = JobFailure::new(
                        FailureKind::ArtifactMismatch,
                        format!("row {row}: {err}"),
                    );
                    return (results, Verdict::Retire(failure));
                }
            }

            if let Err(e) = self.ctx.store.report_progress(&job.id, results.len()).await {
                debug!(job_id = %job.id, error = %e, "progress report rejected");
            }
            self.heartbeat.beat();
            tokio::task::yield_now().await;
        }

        let failures: Vec<String> = results.iter().filter_map(RowReport::failure_line).collect();
        if failures.is_empty() {
            (results, Verdict::Completed)
        } else {
            let failure = JobFailure::new(FailureKind::InvalidRows, summarize(&failures));
            (results, Verdict::Failed(failure))
        }
    }

    fn score_batch(
        &self,
        job: &Job,
        from: usize,
        deadline: Option<Instant>,
        results: &mut Vec<RowReport>,
    ) -> BatchStep {
        let to = (from + PROGRESS_EVERY).min(job.rows.len());
        for (i, row) in job.rows[from..to].iter().enumerate() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return BatchStep::TimedOut;
            }
            let index = job.row_offset + from + i;
            match self.ctx.scorer.score(job.family, row) {
                Ok(prediction) => results.push(RowReport::scored(index, prediction)),
                Err(err) if !err.is_fatal() => {
                    debug!(row = index, error = %err, "row rejected");
                    results.push(RowReport::rejected(index, err.to_string()));
                }
                Err(err) => return BatchStep::Fatal(err),
            }
        }
        BatchStep::Done
    }
}

fn summarize(failures: &[String]) -> String {
    let mut message = failures
        .iter()
        .take(MAX_LISTED_FAILURES)
        .cloned()
        .collect::<Vec<_>>()
        .join("; ");
    if failures.len() > MAX_LISTED_FAILURES {
        message.push_str(&format!(
            "; and {} more rows failed",
            failures.len() - MAX_LISTED_FAILURES
        ));
    }
    message
}

//! Structured lifecycle events for submissions, jobs and scaling.
//!
//! Every event carries an `event` field so log pipelines can filter on it.
//! Artifact mismatches are logged at `error!` with `alert = true`.

use riskflow_state::{JobId, JobStatus, Lane, SubmissionId};
use tracing::{error, info, warn};

use crate::autoscaler::ScalingDecision;

/// RAII guard scoping executor logs to one job.
pub struct JobSpan {
    _span: tracing::span::EnteredSpan,
}

impl JobSpan {
    pub fn enter(job_id: &JobId, executor: &str) -> Self {
        let span = tracing::info_span!("riskflow.job", job_id = %job_id, executor = %executor);
        Self {
            _span: span.entered(),
        }
    }
}

/// A submission was chunked and every chunk enqueued.
pub fn emit_submission_accepted(
    submission_id: &SubmissionId,
    lane: Lane,
    rows: usize,
    chunks: usize,
    queue_position: usize,
) {
    info!(
        event = "submission.accepted",
        submission_id = %submission_id,
        lane = %lane,
        rows = rows,
        chunks = chunks,
        queue_position = queue_position,
    );
}

/// A queued submission was withdrawn; `chunks` counts every job it owned.
pub fn emit_submission_cancelled(submission_id: &SubmissionId, chunks: usize) {
    info!(event = "submission.cancelled", submission_id = %submission_id, chunks = chunks);
}

/// An executor claimed a job and began scoring it.
pub fn emit_job_started(job_id: &JobId, lane: Lane, rows: usize) {
    info!(event = "job.started", job_id = %job_id, lane = %lane, rows = rows);
}

/// Terminal outcome of one job, with row counts and wall time.
pub fn emit_job_finished(
    job_id: &JobId,
    status: JobStatus,
    rows_scored: usize,
    rows_rejected: usize,
    duration_ms: u64,
) {
    info!(
        event = "job.finished",
        job_id = %job_id,
        status = %status,
        rows_scored = rows_scored,
        rows_rejected = rows_rejected,
        duration_ms = duration_ms,
    );
}

/// The artifact could not score a row at all. Pages on-call via `alert`.
pub fn emit_artifact_mismatch(job_id: &JobId, executor: &str, error: &dyn std::fmt::Display) {
    error!(
        event = "artifact.mismatch",
        alert = true,
        job_id = %job_id,
        executor = %executor,
        error = %error,
    );
}

/// An executor stopped taking jobs after a fatal error.
pub fn emit_executor_retired(executor: &str, reason: &str) {
    warn!(event = "executor.retired", executor = %executor, reason = %reason);
}

/// Heartbeat older than `heartbeat_stale_secs` on a live executor.
pub fn emit_executor_stale(executor: &str, age_ms: u64) {
    warn!(event = "executor.stale", executor = %executor, heartbeat_age_ms = age_ms);
}

/// Outcome of one controller tick, noops included.
pub fn emit_scaling_decision(decision: &ScalingDecision) {
    info!(
        event = "scaling.decision",
        action = %decision.action,
        from = decision.from,
        to = decision.to,
        pending = decision.snapshot.total_pending(),
        reason = %decision.reason,
    );
}

/// The scale target refused a decision; the cooldown was not committed.
pub fn emit_scaling_apply_failed(decision: &ScalingDecision, error: &dyn std::fmt::Display) {
    warn!(
        event = "scaling.apply_failed",
        action = %decision.action,
        from = decision.from,
        to = decision.to,
        error = %error,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_span_enters() {
        let _span = JobSpan::enter(&JobId::new(), "w1-e0");
    }

    #[test]
    fn every_event_formats_under_a_subscriber() {
        use crate::autoscaler::{decide, ScalerState};
        use crate::config::ScalingConfig;
        use riskflow_state::QueueMetricsSnapshot;

        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let submission = SubmissionId::new();
            let job = JobId::new();
            emit_submission_accepted(&submission, Lane::Medium, 1200, 3, 1);
            emit_submission_cancelled(&submission, 3);
            emit_job_started(&job, Lane::Medium, 500);
            emit_job_finished(&job, JobStatus::Completed, 499, 1, 42);
            emit_artifact_mismatch(&job, "w1-e0", &"unexpected key ebitda");
            emit_executor_retired("w1-e0", "artifact mismatch");
            emit_executor_stale("w1-e1", 31_000);

            let snapshot = QueueMetricsSnapshot::empty(chrono::Utc::now());
            let decision = decide(&ScalingConfig::default(), ScalerState::Stable, 0, &snapshot, &[]);
            emit_scaling_decision(&decision);
            emit_scaling_apply_failed(&decision, &"target unavailable");
        });
    }
}

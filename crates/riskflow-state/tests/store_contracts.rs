//! Job store contract tests.
//!
//! Any conforming `JobStore` must pass these; they run against the
//! in-memory implementation.

use std::sync::Arc;

use chrono::{Duration, Utc};
use riskflow_inference::{fixtures, ModelFamily};
use riskflow_state::{
    FailureKind, Job, JobFailure, JobStatus, JobStore, Lane, MemoryJobStore, RowReport,
    StoreError, SubmissionId,
};
use tokio::task::JoinSet;

fn rows(n: usize) -> Vec<riskflow_inference::FeatureVector> {
    vec![fixtures::healthy_annual_row(); n]
}

fn chunked(submission: SubmissionId, chunks: usize) -> Vec<Job> {
    (0..chunks)
        .map(|i| Job::new(submission, i, i * 2, Lane::Low, ModelFamily::Annual, rows(2)))
        .collect()
}

#[tokio::test]
async fn lifecycle_queued_running_completed() {
    let store = MemoryJobStore::new();
    let id = store
        .create(Job::single(Lane::High, ModelFamily::Annual, rows(2)))
        .await
        .unwrap();
    assert_eq!(store.get(&id).await.unwrap().status, JobStatus::Queued);

    assert!(store.claim(&id).await.unwrap());
    let job = store.get(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.started_at.is_some());

    store.report_progress(&id, 1).await.unwrap();
    assert_eq!(store.get(&id).await.unwrap().rows_done, 1);

    let results = vec![RowReport::rejected(0, "x"), RowReport::rejected(1, "y")];
    store.complete(&id, results.clone()).await.unwrap();
    let job = store.get(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.results, results);
    assert_eq!(job.rows_done, 2);
    assert!(job.finished_at.is_some());
}

#[tokio::test]
async fn claim_succeeds_at_most_once() {
    let store = MemoryJobStore::new();
    let id = store
        .create(Job::single(Lane::Low, ModelFamily::Annual, rows(1)))
        .await
        .unwrap();
    assert!(store.claim(&id).await.unwrap());
    assert!(!store.claim(&id).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_claims_have_one_winner() {
    let store = Arc::new(MemoryJobStore::new());
    let id = store
        .create(Job::single(Lane::Medium, ModelFamily::Annual, rows(1)))
        .await
        .unwrap();

    let mut claims = JoinSet::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        claims.spawn(async move { store.claim(&id).await.unwrap() });
    }
    let mut winners = 0;
    while let Some(won) = claims.join_next().await {
        if won.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let snapshot = store.snapshot_metrics().await.unwrap();
    assert_eq!(snapshot.running_jobs, 1);
    assert_eq!(snapshot.total_pending(), 0);
}

#[tokio::test]
async fn terminal_states_are_final() {
    let store = MemoryJobStore::new();
    let id = store
        .create(Job::single(Lane::Low, ModelFamily::Annual, rows(1)))
        .await
        .unwrap();
    store.claim(&id).await.unwrap();
    store
        .fail(
            &id,
            JobFailure::new(FailureKind::Timeout, "too slow"),
            Vec::new(),
        )
        .await
        .unwrap();

    let err = store.complete(&id, Vec::new()).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::InvalidTransition {
            from: JobStatus::Failed,
            to: JobStatus::Completed,
            ..
        }
    ));
    assert!(!store.cancel(&id).await.unwrap());
    assert!(!store.claim(&id).await.unwrap());
    assert_eq!(store.get(&id).await.unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn failed_job_keeps_partial_results() {
    let store = MemoryJobStore::new();
    let id = store
        .create(Job::single(Lane::Low, ModelFamily::Annual, rows(5)))
        .await
        .unwrap();
    store.claim(&id).await.unwrap();
    let partial = vec![RowReport::rejected(0, "a"), RowReport::rejected(1, "b")];
    store
        .fail(
            &id,
            JobFailure::new(FailureKind::Timeout, "exceeded 600s"),
            partial.clone(),
        )
        .await
        .unwrap();

    let job = store.get(&id).await.unwrap();
    assert_eq!(job.results, partial);
    assert_eq!(job.rows_done, 2);
    assert_eq!(job.failure.unwrap().kind, FailureKind::Timeout);
}

#[tokio::test]
async fn cancel_only_affects_queued_jobs() {
    let store = MemoryJobStore::new();
    let queued = store
        .create(Job::single(Lane::Medium, ModelFamily::Annual, rows(1)))
        .await
        .unwrap();
    let running = store
        .create(Job::single(Lane::Medium, ModelFamily::Annual, rows(1)))
        .await
        .unwrap();
    store.claim(&running).await.unwrap();

    assert!(store.cancel(&queued).await.unwrap());
    assert!(!store.cancel(&running).await.unwrap());
    assert_eq!(store.get(&queued).await.unwrap().status, JobStatus::Cancelled);
    assert_eq!(store.get(&running).await.unwrap().status, JobStatus::Running);

    // A cancelled job can no longer be claimed.
    assert!(!store.claim(&queued).await.unwrap());
}

#[tokio::test]
async fn submission_cancel_is_all_or_nothing() {
    let store = MemoryJobStore::new();
    let submission = SubmissionId::new();
    let jobs = chunked(submission, 3);
    let first = jobs[0].id;
    for job in jobs {
        store.create(job).await.unwrap();
    }

    store.claim(&first).await.unwrap();
    assert!(!store.cancel_submission(&submission).await.unwrap());
    let statuses: Vec<_> = store
        .submission_jobs(&submission)
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.status)
        .collect();
    assert_eq!(
        statuses,
        vec![JobStatus::Running, JobStatus::Queued, JobStatus::Queued]
    );
}

#[tokio::test]
async fn submission_cancel_cancels_every_queued_chunk() {
    let store = MemoryJobStore::new();
    let submission = SubmissionId::new();
    for job in chunked(submission, 3) {
        store.create(job).await.unwrap();
    }

    assert!(store.cancel_submission(&submission).await.unwrap());
    let jobs = store.submission_jobs(&submission).await.unwrap();
    assert!(jobs.iter().all(|j| j.status == JobStatus::Cancelled));
    assert_eq!(store.snapshot_metrics().await.unwrap().total_pending(), 0);

    // Repeating the cancel is harmless.
    assert!(store.cancel_submission(&submission).await.unwrap());
}

#[tokio::test]
async fn submission_jobs_are_ordered_by_chunk() {
    let store = MemoryJobStore::new();
    let submission = SubmissionId::new();
    let mut jobs = chunked(submission, 4);
    jobs.reverse();
    for job in jobs {
        store.create(job).await.unwrap();
    }
    let indexes: Vec<_> = store
        .submission_jobs(&submission)
        .await
        .unwrap()
        .iter()
        .map(|j| j.chunk_index)
        .collect();
    assert_eq!(indexes, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn unknown_ids_are_reported() {
    let store = MemoryJobStore::new();
    let job = Job::single(Lane::Low, ModelFamily::Annual, rows(1));
    assert_eq!(
        store.get(&job.id).await.unwrap_err(),
        StoreError::JobNotFound(job.id)
    );
    let submission = SubmissionId::new();
    assert_eq!(
        store.cancel_submission(&submission).await.unwrap_err(),
        StoreError::SubmissionNotFound(submission)
    );
}

#[tokio::test]
async fn duplicate_create_is_rejected() {
    let store = MemoryJobStore::new();
    let job = Job::single(Lane::Low, ModelFamily::Annual, rows(1));
    store.create(job.clone()).await.unwrap();
    assert_eq!(
        store.create(job.clone()).await.unwrap_err(),
        StoreError::DuplicateJob(job.id)
    );
}

#[tokio::test]
async fn metrics_split_by_lane() {
    let store = MemoryJobStore::new();
    store
        .create(Job::single(Lane::High, ModelFamily::Annual, rows(1)))
        .await
        .unwrap();
    for _ in 0..3 {
        store
            .create(Job::single(Lane::Low, ModelFamily::Annual, rows(10)))
            .await
            .unwrap();
    }

    let snap = store.snapshot_metrics().await.unwrap();
    assert_eq!(snap.lane(Lane::High).pending_jobs, 1);
    assert_eq!(snap.lane(Lane::Medium).pending_jobs, 0);
    assert_eq!(snap.lane(Lane::Low).pending_jobs, 3);
    assert_eq!(snap.lane(Lane::Low).pending_rows, 30);
    assert_eq!(snap.total_pending(), 4);
}

#[tokio::test]
async fn purge_drops_only_old_terminal_jobs() {
    let store = MemoryJobStore::new();
    let done = store
        .create(Job::single(Lane::Low, ModelFamily::Annual, rows(1)))
        .await
        .unwrap();
    let waiting = store
        .create(Job::single(Lane::Low, ModelFamily::Annual, rows(1)))
        .await
        .unwrap();
    store.claim(&done).await.unwrap();
    store.complete(&done, Vec::new()).await.unwrap();

    assert_eq!(
        store
            .purge_terminal(Utc::now() - Duration::hours(1))
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        store
            .purge_terminal(Utc::now() + Duration::seconds(1))
            .await
            .unwrap(),
        1
    );
    assert!(store.get(&done).await.is_err());
    assert!(store.get(&waiting).await.is_ok());
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn purge_keeps_a_submission_until_every_chunk_is_terminal() {
    let store = MemoryJobStore::new();
    let submission = SubmissionId::new();
    let mut ids = Vec::new();
    for job in chunked(submission, 2) {
        ids.push(store.create(job).await.unwrap());
    }
    store.claim(&ids[0]).await.unwrap();
    store
        .complete(&ids[0], vec![RowReport::rejected(0, "x"), RowReport::rejected(1, "y")])
        .await
        .unwrap();

    // Chunk 1 is still queued: nothing of this submission may go.
    let later = Utc::now() + Duration::seconds(1);
    assert_eq!(store.purge_terminal(later).await.unwrap(), 0);
    let jobs = store.submission_jobs(&submission).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs.iter().map(Job::row_count).sum::<usize>(), 4);

    store.claim(&ids[1]).await.unwrap();
    let failure = JobFailure::new(FailureKind::Timeout, "exceeded 1s processing limit");
    store.fail(&ids[1], failure, Vec::new()).await.unwrap();

    // The cutoff is measured against the last chunk to finish.
    let first_finished = store.get(&ids[0]).await.unwrap().finished_at.unwrap();
    let last_finished = store.get(&ids[1]).await.unwrap().finished_at.unwrap();
    if first_finished < last_finished {
        assert_eq!(store.purge_terminal(last_finished).await.unwrap(), 0);
    }
    assert_eq!(
        store
            .purge_terminal(Utc::now() + Duration::seconds(1))
            .await
            .unwrap(),
        2
    );
    assert!(matches!(
        store.submission_jobs(&submission).await,
        Err(StoreError::SubmissionNotFound(id)) if id == submission
    ));
    assert!(store.is_empty().await);
}

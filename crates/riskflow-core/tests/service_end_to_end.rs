//! Full service: submit through the front door, score with the real engine.

use std::sync::Arc;
use std::time::Duration;

use riskflow_core::{
    QueueConfig, RiskflowService, ServiceConfig, Submission, SubmissionStatus, WorkerConfig,
};
use riskflow_inference::{fixtures, ArtifactStore, EnsemblePolicy, InferenceEngine, ModelFamily};
use riskflow_state::RowOutcome;

async fn service() -> RiskflowService {
    let artifacts = ArtifactStore::from_bundle(fixtures::reference_bundle()).unwrap();
    let engine = InferenceEngine::new(artifacts, EnsemblePolicy::v1()).unwrap();
    let config = ServiceConfig {
        worker: WorkerConfig {
            dequeue_timeout_ms: 20,
            ..WorkerConfig::default()
        },
        queue: QueueConfig {
            chunk_size: 4,
            ..QueueConfig::default()
        },
        ..ServiceConfig::default()
    };
    RiskflowService::start(config, Arc::new(engine)).await.unwrap()
}

#[tokio::test]
async fn quarterly_batch_completes_in_row_order() {
    let svc = service().await;
    assert_eq!(svc.workers().await, 2);

    let receipt = svc
        .jobs()
        .submit(Submission {
            family: ModelFamily::Quarterly,
            priority: None,
            rows: fixtures::row_sweep(ModelFamily::Quarterly, 10),
        })
        .await
        .unwrap();
    assert_eq!(receipt.chunks, 3);

    let report = svc
        .jobs()
        .wait(
            &receipt.submission_id,
            Duration::from_millis(10),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
    assert_eq!(report.status, SubmissionStatus::Completed);
    assert_eq!(report.rows_done, 10);
    assert_eq!(report.progress, 1.0);
    assert!(report.failures.is_empty());

    let results = report.results.expect("results once completed");
    let rows: Vec<usize> = results.iter().map(|r| r.row).collect();
    assert_eq!(rows, (0..10).collect::<Vec<_>>());
    for r in &results {
        match &r.outcome {
            RowOutcome::Scored { prediction } => {
                assert!((0.0..=1.0).contains(&prediction.ensemble_probability));
                assert_eq!(prediction.sub_models.len(), 3);
            }
            other => panic!("row {} not scored: {other:?}", r.row),
        }
    }

    assert!(!svc.scaling_history().await.is_empty());
    svc.shutdown().await;
}

#[tokio::test]
async fn missing_feature_is_reported_per_row() {
    let svc = service().await;

    let mut rows = fixtures::row_sweep(ModelFamily::Annual, 6);
    rows[5].remove("current_ratio");
    let receipt = svc
        .jobs()
        .submit(Submission {
            family: ModelFamily::Annual,
            priority: None,
            rows,
        })
        .await
        .unwrap();

    let report = svc
        .jobs()
        .wait(
            &receipt.submission_id,
            Duration::from_millis(10),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
    assert_eq!(report.status, SubmissionStatus::Failed);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].starts_with("row 5 failed:"));
    assert!(report.failures[0].contains("current_ratio"));

    let results = report.results.expect("results once finished");
    assert_eq!(results.len(), 6);
    assert_eq!(results.iter().filter(|r| r.is_scored()).count(), 5);

    svc.shutdown().await;
}

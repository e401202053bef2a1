//! Runtime wiring: store, queue, pool, controller and maintenance loop.

use std::sync::Arc;

use async_trait::async_trait;
use riskflow_inference::Scorer;
use riskflow_state::{JobStore, MemoryJobStore, QueueMetricsSnapshot};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::autoscaler::{AutoscalingController, MetricsSource, ScalerState, ScalingRecord};
use crate::config::ServiceConfig;
use crate::error::CoreResult;
use crate::pool::{PoolUtilization, ScaleTarget, WorkerPool};
use crate::queue::PriorityQueue;
use crate::submission::JobService;
use crate::worker::ExecutorContext;

/// Store queue metrics joined with pool heartbeats.
pub struct StoreMetricsSource {
    store: Arc<dyn JobStore>,
    pool: Arc<WorkerPool>,
}

impl StoreMetricsSource {
    pub fn new(store: Arc<dyn JobStore>, pool: Arc<WorkerPool>) -> Self {
        Self { store, pool }
    }
}

#[async_trait]
impl MetricsSource for StoreMetricsSource {
    async fn snapshot(&self) -> CoreResult<QueueMetricsSnapshot> {
        let snapshot = self.store.snapshot_metrics().await?;
        let util = self.pool.utilization().await;
        Ok(snapshot.with_workers(util.workers, util.live_executors, util.busy_executors))
    }
}

/// A running riskflow instance.
pub struct RiskflowService {
    config: ServiceConfig,
    store: Arc<dyn JobStore>,
    pool: Arc<WorkerPool>,
    controller: Arc<AutoscalingController>,
    jobs: JobService,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RiskflowService {
    /// Validate `config`, start `min_workers` workers and the background loops.
    pub async fn start(config: ServiceConfig, scorer: Arc<dyn Scorer>) -> CoreResult<Self> {
        Self::start_with_store(config, scorer, Arc::new(MemoryJobStore::new())).await
    }

    pub async fn start_with_store(
        config: ServiceConfig,
        scorer: Arc<dyn Scorer>,
        store: Arc<dyn JobStore>,
    ) -> CoreResult<Self> {
        config.validate()?;

        let queue = Arc::new(PriorityQueue::new(config.queue.lane_capacity));
        let pool = Arc::new(WorkerPool::new(ExecutorContext {
            queue: Arc::clone(&queue),
            store: Arc::clone(&store),
            scorer,
            config: config.worker.clone(),
        }));
        pool.scale_to(config.scaling.min_workers).await?;

        let source = Arc::new(StoreMetricsSource::new(Arc::clone(&store), Arc::clone(&pool)));
        let controller = Arc::new(AutoscalingController::new(
            config.scaling.clone(),
            source,
            Arc::clone(&pool) as Arc<dyn ScaleTarget>,
        ));
        let jobs = JobService::new(
            Arc::clone(&store),
            queue,
            Arc::clone(&pool) as Arc<dyn ScaleTarget>,
            config.queue.clone(),
            &config.worker,
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(Arc::clone(&controller).run(shutdown_rx.clone())),
            tokio::spawn(maintain(
                Arc::clone(&pool),
                Arc::clone(&store),
                config.clone(),
                shutdown_rx,
            )),
        ];

        info!(
            min_workers = config.scaling.min_workers,
            max_workers = config.scaling.max_workers,
            concurrency = config.worker.concurrency,
            "riskflow service started"
        );
        Ok(Self {
            config,
            store,
            pool,
            controller,
            jobs,
            shutdown,
            tasks,
        })
    }

    pub fn jobs(&self) -> &JobService {
        &self.jobs
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub async fn workers(&self) -> usize {
        self.pool.workers().await
    }

    pub async fn utilization(&self) -> PoolUtilization {
        self.pool.utilization().await
    }

    pub async fn scaler_state(&self) -> ScalerState {
        self.controller.state().await
    }

    pub async fn scaling_history(&self) -> Vec<ScalingRecord> {
        self.controller.history().await
    }

    /// Stop the loops, then drain every executor.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        let exits = self.pool.shutdown().await;
        info!(executors = exits.len(), "riskflow service stopped");
    }
}

/// Reconcile the pool and purge old results once per scaling interval.
async fn maintain(
    pool: Arc<WorkerPool>,
    store: Arc<dyn JobStore>,
    config: ServiceConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(config.scaling.interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let retention = chrono::Duration::from_std(config.queue.result_retention())
        .unwrap_or_else(|_| chrono::Duration::hours(1));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                pool.reconcile().await;
                let Some(cutoff) = chrono::Utc::now().checked_sub_signed(retention) else {
                    continue;
                };
                match store.purge_terminal(cutoff).await {
                    Ok(0) => {}
                    Ok(n) => debug!(purged = n, "old results purged"),
                    Err(e) => warn!(error = %e, "result purge failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

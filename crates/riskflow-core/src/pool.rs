//! Worker pool: instances of executors with one authoritative count.
//!
//! Each worker instance hosts `WorkerConfig::concurrency` executor tasks that
//! share a drain signal. Scaling down drains whole instances; their executors
//! finish the job in hand before exiting. Retired executors are replaced on
//! [`WorkerPool::reconcile`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ScaleError, ScaleResult};
use crate::obs;
use crate::worker::{Executor, ExecutorContext, ExecutorExit, Heartbeat};

/// Something whose worker count the controller can change.
#[async_trait]
pub trait ScaleTarget: Send + Sync {
    /// Current worker instance count.
    async fn current_workers(&self) -> usize;

    /// Move to exactly `target` workers. Returns the resulting count.
    async fn apply(&self, target: usize) -> ScaleResult<usize>;
}

/// Executor activity sampled from heartbeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolUtilization {
    pub workers: usize,
    pub live_executors: usize,
    pub busy_executors: usize,
    pub stale_executors: usize,
}

/// What a reconcile pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Exited executors of active instances that were respawned.
    pub replaced: usize,
    /// Drained executors whose tasks were collected.
    pub reaped: usize,
    pub stale: usize,
}

struct ExecutorSlot {
    name: String,
    heartbeat: Arc<Heartbeat>,
    handle: JoinHandle<ExecutorExit>,
}

struct WorkerInstance {
    id: u64,
    drain: watch::Sender<bool>,
    slots: Vec<ExecutorSlot>,
}

#[derive(Default)]
struct PoolState {
    instances: Vec<WorkerInstance>,
    draining: Vec<ExecutorSlot>,
    closed: bool,
}

pub struct WorkerPool {
    ctx: ExecutorContext,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
}

impl WorkerPool {
    /// An empty pool; call [`WorkerPool::scale_to`] to start workers.
    pub fn new(ctx: ExecutorContext) -> Self {
        Self {
            ctx,
            state: Mutex::new(PoolState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn workers(&self) -> usize {
        self.state.lock().await.instances.len()
    }

    /// Start or drain instances until exactly `target` are active.
    pub async fn scale_to(&self, target: usize) -> ScaleResult<usize> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ScaleError::ShuttingDown);
        }

        let before = state.instances.len();
        while state.instances.len() < target {
            let instance = self.spawn_instance();
            state.instances.push(instance);
        }
        while state.instances.len() > target {
            if let Some(instance) = state.instances.pop() {
                instance.drain.send_replace(true);
                debug!(worker = instance.id, "worker draining");
                state.draining.extend(instance.slots);
            }
        }

        let after = state.instances.len();
        if after != before {
            info!(from = before, to = after, "worker pool resized");
        }
        Ok(after)
    }

    pub async fn utilization(&self) -> PoolUtilization {
        let stale_after = self.ctx.config.heartbeat_stale();
        let state = self.state.lock().await;
        let mut util = PoolUtilization {
            workers: state.instances.len(),
            ..PoolUtilization::default()
        };
        for slot in state.instances.iter().flat_map(|i| i.slots.iter()) {
            if slot.handle.is_finished() {
                continue;
            }
            util.live_executors += 1;
            if slot.heartbeat.is_busy() {
                util.busy_executors += 1;
            }
            if slot.heartbeat.age() > stale_after {
                util.stale_executors += 1;
            }
        }
        util
    }

    /// Respawn exited executors, collect drained ones and flag stale heartbeats.
    pub async fn reconcile(&self) -> ReconcileReport {
        let stale_after = self.ctx.config.heartbeat_stale();
        let mut report = ReconcileReport::default();
        let mut state = self.state.lock().await;
        if state.closed {
            return report;
        }

        for instance in state.instances.iter_mut() {
            for index in 0..instance.slots.len() {
                if !instance.slots[index].handle.is_finished() {
                    let heartbeat = &instance.slots[index].heartbeat;
                    let age = heartbeat.age();
                    if age > stale_after {
                        report.stale += 1;
                        obs::emit_executor_stale(
                            &instance.slots[index].name,
                            age.as_millis() as u64,
                        );
                    }
                    continue;
                }

                let replacement = self.spawn_executor(instance.id, index, instance.drain.subscribe());
                let exited = std::mem::replace(&mut instance.slots[index], replacement);
                match exited.handle.await {
                    Ok(ExecutorExit::Retired { reason }) => {
                        debug!(executor = %exited.name, reason = %reason, "replacing retired executor");
                    }
                    Ok(exit) => {
                        debug!(executor = %exited.name, exit = ?exit, "replacing exited executor");
                    }
                    Err(e) => {
                        warn!(executor = %exited.name, error = %e, "executor task panicked");
                    }
                }
                report.replaced += 1;
            }
        }

        let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut state.draining)
            .into_iter()
            .partition(|slot| slot.handle.is_finished());
        state.draining = running;
        for slot in finished {
            if let Err(e) = slot.handle.await {
                warn!(executor = %slot.name, error = %e, "drained executor panicked");
            }
            report.reaped += 1;
        }

        if report.replaced > 0 || report.stale > 0 {
            info!(
                replaced = report.replaced,
                reaped = report.reaped,
                stale = report.stale,
                "worker pool reconciled"
            );
        }
        report
    }

    /// Drain every executor and wait for all of them to exit.
    ///
    /// Jobs in progress are finished, not interrupted. Later scaling
    /// requests fail with [`ScaleError::ShuttingDown`].
    pub async fn shutdown(&self) -> Vec<ExecutorExit> {
        let slots = {
            let mut state = self.state.lock().await;
            state.closed = true;
            let mut slots = std::mem::take(&mut state.draining);
            for instance in state.instances.drain(..) {
                instance.drain.send_replace(true);
                slots.extend(instance.slots);
            }
            slots
        };

        let count = slots.len();
        let exits: Vec<ExecutorExit> = futures::future::join_all(slots.into_iter().map(|s| s.handle))
            .await
            .into_iter()
            .filter_map(Result::ok)
            .collect();
        info!(executors = count, "worker pool shut down");
        exits
    }

    fn spawn_instance(&self) -> WorkerInstance {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (drain, _) = watch::channel(false);
        let slots = (0..self.ctx.config.concurrency)
            .map(|index| self.spawn_executor(id, index, drain.subscribe()))
            .collect();
        debug!(worker = id, "worker started");
        WorkerInstance { id, drain, slots }
    }

    fn spawn_executor(
        &self,
        worker: u64,
        index: usize,
        drain: watch::Receiver<bool>,
    ) -> ExecutorSlot {
        let heartbeat = Arc::new(Heartbeat::new());
        let executor = Executor::new(
            format!("w{worker}-e{index}"),
            self.ctx.clone(),
            Arc::clone(&heartbeat),
            drain,
        );
        let name = executor.name().to_string();
        let handle = tokio::spawn(executor.run());
        ExecutorSlot {
            name,
            heartbeat,
            handle,
        }
    }
}

#[async_trait]
impl ScaleTarget for WorkerPool {
    async fn current_workers(&self) -> usize {
        self.workers().await
    }

    async fn apply(&self, target: usize) -> ScaleResult<usize> {
        self.scale_to(target).await
    }
}

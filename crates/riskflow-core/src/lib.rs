//! riskflow core
//!
//! Scheduling and execution for bulk risk scoring.
//!
//! ## Layer 2 - Scheduling
//!
//! - [`queue`]: three-lane priority queue
//! - [`lanes`]: lane selection for submissions
//! - [`worker`]: executor loop and heartbeats
//! - [`pool`]: worker instances, draining and reconcile
//! - [`autoscaler`]: the scaling control loop
//! - [`submission`]: submit / status / cancel
//! - [`service`]: runtime wiring

pub mod autoscaler;
pub mod config;
pub mod error;
pub mod lanes;
pub mod metrics;
pub mod obs;
pub mod pool;
pub mod queue;
pub mod service;
pub mod submission;
pub mod telemetry;
pub mod worker;

pub use autoscaler::{
    decide, ApplyOutcome, AutoscalingController, MetricsSource, ScalerState, ScalingAction,
    ScalingDecision, ScalingRecord,
};
pub use config::{QueueConfig, ScalingConfig, ServiceConfig, WorkerConfig};
pub use error::{
    ConfigError, ConfigResult, CoreError, CoreResult, QueueError, QueueResult, ScaleError,
    ScaleResult,
};
pub use lanes::{LanePolicy, PriorityHint};
pub use metrics::{Metrics, MetricsSnapshot, METRICS};
pub use pool::{PoolUtilization, ReconcileReport, ScaleTarget, WorkerPool};
pub use queue::{PriorityQueue, QueueEntry};
pub use service::{RiskflowService, StoreMetricsSource};
pub use submission::{
    CancelOutcome, JobService, StatusReport, Submission, SubmissionReceipt, SubmissionStatus,
};
pub use telemetry::{init_tracing, level_for_verbosity};
pub use worker::{Executor, ExecutorContext, ExecutorExit, Heartbeat};

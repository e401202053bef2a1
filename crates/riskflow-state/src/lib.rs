//! riskflow state
//!
//! Job lifecycle and result storage.
//!
//! ## Layer 1 - Jobs and Results
//!
//! Focus: lifecycle integrity. Every status change goes through a
//! [`JobStore`], which rejects transitions out of terminal states and keeps
//! the per-lane counters the autoscaler reads.
//!
//! ## Key Components
//!
//! - `Job`: one chunk of a submission, with its rows and per-row outcomes
//! - `JobStore`: async storage trait
//! - `MemoryJobStore`: in-process implementation
//! - `QueueMetricsSnapshot`: depth, age and worker counts at one instant

mod error;
pub mod job;
pub mod memory;
pub mod metrics;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use job::{
    FailureKind, Job, JobFailure, JobId, JobStatus, Lane, RowOutcome, RowReport, SubmissionId,
};
pub use memory::MemoryJobStore;
pub use metrics::{LaneMetrics, QueueMetricsSnapshot};
pub use store::JobStore;

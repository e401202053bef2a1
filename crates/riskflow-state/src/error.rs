//! Error types for riskflow-state

use thiserror::Error;

use crate::job::{JobId, JobStatus, SubmissionId};

/// Errors that can occur in the job store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Job not found
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// Submission not found
    #[error("submission not found: {0}")]
    SubmissionNotFound(SubmissionId),

    /// A job with this id already exists
    #[error("job already exists: {0}")]
    DuplicateJob(JobId),

    /// The requested lifecycle transition is not allowed from the current status
    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

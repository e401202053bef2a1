//! Error types for riskflow-core

use riskflow_inference::InferenceError;
use riskflow_state::{Lane, StoreError};
use thiserror::Error;

/// Configuration could not be read or failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Constraint(String),
}

/// Priority queue errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("{lane} lane is full (capacity {capacity})")]
    Full { lane: Lane, capacity: usize },

    #[error("queue is closed")]
    Closed,
}

/// Failure to change the worker count.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScaleError {
    #[error("worker pool is shutting down")]
    ShuttingDown,

    #[error("scaling apply failed: {0}")]
    Apply(String),
}

/// Umbrella error for the core layer.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Scale(#[from] ScaleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("submission has no rows")]
    EmptySubmission,

    #[error("submission of {rows} rows exceeds the limit of {limit}")]
    SubmissionTooLarge { rows: usize, limit: usize },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type QueueResult<T> = std::result::Result<T, QueueError>;
pub type ScaleResult<T> = std::result::Result<T, ScaleError>;
pub type CoreResult<T> = std::result::Result<T, CoreError>;

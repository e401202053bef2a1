//! Error types for the inference layer.

use thiserror::Error;

/// Errors produced while loading artifacts or scoring a feature vector.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    /// A required feature is missing, non-finite or outside its declared bounds.
    ///
    /// Caller data problem: the row is rejected, never defaulted.
    #[error("invalid feature {feature}: {reason}")]
    InvalidFeature { feature: String, reason: String },

    /// The artifact does not fit the vector or is internally inconsistent.
    ///
    /// Deployment problem: fatal to the executor that observed it.
    #[error("artifact mismatch for {artifact}: {detail}")]
    ArtifactMismatch { artifact: String, detail: String },

    /// The ensemble policy table failed validation.
    #[error("invalid ensemble policy {version}: {detail}")]
    InvalidPolicy { version: String, detail: String },

    /// Artifact or policy source could not be read.
    #[error("IO error: {0}")]
    Io(String),

    /// Artifact or policy source is not valid JSON for the expected shape.
    #[error("JSON parsing error: {0}")]
    Json(String),
}

impl InferenceError {
    pub(crate) fn invalid_feature(feature: &str, reason: impl Into<String>) -> Self {
        InferenceError::InvalidFeature {
            feature: feature.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(artifact: &str, detail: impl Into<String>) -> Self {
        InferenceError::ArtifactMismatch {
            artifact: artifact.to_string(),
            detail: detail.into(),
        }
    }

    /// Whether this error should abort the whole job rather than a single row.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, InferenceError::InvalidFeature { .. })
    }
}

impl From<std::io::Error> for InferenceError {
    fn from(err: std::io::Error) -> Self {
        InferenceError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for InferenceError {
    fn from(err: serde_json::Error) -> Self {
        InferenceError::Json(err.to_string())
    }
}

/// Result type for inference operations.
pub type InferenceResult<T> = std::result::Result<T, InferenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_feature_is_row_level() {
        let err = InferenceError::invalid_feature("current_ratio", "missing");
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("current_ratio"));
    }

    #[test]
    fn mismatch_is_fatal() {
        let err = InferenceError::mismatch("annual-v3", "unexpected key ebitda");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("annual-v3"));
    }
}

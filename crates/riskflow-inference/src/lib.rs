//! riskflow inference
//!
//! Turns a row of financial ratios into a calibrated default-risk prediction:
//!
//! - [`artifact`]: immutable scoring artifacts and the shared read-only store
//! - [`features`]: named feature vectors and schema validation
//! - [`scorers`]: linear, step (scorecard) and gradient-boosted sub-models
//! - [`ensemble`]: weighting, agreement, calibrated confidence, risk tiers
//! - [`policy`]: the versioned ensemble policy table
//! - [`engine`]: `infer` and the [`Scorer`] seam used by executors
//! - [`fixtures`]: reference artifacts and rows

pub mod artifact;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod fixtures;
pub mod policy;
pub mod scorers;

pub use artifact::{
    ArtifactBundle, ArtifactStore, BoostedParams, FeatureSpec, LinearParams, ModelFamily,
    ScoringArtifact, StepParams, StepRule, Tree, TreeNode,
};
pub use engine::{infer, InferenceEngine, PredictionResult, Scorer};
pub use ensemble::{
    AgreementBreakdown, EffectiveThresholds, EnsembleOutcome, PairAgreement, SubModelScore,
};
pub use error::{InferenceError, InferenceResult};
pub use features::FeatureVector;
pub use policy::{EnsemblePolicy, RiskTier};
pub use scorers::SubModel;

//! The inference entry point: feature vector + artifacts → prediction.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::artifact::{ArtifactStore, ModelFamily, ScoringArtifact};
use crate::ensemble::{combine_annual, combine_quarterly, AgreementBreakdown, SubModelScore};
use crate::error::{InferenceError, InferenceResult};
use crate::features::{standardize, FeatureVector};
use crate::policy::{EnsemblePolicy, RiskTier};
use crate::scorers::{boosted_probability, linear_probability, step_probability, SubModel};

/// Output of one inference call. Contains no timestamps, so repeated calls
/// with the same artifact, policy and vector compare equal bit for bit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub family: ModelFamily,
    /// `id@version` of the artifact that scored the row.
    pub artifact: String,
    pub policy_version: String,
    pub sub_models: Vec<SubModelScore>,
    /// Weighted average before variance discount.
    pub raw_probability: f64,
    pub ensemble_probability: f64,
    pub risk_tier: RiskTier,
    pub confidence: f64,
    pub agreement: AgreementBreakdown,
}

/// Score one vector against one artifact.
///
/// Pure: no I/O, no allocation beyond the result, bounded by the artifact
/// size.
pub fn infer(
    vector: &FeatureVector,
    artifact: &ScoringArtifact,
    policy: &EnsemblePolicy,
) -> InferenceResult<PredictionResult> {
    let z = standardize(vector, artifact)?;

    let label = artifact.label();
    let linear = linear_probability(&artifact.linear, &z, &label)?;
    let step = step_probability(&artifact.step, artifact, &z)?;

    let (sub_models, outcome) = match artifact.family {
        ModelFamily::Annual => (
            vec![
                SubModelScore::new(SubModel::Linear, linear),
                SubModelScore::new(SubModel::Step, step),
            ],
            combine_annual(linear, step, policy),
        ),
        ModelFamily::Quarterly => {
            let params = artifact.boosted.as_ref().ok_or_else(|| {
                InferenceError::mismatch(&label, "quarterly artifact has no boosted scorer")
            })?;
            let boosted = boosted_probability(params, &z, &label)?;
            (
                vec![
                    SubModelScore::new(SubModel::Boosted, boosted),
                    SubModelScore::new(SubModel::Linear, linear),
                    SubModelScore::new(SubModel::Step, step),
                ],
                combine_quarterly(boosted, linear, step, policy),
            )
        }
    };

    Ok(PredictionResult {
        family: artifact.family,
        artifact: label,
        policy_version: policy.version.clone(),
        sub_models,
        raw_probability: outcome.raw_probability,
        ensemble_probability: outcome.probability,
        risk_tier: outcome.tier,
        confidence: outcome.confidence,
        agreement: outcome.agreement,
    })
}

/// Row scorer seam used by executors. Implemented by [`InferenceEngine`];
/// tests substitute slow or failing scorers.
pub trait Scorer: Send + Sync {
    fn score(&self, family: ModelFamily, row: &FeatureVector) -> InferenceResult<PredictionResult>;
}

/// Shared, read-only engine: artifacts plus the active policy table.
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    artifacts: Arc<ArtifactStore>,
    policy: Arc<EnsemblePolicy>,
}

impl InferenceEngine {
    pub fn new(artifacts: Arc<ArtifactStore>, policy: EnsemblePolicy) -> InferenceResult<Self> {
        policy.validate()?;
        Ok(Self {
            artifacts,
            policy: Arc::new(policy),
        })
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn policy(&self) -> &EnsemblePolicy {
        &self.policy
    }
}

impl Scorer for InferenceEngine {
    fn score(&self, family: ModelFamily, row: &FeatureVector) -> InferenceResult<PredictionResult> {
        infer(row, self.artifacts.get(family), &self.policy)
    }
}

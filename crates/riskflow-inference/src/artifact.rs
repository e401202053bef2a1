//! Scoring artifacts: immutable pre-trained parameters for each model family.
//!
//! Artifacts are loaded once per process from a JSON bundle, validated
//! structurally, fingerprinted with SHA-256 and then shared read-only by
//! every executor through an `Arc<ArtifactStore>`.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{InferenceError, InferenceResult};

/// The two trained model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Annual,
    Quarterly,
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelFamily::Annual => write!(f, "annual"),
            ModelFamily::Quarterly => write!(f, "quarterly"),
        }
    }
}

impl std::str::FromStr for ModelFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "annual" => Ok(ModelFamily::Annual),
            "quarterly" => Ok(ModelFamily::Quarterly),
            other => Err(format!("unknown model family: {other}")),
        }
    }
}

/// Schema and scaler statistics for a single input feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    /// Scaler mean subtracted before scoring.
    pub mean: f64,
    /// Scaler standard deviation; must be positive.
    pub scale: f64,
    /// Plausible lower bound on the raw ratio (inclusive).
    pub lower_bound: f64,
    /// Plausible upper bound on the raw ratio (inclusive).
    pub upper_bound: f64,
}

/// Logistic regression over standardized features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearParams {
    /// One coefficient per feature, in artifact feature order.
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

/// A discretized contribution for one feature.
///
/// `thresholds` are ascending cut points on the standardized value;
/// `points` has one entry per bin (`thresholds.len() + 1`). A value equal to
/// a threshold falls into the upper bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRule {
    pub feature: String,
    pub thresholds: Vec<f64>,
    pub points: Vec<f64>,
}

/// Points-based scorecard: logistic of `intercept + Σ points`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepParams {
    pub intercept: f64,
    pub rules: Vec<StepRule>,
}

/// Node of a regression tree over standardized feature indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    /// Go `left` when `x[feature] < threshold`, otherwise `right`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// A single tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

/// Gradient-boosted tree ensemble producing a log-odds margin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedParams {
    pub base_score: f64,
    pub learning_rate: f64,
    pub trees: Vec<Tree>,
}

/// Immutable trained parameters for one model family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringArtifact {
    pub id: String,
    pub version: String,
    pub family: ModelFamily,
    pub features: Vec<FeatureSpec>,
    pub linear: LinearParams,
    pub step: StepParams,
    /// Required for the quarterly family, ignored for annual.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boosted: Option<BoostedParams>,
}

impl ScoringArtifact {
    /// `id@version`, used in logs and errors.
    pub fn label(&self) -> String {
        format!("{}@{}", self.id, self.version)
    }

    /// Position of a feature in the artifact's declared order.
    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.features.iter().position(|f| f.name == name)
    }

    /// Structural validation run once at load time.
    ///
    /// Any inconsistency is an [`InferenceError::ArtifactMismatch`]: the
    /// artifact cannot be trusted to score anything.
    pub fn validate(&self) -> InferenceResult<()> {
        let label = self.label();
        let n = self.features.len();

        if n == 0 {
            return Err(InferenceError::mismatch(&label, "artifact declares no features"));
        }

        for (i, spec) in self.features.iter().enumerate() {
            if self.features[..i].iter().any(|f| f.name == spec.name) {
                return Err(InferenceError::mismatch(
                    &label,
                    format!("duplicate feature {}", spec.name),
                ));
            }
            if !(spec.scale.is_finite() && spec.scale > 0.0) || !spec.mean.is_finite() {
                return Err(InferenceError::mismatch(
                    &label,
                    format!("feature {} has invalid scaler statistics", spec.name),
                ));
            }
            if spec.lower_bound.is_nan()
                || spec.upper_bound.is_nan()
                || spec.lower_bound >= spec.upper_bound
            {
                return Err(InferenceError::mismatch(
                    &label,
                    format!("feature {} has empty plausible range", spec.name),
                ));
            }
        }

        if self.linear.coefficients.len() != n {
            return Err(InferenceError::mismatch(
                &label,
                format!(
                    "linear scorer has {} coefficients for {} features",
                    self.linear.coefficients.len(),
                    n
                ),
            ));
        }

        for rule in &self.step.rules {
            if self.feature_index(&rule.feature).is_none() {
                return Err(InferenceError::mismatch(
                    &label,
                    format!("step rule references unknown feature {}", rule.feature),
                ));
            }
            if rule.points.len() != rule.thresholds.len() + 1 {
                return Err(InferenceError::mismatch(
                    &label,
                    format!("step rule for {} needs one point per bin", rule.feature),
                ));
            }
            if rule.thresholds.windows(2).any(|w| w[0] >= w[1]) {
                return Err(InferenceError::mismatch(
                    &label,
                    format!("step rule for {} has unsorted thresholds", rule.feature),
                ));
            }
        }

        match (&self.family, &self.boosted) {
            (ModelFamily::Quarterly, None) => {
                return Err(InferenceError::mismatch(
                    &label,
                    "quarterly artifact has no boosted scorer",
                ));
            }
            (_, Some(boosted)) => validate_trees(&label, boosted, n)?,
            _ => {}
        }

        Ok(())
    }
}

fn validate_trees(label: &str, boosted: &BoostedParams, n_features: usize) -> InferenceResult<()> {
    if boosted.trees.is_empty() {
        return Err(InferenceError::mismatch(label, "boosted scorer has no trees"));
    }
    for (t, tree) in boosted.trees.iter().enumerate() {
        if tree.nodes.is_empty() {
            return Err(InferenceError::mismatch(label, format!("tree {t} is empty")));
        }
        for (i, node) in tree.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= n_features {
                    return Err(InferenceError::mismatch(
                        label,
                        format!("tree {t} node {i} splits on feature index {feature}"),
                    ));
                }
                // Children must point forward so traversal always terminates.
                let bound = tree.nodes.len();
                if *left <= i || *right <= i || *left >= bound || *right >= bound {
                    return Err(InferenceError::mismatch(
                        label,
                        format!("tree {t} node {i} has out-of-order children"),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// On-disk shape: one artifact per family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactBundle {
    pub annual: ScoringArtifact,
    pub quarterly: ScoringArtifact,
}

/// Read-only store of the deployed artifacts.
///
/// Constructed once at startup; clone the `Arc` to share it.
#[derive(Debug)]
pub struct ArtifactStore {
    annual: ScoringArtifact,
    quarterly: ScoringArtifact,
    fingerprint: String,
}

impl ArtifactStore {
    /// Validate a bundle and fingerprint its canonical JSON encoding.
    pub fn from_bundle(bundle: ArtifactBundle) -> InferenceResult<Arc<Self>> {
        let bytes = serde_json::to_vec(&bundle)?;
        Self::build(bundle, &bytes)
    }

    /// Parse and validate a bundle from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> InferenceResult<Arc<Self>> {
        let bundle: ArtifactBundle = serde_json::from_slice(bytes)?;
        Self::build(bundle, bytes)
    }

    /// Load the bundle at `path`.
    pub fn load(path: &Path) -> InferenceResult<Arc<Self>> {
        let bytes = std::fs::read(path)?;
        let store = Self::from_json(&bytes)?;
        info!(
            path = %path.display(),
            fingerprint = %store.short_fingerprint(),
            annual = %store.annual.label(),
            quarterly = %store.quarterly.label(),
            "scoring artifacts loaded"
        );
        Ok(store)
    }

    fn build(bundle: ArtifactBundle, bytes: &[u8]) -> InferenceResult<Arc<Self>> {
        for (expected, artifact) in [
            (ModelFamily::Annual, &bundle.annual),
            (ModelFamily::Quarterly, &bundle.quarterly),
        ] {
            if artifact.family != expected {
                return Err(InferenceError::mismatch(
                    &artifact.label(),
                    format!("declared family {} in the {expected} slot", artifact.family),
                ));
            }
            artifact.validate()?;
        }

        let mut hasher = Sha256::new();
        hasher.update(bytes);

        Ok(Arc::new(Self {
            annual: bundle.annual,
            quarterly: bundle.quarterly,
            fingerprint: hex::encode(hasher.finalize()),
        }))
    }

    pub fn get(&self, family: ModelFamily) -> &ScoringArtifact {
        match family {
            ModelFamily::Annual => &self.annual,
            ModelFamily::Quarterly => &self.quarterly,
        }
    }

    /// SHA-256 hex digest of the bundle source bytes.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Short form (first 12 hex chars).
    pub fn short_fingerprint(&self) -> &str {
        &self.fingerprint[..12.min(self.fingerprint.len())]
    }
}

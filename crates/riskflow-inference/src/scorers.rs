//! Sub-model scorers. Each maps a standardized feature vector to a
//! default probability in `[0, 1]`.

use serde::{Deserialize, Serialize};

use crate::artifact::{BoostedParams, LinearParams, ScoringArtifact, StepParams, TreeNode};
use crate::error::{InferenceError, InferenceResult};

/// Which sub-model produced a probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubModel {
    Linear,
    Step,
    Boosted,
}

impl std::fmt::Display for SubModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubModel::Linear => write!(f, "linear"),
            SubModel::Step => write!(f, "step"),
            SubModel::Boosted => write!(f, "boosted"),
        }
    }
}

/// Logistic function. Saturates cleanly to 0 or 1 for large magnitudes.
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Logistic regression over the standardized vector.
///
/// The scorers re-check the shapes they index by, so an artifact that skipped
/// [`ScoringArtifact::validate`] is reported instead of scored.
pub fn linear_probability(params: &LinearParams, z: &[f64], label: &str) -> InferenceResult<f64> {
    if params.coefficients.len() != z.len() {
        return Err(InferenceError::mismatch(
            label,
            format!(
                "linear scorer has {} coefficients for {} features",
                params.coefficients.len(),
                z.len()
            ),
        ));
    }
    let margin = params
        .coefficients
        .iter()
        .zip(z)
        .fold(params.intercept, |acc, (w, x)| acc + w * x);
    Ok(sigmoid(margin))
}

pub fn step_probability(
    params: &StepParams,
    artifact: &ScoringArtifact,
    z: &[f64],
) -> InferenceResult<f64> {
    let mut score = params.intercept;
    for rule in &params.rules {
        let value = artifact
            .feature_index(&rule.feature)
            .and_then(|idx| z.get(idx))
            .ok_or_else(|| {
                InferenceError::mismatch(
                    &artifact.label(),
                    format!("step rule uses unknown feature {}", rule.feature),
                )
            })?;
        let bin = rule.thresholds.partition_point(|t| t <= value);
        let points = rule.points.get(bin).ok_or_else(|| {
            InferenceError::mismatch(
                &artifact.label(),
                format!(
                    "step rule for {} has {} points for {} thresholds",
                    rule.feature,
                    rule.points.len(),
                    rule.thresholds.len()
                ),
            )
        })?;
        score += points;
    }
    Ok(sigmoid(score))
}

pub fn boosted_probability(params: &BoostedParams, z: &[f64], label: &str) -> InferenceResult<f64> {
    let mut margin = params.base_score;
    for (t, tree) in params.trees.iter().enumerate() {
        margin += params.learning_rate * leaf_value(&tree.nodes, z, t, label)?;
    }
    Ok(sigmoid(margin))
}

fn leaf_value(nodes: &[TreeNode], z: &[f64], tree: usize, label: &str) -> InferenceResult<f64> {
    let mut idx = 0;
    // A well-formed path visits each node at most once.
    for _ in 0..nodes.len() {
        let node = nodes.get(idx).ok_or_else(|| {
            InferenceError::mismatch(label, format!("tree {tree} points past its nodes at {idx}"))
        })?;
        match node {
            TreeNode::Leaf { value } => return Ok(*value),
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                let x = z.get(*feature).ok_or_else(|| {
                    InferenceError::mismatch(
                        label,
                        format!("tree {tree} node {idx} splits on feature index {feature}"),
                    )
                })?;
                idx = if x < threshold { *left } else { *right };
            }
        }
    }
    Err(InferenceError::mismatch(
        label,
        format!("tree {tree} has no leaf on this path"),
    ))
}

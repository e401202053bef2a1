//! Named feature vectors and their validation against an artifact schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::artifact::ScoringArtifact;
use crate::error::{InferenceError, InferenceResult};

/// An ordered list of named financial ratios for one company-period.
///
/// Serialized as a JSON object with sorted keys. Scoring always reads values
/// in the artifact's declared order, so caller key order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, f64>", into = "BTreeMap<String, f64>")]
pub struct FeatureVector {
    entries: Vec<(String, f64)>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, value)` pairs. A later duplicate name overwrites.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut vector = Self::new();
        for (name, value) in pairs {
            vector.insert(name, value);
        }
        vector
    }

    /// Set a feature value (builder pattern).
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Remove a feature, returning its value if present.
    pub fn remove(&mut self, name: &str) -> Option<f64> {
        let idx = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<BTreeMap<String, f64>> for FeatureVector {
    fn from(map: BTreeMap<String, f64>) -> Self {
        Self::from_pairs(map)
    }
}

impl From<FeatureVector> for BTreeMap<String, f64> {
    fn from(vector: FeatureVector) -> Self {
        vector.entries.into_iter().collect()
    }
}

/// Validate `vector` against the artifact schema and standardize it.
///
/// Returns the standardized values in the artifact's declared feature order.
///
/// Checks run in this order so the most specific failure wins:
/// 1. every declared feature is present, finite and within bounds
///    ([`InferenceError::InvalidFeature`]);
/// 2. the vector carries no keys the artifact does not declare
///    ([`InferenceError::ArtifactMismatch`]).
pub fn standardize(vector: &FeatureVector, artifact: &ScoringArtifact) -> InferenceResult<Vec<f64>> {
    let mut standardized = Vec::with_capacity(artifact.features.len());

    for spec in &artifact.features {
        let raw = vector
            .get(&spec.name)
            .ok_or_else(|| InferenceError::invalid_feature(&spec.name, "missing required feature"))?;

        if !raw.is_finite() {
            return Err(InferenceError::invalid_feature(
                &spec.name,
                format!("value {raw} is not finite"),
            ));
        }
        if raw < spec.lower_bound || raw > spec.upper_bound {
            return Err(InferenceError::invalid_feature(
                &spec.name,
                format!(
                    "value {raw} outside plausible range [{}, {}]",
                    spec.lower_bound, spec.upper_bound
                ),
            ));
        }

        standardized.push((raw - spec.mean) / spec.scale);
    }

    if let Some(extra) = vector.names().find(|n| artifact.feature_index(n).is_none()) {
        return Err(InferenceError::mismatch(
            &artifact.label(),
            format!("feature vector carries undeclared key {extra}"),
        ));
    }

    Ok(standardized)
}

//! Versioned ensemble policy table.
//!
//! Weights, variance discounts, confidence calibration, tier thresholds and
//! the disagreement escalation table are policy data rather than code: a new
//! table can be deployed without touching the scoring logic.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{InferenceError, InferenceResult};

/// Final risk category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    /// One tier up, saturating at `High`.
    pub fn escalated(self) -> Self {
        match self {
            RiskTier::Low => RiskTier::Medium,
            RiskTier::Medium | RiskTier::High => RiskTier::High,
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskTier::Low => write!(f, "low"),
            RiskTier::Medium => write!(f, "medium"),
            RiskTier::High => write!(f, "high"),
        }
    }
}

/// Annual ensemble weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnualWeights {
    pub linear: f64,
    pub step: f64,
}

/// Quarterly ensemble weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarterlyWeights {
    pub boosted: f64,
    pub linear: f64,
    pub step: f64,
}

/// Multiply the raw ensemble by `factor` when variance is below `below`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceBand {
    pub below: f64,
    pub factor: f64,
}

/// Sub-model variance discount schedule (quarterly family).
///
/// Bands are checked in ascending `below` order, first match wins;
/// `fallback_factor` applies past the last band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceDiscount {
    pub bands: Vec<VarianceBand>,
    pub fallback_factor: f64,
}

impl VarianceDiscount {
    pub fn factor_for(&self, variance: f64) -> f64 {
        self.bands
            .iter()
            .find(|band| variance < band.below)
            .map(|band| band.factor)
            .unwrap_or(self.fallback_factor)
    }
}

/// `confidence = sigmoid(k · agreement − c)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub k: f64,
    pub c: f64,
}

/// Base thresholds before confidence scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    /// Probability at or above which a prediction is at least `Medium`.
    pub medium: f64,
    /// Probability at or above which a prediction is `High`.
    pub high: f64,
    /// Lower clamp on the confidence multiplier.
    pub confidence_floor: f64,
}

/// One row of the disagreement escalation table.
///
/// Applies to a prediction currently in `from` whose probability is within
/// `margin` below the effective threshold of the next tier up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRule {
    pub from: RiskTier,
    pub margin: f64,
}

/// Quarterly escalation under high sub-model disagreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Escalation is only considered when variance strictly exceeds this.
    pub variance_above: f64,
    pub rules: Vec<EscalationRule>,
}

/// Complete versioned policy table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsemblePolicy {
    pub version: String,
    pub annual: AnnualWeights,
    pub quarterly: QuarterlyWeights,
    pub variance_discount: VarianceDiscount,
    pub calibration: Calibration,
    pub thresholds: TierThresholds,
    pub escalation: EscalationPolicy,
}

impl Default for EnsemblePolicy {
    fn default() -> Self {
        Self::v1()
    }
}

impl EnsemblePolicy {
    /// Production policy as documented for the first deployed model pair.
    pub fn v1() -> Self {
        Self {
            version: "v1".to_string(),
            annual: AnnualWeights {
                linear: 0.7,
                step: 0.3,
            },
            quarterly: QuarterlyWeights {
                boosted: 0.5,
                linear: 0.3,
                step: 0.2,
            },
            variance_discount: VarianceDiscount {
                bands: vec![
                    VarianceBand {
                        below: 0.01,
                        factor: 1.0,
                    },
                    VarianceBand {
                        below: 0.05,
                        factor: 0.95,
                    },
                ],
                fallback_factor: 0.90,
            },
            calibration: Calibration { k: 6.0, c: 3.0 },
            thresholds: TierThresholds {
                medium: 0.3,
                high: 0.7,
                confidence_floor: 0.8,
            },
            escalation: EscalationPolicy {
                variance_above: 0.1,
                rules: vec![
                    EscalationRule {
                        from: RiskTier::Low,
                        margin: 0.10,
                    },
                    EscalationRule {
                        from: RiskTier::Medium,
                        margin: 0.15,
                    },
                ],
            },
        }
    }

    /// Load and validate a policy table from a JSON file.
    pub fn load(path: &Path) -> InferenceResult<Self> {
        let bytes = std::fs::read(path)?;
        let policy: Self = serde_json::from_slice(&bytes)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> InferenceResult<()> {
        let fail = |detail: String| InferenceError::InvalidPolicy {
            version: self.version.clone(),
            detail,
        };

        check_weights(&[self.annual.linear, self.annual.step]).map_err(|d| fail(format!("annual weights {d}")))?;
        check_weights(&[self.quarterly.boosted, self.quarterly.linear, self.quarterly.step])
            .map_err(|d| fail(format!("quarterly weights {d}")))?;

        let discount = &self.variance_discount;
        if discount.bands.windows(2).any(|w| w[0].below >= w[1].below) {
            return Err(fail("variance bands must be strictly ascending".to_string()));
        }
        let factors = discount
            .bands
            .iter()
            .map(|b| b.factor)
            .chain(std::iter::once(discount.fallback_factor));
        for factor in factors {
            if !(factor > 0.0 && factor <= 1.0) {
                return Err(fail(format!("discount factor {factor} outside (0, 1]")));
            }
        }

        if !(self.calibration.k > 0.0 && self.calibration.k.is_finite() && self.calibration.c.is_finite()) {
            return Err(fail("calibration requires finite k > 0 and finite c".to_string()));
        }

        let t = &self.thresholds;
        if !(0.0 < t.medium && t.medium < t.high && t.high < 1.0) {
            return Err(fail("thresholds must satisfy 0 < medium < high < 1".to_string()));
        }
        if !(t.confidence_floor > 0.0 && t.confidence_floor <= 1.0) {
            return Err(fail("confidence floor outside (0, 1]".to_string()));
        }

        for rule in &self.escalation.rules {
            if rule.from == RiskTier::High {
                return Err(fail("escalation rule cannot start from high".to_string()));
            }
            if !(rule.margin >= 0.0 && rule.margin.is_finite()) {
                return Err(fail(format!("escalation margin {} is invalid", rule.margin)));
            }
        }

        Ok(())
    }
}

fn check_weights(weights: &[f64]) -> Result<(), String> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err("must be finite and non-negative".to_string());
    }
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > 1e-9 {
        return Err(format!("sum to {sum}, expected 1"));
    }
    Ok(())
}

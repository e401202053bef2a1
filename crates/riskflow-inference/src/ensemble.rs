//! Ensemble combination: weights, agreement, calibrated confidence and
//! confidence-scaled risk tiers.
//!
//! Everything here operates on sub-model probabilities only, so the
//! combination rules can be exercised without any artifact.

use serde::{Deserialize, Serialize};

use crate::policy::{Calibration, EnsemblePolicy, EscalationPolicy, RiskTier, TierThresholds};
use crate::scorers::{sigmoid, SubModel};

/// One sub-model's contribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubModelScore {
    pub model: SubModel,
    pub probability: f64,
}

impl SubModelScore {
    pub fn new(model: SubModel, probability: f64) -> Self {
        Self { model, probability }
    }
}

/// Agreement between two sub-models: `1 - |pa - pb|`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairAgreement {
    pub a: SubModel,
    pub b: SubModel,
    pub agreement: f64,
}

/// Effective tier thresholds after confidence scaling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectiveThresholds {
    pub medium: f64,
    pub high: f64,
}

/// Per-prediction explanation of how sub-models agreed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementBreakdown {
    pub pairwise: Vec<PairAgreement>,
    pub mean_agreement: f64,
    /// Population variance of the sub-model probabilities.
    pub variance: f64,
    /// Multiplier applied to the raw ensemble (1.0 when no discount).
    pub discount_factor: f64,
    pub thresholds: EffectiveThresholds,
    /// Whether the disagreement escalation table raised the tier.
    pub escalated: bool,
}

/// Result of combining sub-model scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleOutcome {
    /// Weighted average before discount and clamping.
    pub raw_probability: f64,
    pub probability: f64,
    pub confidence: f64,
    pub tier: RiskTier,
    pub agreement: AgreementBreakdown,
}

pub fn population_variance(probabilities: &[f64]) -> f64 {
    if probabilities.is_empty() {
        return 0.0;
    }
    let n = probabilities.len() as f64;
    let mean = probabilities.iter().sum::<f64>() / n;
    probabilities.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n
}

pub fn pairwise_agreement(scores: &[SubModelScore]) -> Vec<PairAgreement> {
    let mut pairs = Vec::new();
    for (i, a) in scores.iter().enumerate() {
        for b in &scores[i + 1..] {
            pairs.push(PairAgreement {
                a: a.model,
                b: b.model,
                agreement: 1.0 - (a.probability - b.probability).abs(),
            });
        }
    }
    pairs
}

/// `sigmoid(k · agreement − c)`: monotonically increasing in agreement.
pub fn calibrated_confidence(mean_agreement: f64, calibration: &Calibration) -> f64 {
    sigmoid(calibration.k * mean_agreement - calibration.c).clamp(0.0, 1.0)
}

/// `base × max(floor, confidence)`: low confidence lowers the bar for the
/// riskier tiers.
pub fn effective_thresholds(confidence: f64, thresholds: &TierThresholds) -> EffectiveThresholds {
    let multiplier = confidence.max(thresholds.confidence_floor);
    EffectiveThresholds {
        medium: thresholds.medium * multiplier,
        high: thresholds.high * multiplier,
    }
}

pub fn assign_tier(probability: f64, thresholds: EffectiveThresholds) -> RiskTier {
    if probability >= thresholds.high {
        RiskTier::High
    } else if probability >= thresholds.medium {
        RiskTier::Medium
    } else {
        RiskTier::Low
    }
}

/// Escalate one tier when sub-models disagree strongly and the prediction
/// sits just below the next tier's effective threshold.
///
/// Returns the escalated tier, or `None` when the table does not apply.
/// The table is explicit policy data; see [`EscalationPolicy`].
pub fn escalate_for_disagreement(
    tier: RiskTier,
    probability: f64,
    variance: f64,
    thresholds: EffectiveThresholds,
    policy: &EscalationPolicy,
) -> Option<RiskTier> {
    if variance <= policy.variance_above {
        return None;
    }
    let rule = policy.rules.iter().find(|r| r.from == tier)?;
    let next_threshold = match tier {
        RiskTier::Low => thresholds.medium,
        RiskTier::Medium => thresholds.high,
        RiskTier::High => return None,
    };
    (probability >= next_threshold - rule.margin).then(|| tier.escalated())
}

fn finish(
    scores: &[SubModelScore],
    raw_probability: f64,
    discount_factor: f64,
    policy: &EnsemblePolicy,
    allow_escalation: bool,
) -> EnsembleOutcome {
    let probabilities: Vec<f64> = scores.iter().map(|s| s.probability).collect();
    let variance = population_variance(&probabilities);
    let pairwise = pairwise_agreement(scores);
    let mean_agreement = if pairwise.is_empty() {
        1.0
    } else {
        pairwise.iter().map(|p| p.agreement).sum::<f64>() / pairwise.len() as f64
    };

    let probability = (raw_probability * discount_factor).clamp(0.0, 1.0);
    let confidence = calibrated_confidence(mean_agreement, &policy.calibration);
    let thresholds = effective_thresholds(confidence, &policy.thresholds);

    let base_tier = assign_tier(probability, thresholds);
    let escalated_tier = if allow_escalation {
        escalate_for_disagreement(base_tier, probability, variance, thresholds, &policy.escalation)
    } else {
        None
    };

    EnsembleOutcome {
        raw_probability,
        probability,
        confidence,
        tier: escalated_tier.unwrap_or(base_tier),
        agreement: AgreementBreakdown {
            pairwise,
            mean_agreement,
            variance,
            discount_factor,
            thresholds,
            escalated: escalated_tier.is_some(),
        },
    }
}

/// Annual family: fixed linear/step weighting, no variance discount.
pub fn combine_annual(linear: f64, step: f64, policy: &EnsemblePolicy) -> EnsembleOutcome {
    let scores = [
        SubModelScore::new(SubModel::Linear, linear),
        SubModelScore::new(SubModel::Step, step),
    ];
    let raw = policy.annual.linear * linear + policy.annual.step * step;
    finish(&scores, raw, 1.0, policy, false)
}

/// Quarterly family: boosted/linear/step weighting, variance discount and
/// disagreement escalation.
pub fn combine_quarterly(
    boosted: f64,
    linear: f64,
    step: f64,
    policy: &EnsemblePolicy,
) -> EnsembleOutcome {
    let scores = [
        SubModelScore::new(SubModel::Boosted, boosted),
        SubModelScore::new(SubModel::Linear, linear),
        SubModelScore::new(SubModel::Step, step),
    ];
    let w = &policy.quarterly;
    let raw = w.boosted * boosted + w.linear * linear + w.step * step;
    let variance = population_variance(&[boosted, linear, step]);
    let factor = policy.variance_discount.factor_for(variance);
    finish(&scores, raw, factor, policy, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> EnsemblePolicy {
        EnsemblePolicy::v1()
    }

    #[test]
    fn annual_weighted_average_of_disagreeing_models() {
        let wide = combine_annual(0.20, 0.80, &policy());
        assert!((wide.probability - 0.38).abs() < 1e-12);

        let tight = combine_annual(0.20, 0.22, &policy());
        assert!(wide.confidence < tight.confidence - 0.3);
    }

    #[test]
    fn near_identical_models_are_confident() {
        let annual = combine_annual(0.41, 0.415, &policy());
        assert!(annual.confidence > 0.8);

        let quarterly = combine_quarterly(0.62, 0.625, 0.618, &policy());
        assert!(quarterly.confidence > 0.8);
        assert_eq!(quarterly.agreement.discount_factor, 1.0);
    }

    #[test]
    fn quarterly_discount_tracks_variance() {
        // variance ≈ 0.0156 → 5% discount
        let moderate = combine_quarterly(0.2, 0.5, 0.4, &policy());
        assert_eq!(moderate.agreement.discount_factor, 0.95);
        assert!((moderate.probability - moderate.raw_probability * 0.95).abs() < 1e-12);

        // variance ≈ 0.159 → 10% discount
        let wide = combine_quarterly(0.05, 0.95, 0.9, &policy());
        assert_eq!(wide.agreement.discount_factor, 0.90);
    }

    #[test]
    fn confidence_is_monotone_in_agreement() {
        let calibration = policy().calibration;
        let mut last = 0.0;
        for i in 0..=100 {
            let c = calibrated_confidence(i as f64 / 100.0, &calibration);
            assert!(c >= last);
            assert!((0.0..=1.0).contains(&c));
            last = c;
        }
    }

    #[test]
    fn low_confidence_lowers_effective_thresholds() {
        let thresholds = policy().thresholds;
        let confident = effective_thresholds(0.95, &thresholds);
        let unsure = effective_thresholds(0.2, &thresholds);
        assert!((unsure.medium - 0.24).abs() < 1e-12);
        assert!((unsure.high - 0.56).abs() < 1e-12);
        assert!(unsure.high < confident.high);

        // 0.6 is Medium when confident, High when unsure
        assert_eq!(assign_tier(0.6, confident), RiskTier::Medium);
        assert_eq!(assign_tier(0.6, unsure), RiskTier::High);
    }

    #[test]
    fn escalation_requires_high_variance_and_borderline_probability() {
        let table = policy().escalation;
        let thresholds = EffectiveThresholds {
            medium: 0.24,
            high: 0.56,
        };

        assert_eq!(
            escalate_for_disagreement(RiskTier::Medium, 0.45, 0.15, thresholds, &table),
            Some(RiskTier::High)
        );
        // Not borderline: 0.56 - 0.15 = 0.41 > 0.35
        assert_eq!(
            escalate_for_disagreement(RiskTier::Medium, 0.35, 0.15, thresholds, &table),
            None
        );
        // Agreement high enough: no escalation
        assert_eq!(
            escalate_for_disagreement(RiskTier::Medium, 0.55, 0.05, thresholds, &table),
            None
        );
        assert_eq!(
            escalate_for_disagreement(RiskTier::High, 0.9, 0.2, thresholds, &table),
            None
        );
    }

    #[test]
    fn quarterly_disagreement_can_escalate() {
        // variance ≈ 0.152, raw = 0.515, discounted to ≈ 0.4635: Medium,
        // within 0.15 of the 0.56 effective High threshold
        let outcome = combine_quarterly(0.1, 0.95, 0.9, &policy());
        assert!(outcome.agreement.variance > 0.1);
        assert!(outcome.agreement.escalated);
        assert_eq!(outcome.tier, RiskTier::High);
    }

    #[test]
    fn variance_of_constant_is_zero() {
        assert_eq!(population_variance(&[0.3, 0.3, 0.3]), 0.0);
        assert_eq!(population_variance(&[]), 0.0);
    }
}

//! Reference artifacts and rows.
//!
//! Small hand-built models with the same shape as production artifacts.
//! Used by tests across the workspace and mirrored by `demos/artifacts.json`.

use crate::artifact::{
    ArtifactBundle, BoostedParams, FeatureSpec, LinearParams, ModelFamily, ScoringArtifact,
    StepParams, StepRule, Tree, TreeNode,
};
use crate::features::FeatureVector;

fn feature(name: &str, mean: f64, scale: f64, lower_bound: f64, upper_bound: f64) -> FeatureSpec {
    FeatureSpec {
        name: name.to_string(),
        mean,
        scale,
        lower_bound,
        upper_bound,
    }
}

fn rule(feature: &str, thresholds: &[f64], points: &[f64]) -> StepRule {
    StepRule {
        feature: feature.to_string(),
        thresholds: thresholds.to_vec(),
        points: points.to_vec(),
    }
}

fn shared_features() -> Vec<FeatureSpec> {
    vec![
        feature("current_ratio", 1.6, 0.9, 0.0, 50.0),
        feature("debt_to_equity", 1.2, 1.5, -10.0, 50.0),
        feature("return_on_assets", 0.05, 0.12, -5.0, 5.0),
        feature("interest_coverage", 6.0, 12.0, -100.0, 1000.0),
    ]
}

fn shared_rules() -> Vec<StepRule> {
    vec![
        rule("debt_to_equity", &[0.0, 1.5], &[-0.5, 0.3, 1.2]),
        rule("return_on_assets", &[-1.0, 0.0], &[1.0, 0.2, -0.6]),
        rule("current_ratio", &[-0.5], &[0.6, -0.3]),
    ]
}

pub fn annual_artifact() -> ScoringArtifact {
    let mut features = shared_features();
    features.push(feature("net_margin", 0.06, 0.15, -10.0, 10.0));

    ScoringArtifact {
        id: "annual-default".to_string(),
        version: "2024.1".to_string(),
        family: ModelFamily::Annual,
        features,
        linear: LinearParams {
            coefficients: vec![-0.6, 0.8, -0.9, -0.5, -0.4],
            intercept: -1.5,
        },
        step: StepParams {
            intercept: -1.2,
            rules: shared_rules(),
        },
        boosted: None,
    }
}

pub fn quarterly_artifact() -> ScoringArtifact {
    let mut features = shared_features();
    features.push(feature("revenue_growth", 0.02, 0.2, -5.0, 10.0));

    let mut rules = shared_rules();
    rules.push(rule("revenue_growth", &[-1.0], &[0.8, -0.2]));

    ScoringArtifact {
        id: "quarterly-default".to_string(),
        version: "2024.1".to_string(),
        family: ModelFamily::Quarterly,
        features,
        linear: LinearParams {
            coefficients: vec![-0.5, 0.7, -0.8, -0.4, -0.6],
            intercept: -1.4,
        },
        step: StepParams {
            intercept: -1.2,
            rules,
        },
        boosted: Some(BoostedParams {
            base_score: -1.0,
            learning_rate: 0.5,
            trees: vec![
                Tree {
                    nodes: vec![
                        TreeNode::Split {
                            feature: 1,
                            threshold: 1.0,
                            left: 1,
                            right: 2,
                        },
                        TreeNode::Leaf { value: -1.2 },
                        TreeNode::Leaf { value: 1.5 },
                    ],
                },
                Tree {
                    nodes: vec![
                        TreeNode::Split {
                            feature: 2,
                            threshold: -1.0,
                            left: 1,
                            right: 2,
                        },
                        TreeNode::Leaf { value: 1.8 },
                        TreeNode::Split {
                            feature: 0,
                            threshold: -0.5,
                            left: 3,
                            right: 4,
                        },
                        TreeNode::Leaf { value: 0.6 },
                        TreeNode::Leaf { value: -0.8 },
                    ],
                },
            ],
        }),
    }
}

pub fn reference_bundle() -> ArtifactBundle {
    ArtifactBundle {
        annual: annual_artifact(),
        quarterly: quarterly_artifact(),
    }
}

pub fn healthy_annual_row() -> FeatureVector {
    FeatureVector::new()
        .with("current_ratio", 2.4)
        .with("debt_to_equity", 0.5)
        .with("return_on_assets", 0.12)
        .with("interest_coverage", 18.0)
        .with("net_margin", 0.14)
}

pub fn distressed_annual_row() -> FeatureVector {
    FeatureVector::new()
        .with("current_ratio", 0.6)
        .with("debt_to_equity", 6.0)
        .with("return_on_assets", -0.25)
        .with("interest_coverage", 0.5)
        .with("net_margin", -0.3)
}

pub fn healthy_quarterly_row() -> FeatureVector {
    FeatureVector::new()
        .with("current_ratio", 2.4)
        .with("debt_to_equity", 0.5)
        .with("return_on_assets", 0.12)
        .with("interest_coverage", 18.0)
        .with("revenue_growth", 0.08)
}

pub fn distressed_quarterly_row() -> FeatureVector {
    FeatureVector::new()
        .with("current_ratio", 0.6)
        .with("debt_to_equity", 6.0)
        .with("return_on_assets", -0.25)
        .with("interest_coverage", 0.5)
        .with("revenue_growth", -0.4)
}

/// Linear blend between the healthy (`t = 0`) and distressed (`t = 1`) rows.
pub fn blended_row(family: ModelFamily, t: f64) -> FeatureVector {
    let (healthy, distressed) = match family {
        ModelFamily::Annual => (healthy_annual_row(), distressed_annual_row()),
        ModelFamily::Quarterly => (healthy_quarterly_row(), distressed_quarterly_row()),
    };
    let pairs: Vec<(String, f64)> = healthy
        .names()
        .map(|name| {
            let a = healthy.get(name).unwrap_or_default();
            let b = distressed.get(name).unwrap_or(a);
            (name.to_string(), a + (b - a) * t)
        })
        .collect();
    FeatureVector::from_pairs(pairs)
}

/// `n` rows evenly spread from healthy to distressed.
pub fn row_sweep(family: ModelFamily, n: usize) -> Vec<FeatureVector> {
    let denom = n.saturating_sub(1).max(1) as f64;
    (0..n).map(|i| blended_row(family, i as f64 / denom)).collect()
}

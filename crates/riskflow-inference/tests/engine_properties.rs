//! Behavioral properties of the ensemble inference engine.

use riskflow_inference::ensemble::{combine_annual, combine_quarterly};
use riskflow_inference::fixtures;
use riskflow_inference::{
    infer, ArtifactStore, EnsemblePolicy, InferenceEngine, InferenceError, ModelFamily, Scorer,
};

fn engine() -> InferenceEngine {
    let store = ArtifactStore::from_bundle(fixtures::reference_bundle()).expect("bundle");
    InferenceEngine::new(store, EnsemblePolicy::v1()).expect("engine")
}

#[test]
fn probabilities_and_confidence_stay_in_unit_interval() {
    let engine = engine();
    for family in [ModelFamily::Annual, ModelFamily::Quarterly] {
        for row in fixtures::row_sweep(family, 41) {
            let result = engine.score(family, &row).expect("valid row");
            assert!((0.0..=1.0).contains(&result.ensemble_probability));
            assert!((0.0..=1.0).contains(&result.confidence));
            for sub in &result.sub_models {
                assert!((0.0..=1.0).contains(&sub.probability));
            }
        }
    }
}

#[test]
fn extreme_but_plausible_rows_stay_in_unit_interval() {
    let engine = engine();
    let row = fixtures::distressed_annual_row()
        .with("debt_to_equity", 50.0)
        .with("return_on_assets", -5.0)
        .with("interest_coverage", -100.0);
    let result = engine.score(ModelFamily::Annual, &row).unwrap();
    assert!((0.0..=1.0).contains(&result.ensemble_probability));
}

#[test]
fn inference_is_bit_identical_on_repeat() {
    let engine = engine();
    for family in [ModelFamily::Annual, ModelFamily::Quarterly] {
        for row in fixtures::row_sweep(family, 9) {
            let a = engine.score(family, &row).unwrap();
            let b = engine.score(family, &row).unwrap();
            assert_eq!(a, b);
            assert_eq!(
                a.ensemble_probability.to_bits(),
                b.ensemble_probability.to_bits()
            );
            assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
        }
    }
}

#[test]
fn agreement_within_one_hundredth_gives_high_confidence() {
    let policy = EnsemblePolicy::v1();
    let mut p = 0.0;
    while p <= 0.99 {
        let annual = combine_annual(p, p + 0.01, &policy);
        assert!(annual.confidence > 0.8, "annual p={p}");

        let quarterly = combine_quarterly(p, p + 0.005, p + 0.01, &policy);
        assert!(quarterly.confidence > 0.8, "quarterly p={p}");
        p += 0.05;
    }
}

#[test]
fn documented_annual_example() {
    let policy = EnsemblePolicy::v1();
    let disagreeing = combine_annual(0.20, 0.80, &policy);
    let agreeing = combine_annual(0.20, 0.22, &policy);

    assert!((disagreeing.probability - 0.38).abs() < 1e-12);
    assert!(disagreeing.confidence < 0.5);
    assert!(agreeing.confidence > 0.9);
}

#[test]
fn missing_required_feature_is_rejected_not_defaulted() {
    let store = ArtifactStore::from_bundle(fixtures::reference_bundle()).unwrap();
    let mut row = fixtures::healthy_quarterly_row();
    row.remove("revenue_growth");

    let err = infer(&row, store.get(ModelFamily::Quarterly), &EnsemblePolicy::v1()).unwrap_err();
    match err {
        InferenceError::InvalidFeature { feature, .. } => assert_eq!(feature, "revenue_growth"),
        other => panic!("expected InvalidFeature, got {other:?}"),
    }
}

#[test]
fn annual_row_against_quarterly_artifact_is_a_mismatch_or_invalid() {
    let engine = engine();
    // The annual row lacks revenue_growth, so the most specific failure is
    // the missing feature; a complete row with an extra key is a mismatch.
    let err = engine
        .score(ModelFamily::Quarterly, &fixtures::healthy_annual_row())
        .unwrap_err();
    assert!(matches!(err, InferenceError::InvalidFeature { .. }));

    let row = fixtures::healthy_quarterly_row().with("net_margin", 0.1);
    let err = engine.score(ModelFamily::Quarterly, &row).unwrap_err();
    assert!(matches!(err, InferenceError::ArtifactMismatch { .. }));
    assert!(err.is_fatal());
}

//! Isolation-forest training, inference, persistence, and the
//! not-trained fail-safe.

use walletrisk_core::{
    config::RiskConfig,
    decision::Decision,
    error::RiskError,
    features::FeatureVector,
    model::{self, ModelArtifact, FEATURE_NAMES},
    pipeline::RiskPipeline,
    store::{HistoryRow, LedgerStore},
    transaction::{parse_timestamp, Transaction, TxRequest},
};

/// A month of well-behaved activity for a handful of sources:
/// mid-morning transfers, stable amounts, one location.
fn normal_rows() -> Vec<HistoryRow> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut rows = Vec::new();
    for s in 0..5 {
        let source_id = format!("w-{s}");
        for day in 0..30 {
            for k in 0..3 {
                // 2025-01-01 00:00:00 UTC is epoch 1735689600.
                let epoch = 1_735_689_600 + day * 86_400 + (9 + k) * 3_600 + s * 60;
                rows.push(HistoryRow {
                    source_id: source_id.clone(),
                    epoch,
                    amount: 100.0 + (day % 7) as f64 * 5.0 + k as f64,
                    latitude: Some(52.5 + s as f64 * 0.01),
                    longitude: Some(13.4 + s as f64 * 0.01),
                });
            }
        }
    }
    rows.sort_by(|a, b| a.source_id.cmp(&b.source_id).then(a.epoch.cmp(&b.epoch)));
    rows
}

#[test]
fn outliers_score_higher_than_typical_points() {
    let cfg = RiskConfig::default();
    let artifact = model::train(&normal_rows(), 30, 0.05, &cfg).expect("train");

    // A typical vector: amount at the mean, usual hour, at home.
    let typical = vec![110.0, 1.0, 0.1, 0.0, 0.7, -0.7, 0.5, 0.2];
    // A grotesque vector: huge amount and ratio, burst, far from home.
    let outlier = vec![50_000.0, 400.0, 60.0, 8.0, 0.7, -0.7, 9.0, 2_000.0];

    let s_typical = artifact.score_vector(&typical);
    let s_outlier = artifact.score_vector(&outlier);
    assert!((0.0..=1.0).contains(&s_typical));
    assert!((0.0..=1.0).contains(&s_outlier));
    assert!(
        s_outlier > s_typical,
        "outlier {s_outlier} must out-score typical {s_typical}"
    );
    assert!(
        artifact.is_anomalous(s_outlier),
        "outlier {s_outlier} should clear the threshold {}",
        artifact.score_threshold
    );
}

#[test]
fn training_is_deterministic_for_a_fixed_seed() {
    let cfg = RiskConfig::default();
    let rows = normal_rows();
    let a = model::train(&rows, 30, 0.05, &cfg).expect("first");
    let b = model::train(&rows, 30, 0.05, &cfg).expect("second");

    // Identity and wall-clock metadata differ; the learned state must not.
    assert_eq!(
        serde_json::to_string(&a.trees).expect("trees a"),
        serde_json::to_string(&b.trees).expect("trees b"),
        "same seed must grow identical forests"
    );
    assert_eq!(a.imputation, b.imputation);
    assert_eq!(a.score_threshold, b.score_threshold);
    assert_eq!(a.subsample, b.subsample);
}

#[test]
fn artifact_round_trips_through_disk() {
    let cfg = RiskConfig::default();
    let artifact = model::train(&normal_rows(), 30, 0.05, &cfg).expect("train");

    let path = std::env::temp_dir().join(format!("walletrisk-artifact-{}.json", std::process::id()));
    let path = path.to_string_lossy().to_string();
    artifact.save_to_file(&path).expect("save");
    let reloaded = ModelArtifact::from_file(&path).expect("load");
    std::fs::remove_file(&path).ok();

    assert_eq!(reloaded.artifact_id, artifact.artifact_id);
    assert_eq!(reloaded.feature_names, FEATURE_NAMES.to_vec());
    let probe = vec![500.0, 4.0, 3.0, 2.0, 0.5, 0.5, 4.0, 100.0];
    assert_eq!(
        reloaded.score_vector(&probe),
        artifact.score_vector(&probe),
        "a reloaded artifact must score identically"
    );
}

#[test]
fn imputation_fills_not_applicable_entries() {
    let cfg = RiskConfig::default();
    let artifact = model::train(&normal_rows(), 30, 0.05, &cfg).expect("train");

    let mut sparse = vec![110.0, f64::NAN, f64::NAN, 0.0, 0.7, -0.7, f64::NAN, f64::NAN];
    let s_sparse = artifact.score_vector(&sparse);
    // Scoring with the medians substituted explicitly must agree.
    for (i, v) in sparse.iter_mut().enumerate() {
        if !v.is_finite() {
            *v = artifact.imputation[i];
        }
    }
    assert_eq!(s_sparse, artifact.score_vector(&sparse));
}

#[test]
fn online_inputs_gate_mean_features_like_training() {
    let cfg = RiskConfig::default();
    // One sample: the mean exists but is below the baseline minimum,
    // so every mean-derived entry must stay not-applicable.
    let f = FeatureVector {
        amount: 500.0,
        hour: 11,
        sample_count: 1,
        mean_amount: Some(100.0),
        std_amount: None,
        z_amount: None,
        count_10m: 0,
        same_target_10m: 0,
        distance_from_home_km: None,
        distance_from_last_km: None,
        time_since_last_h: None,
        speed_kmh: None,
        hour_delta_from_avg: None,
        device_seen_recently: None,
        device_switched_fast: None,
    };
    let x = model::model_input(&f, &cfg);
    assert_eq!(FEATURE_NAMES[1], "amount_ratio_to_mean");
    assert!(
        x[1].is_nan(),
        "ratio from an under-minimum mean must be imputed, got {}",
        x[1]
    );
    assert!(x[2].is_nan(), "z entry");
    assert!(x[6].is_nan(), "hour-delta entry");
    assert_eq!(x[0], 500.0);
}

#[test]
fn training_burst_counts_use_the_half_open_window() {
    let cfg = RiskConfig::default();
    let row = |epoch: i64| HistoryRow {
        source_id: "w-1".to_string(),
        epoch,
        amount: 100.0,
        latitude: None,
        longitude: None,
    };
    let rows = vec![row(1_000), row(1_000), row(1_600), row(1_700)];

    let matrix = model::training_matrix(&rows, &cfg);
    assert_eq!(FEATURE_NAMES[3], "count_10m");
    assert_eq!(matrix[0][3], 0.0);
    assert_eq!(matrix[1][3], 0.0, "a same-epoch row sits outside its own window");
    assert_eq!(matrix[2][3], 2.0, "rows exactly 600s back are inside");
    assert_eq!(matrix[3][3], 1.0, "rows 700s back have aged out");
}

#[test]
fn model_path_before_training_reviews_instead_of_crashing() {
    let store = LedgerStore::in_memory().expect("store");
    store.migrate().expect("migration");
    let pipeline = RiskPipeline::new(store, RiskConfig::default()).expect("pipeline");

    let req: TxRequest = serde_json::from_value(serde_json::json!({
        "timestamp": "2025-06-01_12:00:00",
        "source_id": "w-1",
        "target_id": "w-2",
        "amount": 10.0,
        "category": "transfer",
    }))
    .expect("request");

    let a = pipeline.score_with_model(&req).expect("fail-safe result");
    assert_eq!(a.decision, Decision::Review);
    assert!(a.reasons[0].contains("training"), "reasons: {:?}", a.reasons);
}

#[test]
fn empty_ledger_refuses_to_train() {
    let store = LedgerStore::in_memory().expect("store");
    store.migrate().expect("migration");
    let pipeline = RiskPipeline::new(store, RiskConfig::default()).expect("pipeline");

    match pipeline.train_model(90, 0.02) {
        Err(RiskError::EmptyTrainingWindow { window_days }) => assert_eq!(window_days, 90),
        other => panic!("expected an empty-window error, got {other:?}"),
    }
}

#[test]
fn end_to_end_training_installs_and_scores() {
    let store = LedgerStore::in_memory().expect("store");
    store.migrate().expect("migration");
    for day in 1..=28 {
        for hour in [9, 10, 11] {
            let tx = Transaction {
                ts: parse_timestamp(&format!("2025-05-{day:02}_{hour:02}:00:00")).expect("ts"),
                source_id: "w-1".into(),
                target_id: "w-2".into(),
                amount: 100.0 + (day % 5) as f64,
                category: "transfer".into(),
                latitude: Some(52.5),
                longitude: Some(13.4),
                device_id: Some("d1".into()),
            };
            store.insert_transaction(&tx, true).expect("insert");
        }
    }
    let pipeline = RiskPipeline::new(store, RiskConfig::default()).expect("pipeline");

    let (report, artifact) = pipeline.train_model(30, 0.05).expect("train");
    assert!(report.ok);
    assert_eq!(report.sample_count, 28 * 3);
    assert_eq!(report.feature_names, FEATURE_NAMES.to_vec());
    assert!(pipeline.artifact_installed());
    assert!((0.0..1.0).contains(&artifact.score_threshold));

    let req: TxRequest = serde_json::from_value(serde_json::json!({
        "timestamp": "2025-05-28_11:30:00",
        "source_id": "w-1",
        "target_id": "w-2",
        "amount": 102.0,
        "category": "transfer",
        "latitude": 52.5,
        "longitude": 13.4,
        "device_id": "d1",
    }))
    .expect("request");

    let a = pipeline.score_with_model(&req).expect("model score");
    assert!((0.0..=1.0).contains(&a.risk_score));
    assert!(a.rule_hits.is_empty(), "model path reports no rule hits");
    assert_eq!(
        a.evidence.model_artifact_id.as_deref(),
        Some(artifact.artifact_id.as_str())
    );
}

//! End-to-end pipeline scenarios: request JSON in, decision out.

use walletrisk_core::{
    config::RiskConfig,
    decision::{Decision, RiskAssessment},
    error::RiskError,
    pipeline::RiskPipeline,
    store::LedgerStore,
    transaction::{parse_timestamp, Transaction, TxRequest},
};

fn pipeline_with(history: &[(&str, &str, &str, f64)]) -> RiskPipeline {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = LedgerStore::in_memory().expect("store");
    store.migrate().expect("migration");
    for (ts, source, target, amount) in history {
        let tx = Transaction {
            ts: parse_timestamp(ts).expect("test timestamp"),
            source_id: source.to_string(),
            target_id: target.to_string(),
            amount: *amount,
            category: "transfer".to_string(),
            latitude: None,
            longitude: None,
            device_id: None,
        };
        store.insert_transaction(&tx, true).expect("insert");
    }
    RiskPipeline::new(store, RiskConfig::default()).expect("pipeline")
}

fn request(ts: &str, source: &str, target: &str, amount: f64) -> TxRequest {
    serde_json::from_value(serde_json::json!({
        "timestamp": ts,
        "source_id": source,
        "target_id": target,
        "amount": amount,
        "category": "transfer",
    }))
    .expect("request json")
}

#[test]
fn extreme_amount_z_blocks() {
    // 30-day mean 100,000 with modest spread; 800,000 is a massive z.
    let pipeline = pipeline_with(&[
        ("2025-06-01_10:00:00", "w-1", "w-2", 90_000.0),
        ("2025-06-02_10:00:00", "w-1", "w-2", 95_000.0),
        ("2025-06-03_10:00:00", "w-1", "w-2", 100_000.0),
        ("2025-06-04_10:00:00", "w-1", "w-2", 105_000.0),
        ("2025-06-05_10:00:00", "w-1", "w-2", 110_000.0),
    ]);

    let a = pipeline
        .score(&request("2025-06-10_10:00:00", "w-1", "w-2", 800_000.0))
        .expect("scored");
    assert_eq!(a.decision, Decision::Block);
    assert!(a.rule_hits.contains(&"amount-z-severe".to_string()));
    assert!(
        a.reasons.iter().any(|r| r.contains("z-score")),
        "reasons must name the measurement: {:?}",
        a.reasons
    );
}

#[test]
fn burst_blocks_independent_of_amount() {
    // Six transfers in the trailing ten minutes, all tiny amounts.
    let pipeline = pipeline_with(&[
        ("2025-06-01_11:51:00", "w-1", "w-2", 1.0),
        ("2025-06-01_11:52:00", "w-1", "w-3", 1.0),
        ("2025-06-01_11:53:00", "w-1", "w-4", 1.0),
        ("2025-06-01_11:55:00", "w-1", "w-5", 1.0),
        ("2025-06-01_11:57:00", "w-1", "w-6", 1.0),
        ("2025-06-01_11:59:00", "w-1", "w-7", 1.0),
    ]);

    let a = pipeline
        .score(&request("2025-06-01_12:00:00", "w-1", "w-8", 1.0))
        .expect("scored");
    assert_eq!(a.decision, Decision::Block);
    assert!(a.rule_hits.contains(&"burst-count-severe".to_string()));
}

#[test]
fn thin_history_limits_rules_to_counts() {
    // One prior transaction: no z-baseline exists, so even an absurd
    // amount cannot fire the amount rules.
    let pipeline = pipeline_with(&[("2025-06-01_10:00:00", "w-1", "w-2", 50.0)]);

    let a = pipeline
        .score(&request("2025-06-02_10:00:00", "w-1", "w-2", 999_999_999.0))
        .expect("scored");
    assert!(
        !a.rule_hits.iter().any(|id| id.starts_with("amount-z")),
        "amount rules fired without a baseline: {:?}",
        a.rule_hits
    );
    assert_eq!(a.evidence.sample_count, Some(1));
    assert_eq!(a.evidence.z_amount, None);
}

#[test]
fn thin_history_cannot_mark_an_hour_odd() {
    // One prior transfer at 23:00 is a data point, not a habit: the
    // typical-hour baseline needs the sample minimum before the
    // odd-hour rule may fire, even for an absolutely high amount.
    let pipeline = pipeline_with(&[("2025-06-01_23:00:00", "w-1", "w-2", 50.0)]);

    let a = pipeline
        .score(&request("2025-06-02_11:00:00", "w-1", "w-2", 3_000_000.0))
        .expect("scored");
    assert!(a.rule_hits.is_empty(), "unexpected hits: {:?}", a.rule_hits);
    assert_eq!(a.decision, Decision::Approve);
    assert_eq!(a.evidence.hour_delta_from_avg, None);
}

#[test]
fn impossible_travel_is_a_hard_block_despite_low_score() {
    let store = LedgerStore::in_memory().expect("store");
    store.migrate().expect("migration");
    let prior = Transaction {
        ts: parse_timestamp("2025-06-01_10:00:00").expect("ts"),
        source_id: "w-1".into(),
        target_id: "w-2".into(),
        amount: 10.0,
        category: "transfer".into(),
        latitude: Some(0.0),
        longitude: Some(0.0),
        device_id: Some("d1".into()),
    };
    store.insert_transaction(&prior, true).expect("insert");
    let pipeline = RiskPipeline::new(store, RiskConfig::default()).expect("pipeline");

    let req: TxRequest = serde_json::from_value(serde_json::json!({
        "timestamp": "2025-06-01_11:00:00",
        "source_id": "w-1",
        "target_id": "w-2",
        "amount": 10.0,
        "category": "transfer",
        "latitude": 10.0,
        "longitude": 0.0,
        "device_id": "d1",
    }))
    .expect("request");

    let a = pipeline.score(&req).expect("scored");
    assert_eq!(a.rule_hits, vec!["impossible-travel".to_string()]);
    // Weight 0.50 is below the block cutoff; the override still blocks.
    assert!(a.risk_score < RiskConfig::default().block_cutoff);
    assert_eq!(a.decision, Decision::Block);
}

#[test]
fn clean_transaction_approves_with_complete_evidence() {
    let pipeline = pipeline_with(&[
        ("2025-06-01_10:00:00", "w-1", "w-2", 90.0),
        ("2025-06-02_10:00:00", "w-1", "w-2", 95.0),
        ("2025-06-03_10:00:00", "w-1", "w-2", 100.0),
        ("2025-06-04_10:00:00", "w-1", "w-2", 105.0),
        ("2025-06-05_10:00:00", "w-1", "w-2", 110.0),
    ]);

    let a = pipeline
        .score(&request("2025-06-10_10:00:00", "w-1", "w-2", 100.0))
        .expect("scored");
    assert_eq!(a.decision, Decision::Approve);
    assert_eq!(a.risk_score, 0.0);
    assert!(a.rule_hits.is_empty());
    assert_eq!(a.reasons, vec!["no rule violated".to_string()]);
    // The audit trail is complete even on approve.
    assert_eq!(a.evidence.source_id.as_deref(), Some("w-1"));
    assert_eq!(a.evidence.amount, Some(100.0));
    assert_eq!(a.evidence.sample_count, Some(5));
    assert!(a.evidence.capabilities.is_some());
}

#[test]
fn single_warn_rule_yields_review() {
    let pipeline = pipeline_with(&[
        ("2025-06-01_11:53:00", "w-1", "w-2", 1.0),
        ("2025-06-01_11:55:00", "w-1", "w-3", 1.0),
        ("2025-06-01_11:57:00", "w-1", "w-4", 1.0),
    ]);

    let a = pipeline
        .score(&request("2025-06-01_12:00:00", "w-1", "w-8", 1.0))
        .expect("scored");
    assert_eq!(a.rule_hits, vec!["burst-count-warn".to_string()]);
    assert!(a.risk_score < RiskConfig::default().review_cutoff);
    assert_eq!(
        a.decision,
        Decision::Review,
        "any fired rule escalates past approve"
    );
}

#[test]
fn missing_amount_names_the_field_and_yields_no_decision() {
    let pipeline = pipeline_with(&[]);
    let req: TxRequest = serde_json::from_value(serde_json::json!({
        "timestamp": "2025-06-01_12:00:00",
        "source_id": "w-1",
        "target_id": "w-2",
        "category": "transfer",
    }))
    .expect("request");

    match pipeline.score(&req) {
        Err(RiskError::MissingField { field }) => assert_eq!(field, "amount"),
        other => panic!("expected a missing-field error, got {other:?}"),
    }
}

#[test]
fn malformed_timestamp_is_an_input_error() {
    let pipeline = pipeline_with(&[]);
    let req: TxRequest = serde_json::from_value(serde_json::json!({
        "timestamp": "2025/06/01 12:00",
        "source_id": "w-1",
        "target_id": "w-2",
        "amount": "12.50",
        "category": "transfer",
    }))
    .expect("request");

    match pipeline.score(&req) {
        Err(RiskError::InvalidField { field, reason }) => {
            assert_eq!(field, "timestamp");
            assert!(!reason.is_empty());
        }
        other => panic!("expected an invalid-timestamp error, got {other:?}"),
    }
}

#[test]
fn string_amounts_are_accepted() {
    let pipeline = pipeline_with(&[]);
    let req: TxRequest = serde_json::from_value(serde_json::json!({
        "timestamp": "2025-06-01_12:00:00",
        "source_id": "w-1",
        "target_id": "w-2",
        "amount": "12.50",
        "category": "transfer",
    }))
    .expect("request");

    let a = pipeline.score(&req).expect("scored");
    assert_eq!(a.evidence.amount, Some(12.50));
}

#[test]
fn identical_inputs_yield_identical_assessments() {
    let pipeline = pipeline_with(&[
        ("2025-06-01_11:53:00", "w-1", "w-2", 120.0),
        ("2025-06-01_11:55:00", "w-1", "w-2", 80.0),
        ("2025-06-01_11:57:00", "w-1", "w-2", 100.0),
    ]);
    let req = request("2025-06-01_12:00:00", "w-1", "w-2", 100.0);

    let a = pipeline.score(&req).expect("first");
    let b = pipeline.score(&req).expect("second");
    assert_eq!(
        serde_json::to_string(&a).expect("json a"),
        serde_json::to_string(&b).expect("json b"),
        "same transaction and ledger state must reproduce the assessment exactly"
    );
}

#[test]
fn fallback_constructors_are_conservative() {
    let fallback = RiskAssessment::system_fallback("ledger query timed out");
    assert_eq!(fallback.decision, Decision::Review);
    assert!(fallback.reasons[0].contains("manual review"));
    assert_eq!(
        fallback.evidence.error.as_deref(),
        Some("ledger query timed out")
    );

    let untrained = RiskAssessment::model_not_trained();
    assert_eq!(untrained.decision, Decision::Review);
    assert!(untrained.reasons[0].contains("training"));
}

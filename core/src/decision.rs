//! Decision gate: combines rule hits and the risk score into the final
//! decision, with a complete audit trail.
//!
//! RULE: A RiskAssessment is assembled once, in full, and never mutated.
//! Evidence is complete even for an "approve"; that is the audit trail.

use crate::{
    capability::CapabilitySet,
    config::RiskConfig,
    features::FeatureVector,
    rules::Rule,
    transaction::Transaction,
};
use serde::{Deserialize, Serialize};

/// Fallback score reported when the system itself failed and the
/// conservative "review" decision is substituted.
const FALLBACK_SCORE: f64 = 0.60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Review,
    Block,
}

/// Structured snapshot of everything the decision was based on.
/// Numeric values are rounded for display; the raw transaction fields
/// are carried verbatim.
#[derive(Debug, Clone, Serialize)]
pub struct Evidence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_10m: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_target_10m: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_from_home_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_from_last_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_since_last_h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour_delta_from_avg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_seen_recently: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_switched_fast: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilitySet>,
    /// Anomaly-model artifact used, when the model path produced this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_artifact_id: Option<String>,
    /// Present only on fail-safe fallbacks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Evidence {
    pub fn from_parts(tx: &Transaction, f: &FeatureVector, caps: CapabilitySet) -> Self {
        Self {
            timestamp: Some(tx.ts_text()),
            source_id: Some(tx.source_id.clone()),
            target_id: Some(tx.target_id.clone()),
            amount: Some(tx.amount),
            category: Some(tx.category.clone()),
            latitude: tx.latitude,
            longitude: tx.longitude,
            device_id: tx.device_id.clone(),
            sample_count: Some(f.sample_count),
            mean_amount: f.mean_amount.map(round3),
            std_amount: f.std_amount.map(round3),
            z_amount: f.z_amount.map(round3),
            count_10m: Some(f.count_10m),
            same_target_10m: Some(f.same_target_10m),
            distance_from_home_km: f.distance_from_home_km.map(round3),
            distance_from_last_km: f.distance_from_last_km.map(round3),
            time_since_last_h: f.time_since_last_h.map(round3),
            speed_kmh: f.speed_kmh.map(round3),
            hour: Some(f.hour),
            hour_delta_from_avg: f.hour_delta_from_avg.map(round3),
            device_seen_recently: f.device_seen_recently,
            device_switched_fast: f.device_switched_fast,
            capabilities: Some(caps),
            model_artifact_id: None,
            error: None,
        }
    }

    fn unavailable(reason: &str) -> Self {
        Self {
            timestamp: None,
            source_id: None,
            target_id: None,
            amount: None,
            category: None,
            latitude: None,
            longitude: None,
            device_id: None,
            sample_count: None,
            mean_amount: None,
            std_amount: None,
            z_amount: None,
            count_10m: None,
            same_target_10m: None,
            distance_from_home_km: None,
            distance_from_last_km: None,
            time_since_last_h: None,
            speed_kmh: None,
            hour: None,
            hour_delta_from_avg: None,
            device_seen_recently: None,
            device_switched_fast: None,
            capabilities: None,
            model_artifact_id: None,
            error: Some(reason.to_string()),
        }
    }
}

/// The immutable result of one pipeline evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub decision: Decision,
    /// Risk score in [0, 1], rounded to 3 decimals.
    pub risk_score: f64,
    pub rule_hits: Vec<String>,
    pub reasons: Vec<String>,
    pub evidence: Evidence,
}

impl RiskAssessment {
    /// Fail-safe result for a system-side failure: conservative
    /// "review" rather than a silent approve.
    pub fn system_fallback(reason: &str) -> Self {
        Self {
            decision: Decision::Review,
            risk_score: FALLBACK_SCORE,
            rule_hits: Vec::new(),
            reasons: vec![format!(
                "risk evaluation unavailable ({reason}); manual review required"
            )],
            evidence: Evidence::unavailable(reason),
        }
    }

    /// Conservative result for a model-path request before any
    /// artifact has been trained.
    pub fn model_not_trained() -> Self {
        let reason = "anomaly model has not been trained";
        Self {
            decision: Decision::Review,
            risk_score: FALLBACK_SCORE,
            rule_hits: Vec::new(),
            reasons: vec![format!("{reason}; run a training pass before model scoring")],
            evidence: Evidence::unavailable(reason),
        }
    }
}

/// Combine rule hits and the weighted score into the final decision and
/// assemble the full assessment.
pub fn decide(
    tx: &Transaction,
    features: &FeatureVector,
    caps: CapabilitySet,
    hits: &[Rule],
    risk_score: f64,
    config: &RiskConfig,
) -> RiskAssessment {
    let hard_override = hits.iter().any(Rule::is_hard_override);
    let decision = if hard_override || risk_score >= config.block_cutoff {
        Decision::Block
    } else if risk_score >= config.review_cutoff || !hits.is_empty() {
        Decision::Review
    } else {
        Decision::Approve
    };

    let reasons = if hits.is_empty() {
        vec!["no rule violated".to_string()]
    } else {
        hits.iter().map(|r| r.reason(features, config)).collect()
    };

    RiskAssessment {
        decision,
        risk_score: round3(risk_score),
        rule_hits: hits.iter().map(|r| r.id().to_string()).collect(),
        reasons,
        evidence: Evidence::from_parts(tx, features, caps),
    }
}

/// Decision for the model-only path: cutoffs, no rule hits.
pub fn decide_from_model_score(
    tx: &Transaction,
    features: &FeatureVector,
    caps: CapabilitySet,
    anomaly_score: f64,
    artifact_id: &str,
    config: &RiskConfig,
) -> RiskAssessment {
    let decision = if anomaly_score >= config.block_cutoff {
        Decision::Block
    } else if anomaly_score >= config.review_cutoff {
        Decision::Review
    } else {
        Decision::Approve
    };
    let mut evidence = Evidence::from_parts(tx, features, caps);
    evidence.model_artifact_id = Some(artifact_id.to_string());
    RiskAssessment {
        decision,
        risk_score: round3(anomaly_score),
        rule_hits: Vec::new(),
        reasons: vec![format!(
            "anomaly model score {:.3} (review at {:.2}, block at {:.2})",
            anomaly_score, config.review_cutoff, config.block_cutoff
        )],
        evidence,
    }
}

pub(crate) fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

//! Pipeline configuration: rule thresholds, rule weights, decision
//! cutoffs, and anomaly-model hyperparameters.
//!
//! Every threshold the rule engine consults lives here, with defaults
//! matching the production wallet service. A JSON config file may
//! override any subset of fields (`#[serde(default)]`).

use crate::error::RiskResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Minimum 30-day sample count before z-score and geo baselines apply.
    pub min_baseline_samples: i64,
    /// z-score at or above which the severe amount rule fires.
    pub z_severe: f64,
    /// z-score at or above which the warn amount rule fires.
    pub z_warn: f64,
    /// z-score at or above which an amount counts as "high" for the
    /// compound device/hour rules.
    pub z_high_amount: f64,
    /// Absolute amount that counts as "high" regardless of baseline.
    pub high_amount_abs: f64,
    /// 10-minute source transaction count for the severe burst rule.
    pub burst_severe: i64,
    /// 10-minute source transaction count for the warn burst rule.
    pub burst_warn: i64,
    /// 10-minute same-target count for the repeat-target rule.
    pub repeat_target_warn: i64,
    /// Distance from the home centroid considered "far", in km.
    pub far_km: f64,
    /// Local hours treated as night for the far-at-night rule.
    pub night_hours: Vec<u32>,
    /// Circular hour delta at or above which an hour is "odd".
    pub odd_hour_delta: f64,
    /// Implied travel speed considered physically impossible, in km/h.
    pub impossible_speed_kmh: f64,
    /// Device lookback window for the novelty check, in days.
    pub device_lookback_days: u32,
    /// Maximum elapsed hours for a device switch to count as "fast".
    pub device_switch_max_hours: f64,
    /// Risk score at or above which the decision is "block".
    pub block_cutoff: f64,
    /// Risk score at or above which the decision is "review".
    pub review_cutoff: f64,
    pub weights: RuleWeights,
    pub model: ModelConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_baseline_samples: 5,
            z_severe: 4.0,
            z_warn: 2.5,
            z_high_amount: 2.0,
            high_amount_abs: 3_000_000.0,
            burst_severe: 5,
            burst_warn: 3,
            repeat_target_warn: 3,
            far_km: 500.0,
            night_hours: vec![2, 3, 4, 5],
            odd_hour_delta: 6.0,
            impossible_speed_kmh: 600.0,
            device_lookback_days: 90,
            device_switch_max_hours: 1.0,
            block_cutoff: 0.85,
            review_cutoff: 0.60,
            weights: RuleWeights::default(),
            model: ModelConfig::default(),
        }
    }
}

impl RiskConfig {
    /// Load a config file, falling back to defaults for absent fields.
    pub fn from_file(path: &str) -> RiskResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: RiskConfig = serde_json::from_str(&content)?;
        Ok(config)
    }
}

/// Per-rule contribution to the aggregate risk score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleWeights {
    pub amount_z_severe: f64,
    pub amount_z_warn: f64,
    pub burst_count_severe: f64,
    pub burst_count_warn: f64,
    pub repeat_target_warn: f64,
    pub new_device_high_amount: f64,
    pub fast_device_switch: f64,
    pub far_at_night: f64,
    pub impossible_travel: f64,
    pub odd_hour_high_amount: f64,
}

impl Default for RuleWeights {
    fn default() -> Self {
        Self {
            amount_z_severe: 0.60,
            amount_z_warn: 0.35,
            burst_count_severe: 0.40,
            burst_count_warn: 0.25,
            repeat_target_warn: 0.30,
            new_device_high_amount: 0.30,
            fast_device_switch: 0.20,
            far_at_night: 0.25,
            impossible_travel: 0.50,
            odd_hour_high_amount: 0.25,
        }
    }
}

/// Isolation-forest training hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Number of trees in the forest.
    pub n_estimators: usize,
    /// Subsample size per tree (capped at the training-set size).
    pub max_samples: usize,
    /// Master seed for reproducible training.
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            seed: 42,
        }
    }
}

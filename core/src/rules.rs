//! Threshold rule engine.
//!
//! Rules are a closed enum: id, weight, override status, and reason text
//! all live on the variant, so adding a rule is one new variant plus one
//! evaluation branch — no scattered string literals.
//!
//! Severity pairs (amount z, burst count) are mutually exclusive: the
//! stricter threshold is checked first and short-circuits the looser one.

use crate::{
    config::{RiskConfig, RuleWeights},
    features::FeatureVector,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    AmountZSevere,
    AmountZWarn,
    BurstCountSevere,
    BurstCountWarn,
    RepeatTargetWarn,
    NewDeviceHighAmount,
    FastDeviceSwitch,
    FarAtNight,
    ImpossibleTravel,
    OddHourHighAmount,
}

impl Rule {
    pub const ALL: [Rule; 10] = [
        Rule::AmountZSevere,
        Rule::AmountZWarn,
        Rule::BurstCountSevere,
        Rule::BurstCountWarn,
        Rule::RepeatTargetWarn,
        Rule::NewDeviceHighAmount,
        Rule::FastDeviceSwitch,
        Rule::FarAtNight,
        Rule::ImpossibleTravel,
        Rule::OddHourHighAmount,
    ];

    /// Stable wire identifier for the rule.
    pub fn id(&self) -> &'static str {
        match self {
            Rule::AmountZSevere => "amount-z-severe",
            Rule::AmountZWarn => "amount-z-warn",
            Rule::BurstCountSevere => "burst-count-severe",
            Rule::BurstCountWarn => "burst-count-warn",
            Rule::RepeatTargetWarn => "repeat-target-warn",
            Rule::NewDeviceHighAmount => "new-device-high-amount",
            Rule::FastDeviceSwitch => "fast-device-switch",
            Rule::FarAtNight => "far-at-night",
            Rule::ImpossibleTravel => "impossible-travel",
            Rule::OddHourHighAmount => "odd-hour-high-amount",
        }
    }

    pub fn weight(&self, w: &RuleWeights) -> f64 {
        match self {
            Rule::AmountZSevere => w.amount_z_severe,
            Rule::AmountZWarn => w.amount_z_warn,
            Rule::BurstCountSevere => w.burst_count_severe,
            Rule::BurstCountWarn => w.burst_count_warn,
            Rule::RepeatTargetWarn => w.repeat_target_warn,
            Rule::NewDeviceHighAmount => w.new_device_high_amount,
            Rule::FastDeviceSwitch => w.fast_device_switch,
            Rule::FarAtNight => w.far_at_night,
            Rule::ImpossibleTravel => w.impossible_travel,
            Rule::OddHourHighAmount => w.odd_hour_high_amount,
        }
    }

    /// Hard overrides force "block" regardless of the numeric score.
    pub fn is_hard_override(&self) -> bool {
        matches!(
            self,
            Rule::ImpossibleTravel | Rule::AmountZSevere | Rule::BurstCountSevere
        )
    }

    /// One human-readable sentence naming the measured value and the
    /// threshold it crossed. Only called for rules that actually fired,
    /// so the relevant features are present.
    pub fn reason(&self, f: &FeatureVector, cfg: &RiskConfig) -> String {
        match self {
            Rule::AmountZSevere => format!(
                "amount z-score {:.2} is at or above the severe threshold {:.1}",
                f.z_amount.unwrap_or(f64::NAN),
                cfg.z_severe
            ),
            Rule::AmountZWarn => format!(
                "amount z-score {:.2} is at or above the warning threshold {:.1}",
                f.z_amount.unwrap_or(f64::NAN),
                cfg.z_warn
            ),
            Rule::BurstCountSevere => format!(
                "{} transactions in the last 10 minutes, at or above the severe threshold {}",
                f.count_10m, cfg.burst_severe
            ),
            Rule::BurstCountWarn => format!(
                "{} transactions in the last 10 minutes, at or above the warning threshold {}",
                f.count_10m, cfg.burst_warn
            ),
            Rule::RepeatTargetWarn => format!(
                "{} transfers to the same target in the last 10 minutes, at or above the threshold {}",
                f.same_target_10m, cfg.repeat_target_warn
            ),
            Rule::NewDeviceHighAmount => format!(
                "high amount {:.2} from a device not seen in the last {} days",
                f.amount, cfg.device_lookback_days
            ),
            Rule::FastDeviceSwitch => format!(
                "high amount {:.2} within {:.1}h of a switch to a different device",
                f.amount, cfg.device_switch_max_hours
            ),
            Rule::FarAtNight => format!(
                "{:.0} km from the usual location (threshold {:.0} km) at night hour {}",
                f.distance_from_home_km.unwrap_or(f64::NAN),
                cfg.far_km,
                f.hour
            ),
            Rule::ImpossibleTravel => format!(
                "implied travel speed {:.0} km/h exceeds the physical limit {:.0} km/h",
                f.speed_kmh.unwrap_or(f64::NAN),
                cfg.impossible_speed_kmh
            ),
            Rule::OddHourHighAmount => format!(
                "high amount {:.2} at hour {}, {:.1}h away from the usual hour (threshold {:.1}h)",
                f.amount,
                f.hour,
                f.hour_delta_from_avg.unwrap_or(f64::NAN),
                cfg.odd_hour_delta
            ),
        }
    }
}

/// Evaluate all rules over the vector. Not-applicable features simply
/// cannot fire. Returns the fired rules and the clamped weighted score.
pub fn evaluate(f: &FeatureVector, cfg: &RiskConfig) -> (Vec<Rule>, f64) {
    let mut hits = Vec::new();

    if let Some(z) = f.z_amount {
        if z >= cfg.z_severe {
            hits.push(Rule::AmountZSevere);
        } else if z >= cfg.z_warn {
            hits.push(Rule::AmountZWarn);
        }
    }

    if f.count_10m >= cfg.burst_severe {
        hits.push(Rule::BurstCountSevere);
    } else if f.count_10m >= cfg.burst_warn {
        hits.push(Rule::BurstCountWarn);
    }

    if f.same_target_10m >= cfg.repeat_target_warn {
        hits.push(Rule::RepeatTargetWarn);
    }

    let high = f.high_amount(cfg);
    if f.device_seen_recently == Some(false) && high {
        hits.push(Rule::NewDeviceHighAmount);
    }
    if f.device_switched_fast == Some(true) && high {
        hits.push(Rule::FastDeviceSwitch);
    }

    if let Some(d) = f.distance_from_home_km {
        if d >= cfg.far_km && cfg.night_hours.contains(&f.hour) {
            hits.push(Rule::FarAtNight);
        }
    }

    if let Some(speed) = f.speed_kmh {
        if speed >= cfg.impossible_speed_kmh {
            hits.push(Rule::ImpossibleTravel);
        }
    }

    if let Some(delta) = f.hour_delta_from_avg {
        if delta >= cfg.odd_hour_delta && high {
            hits.push(Rule::OddHourHighAmount);
        }
    }

    let score: f64 = hits.iter().map(|r| r.weight(&cfg.weights)).sum();
    (hits, score.min(1.0))
}

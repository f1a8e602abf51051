//! Feature builder: turns a raw transaction plus historical aggregates
//! into a fixed, typed feature vector.
//!
//! RULE: A feature that cannot be computed (insufficient history,
//! missing capability) is None, never zero. Rules treat None as
//! "cannot fire", and only the model path may impute.

use crate::{
    config::RiskConfig,
    error::RiskResult,
    history::{BaselineStats, HistoryReader},
    stats,
    store::LedgerStore,
    transaction::Transaction,
};
use chrono::Timelike;
use serde::Serialize;

/// The fixed feature space. Options encode applicability.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureVector {
    pub amount: f64,
    /// Local hour-of-day of the transaction, 0..=23.
    pub hour: u32,
    pub sample_count: i64,
    pub mean_amount: Option<f64>,
    pub std_amount: Option<f64>,
    pub z_amount: Option<f64>,
    pub count_10m: i64,
    pub same_target_10m: i64,
    pub distance_from_home_km: Option<f64>,
    pub distance_from_last_km: Option<f64>,
    pub time_since_last_h: Option<f64>,
    pub speed_kmh: Option<f64>,
    /// Circular delta to the source's typical hour, in [0, 12].
    pub hour_delta_from_avg: Option<f64>,
    pub device_seen_recently: Option<bool>,
    pub device_switched_fast: Option<bool>,
}

impl FeatureVector {
    /// "High amount" for the compound rules: strong personal z-score
    /// when the baseline supports one, or a large absolute amount.
    pub fn high_amount(&self, config: &RiskConfig) -> bool {
        self.z_amount.map_or(false, |z| z >= config.z_high_amount)
            || self.amount >= config.high_amount_abs
    }
}

pub struct FeatureBuilder<'a> {
    store: &'a LedgerStore,
    reader: &'a dyn HistoryReader,
    config: &'a RiskConfig,
}

impl<'a> FeatureBuilder<'a> {
    pub fn new(
        store: &'a LedgerStore,
        reader: &'a dyn HistoryReader,
        config: &'a RiskConfig,
    ) -> Self {
        Self {
            store,
            reader,
            config,
        }
    }

    /// Assemble the full vector for one validated transaction.
    /// Read-only against the store.
    pub fn build(&self, tx: &Transaction) -> RiskResult<FeatureVector> {
        let baseline = self.reader.baseline(self.store, &tx.source_id, tx.ts)?;
        let counts =
            self.reader
                .recent_counts(self.store, &tx.source_id, &tx.target_id, tx.ts)?;
        let last = self.reader.last_transaction(self.store, &tx.source_id, tx.ts)?;

        let z_amount = self.z_amount(tx.amount, &baseline);
        let distance_from_home_km = self.distance_from_home(tx, &baseline);

        let mut distance_from_last_km = None;
        let mut time_since_last_h = None;
        let mut speed_kmh = None;
        let mut device_switched_fast = None;
        if let Some(last) = &last {
            let elapsed_h = (tx.ts - last.ts).num_seconds() as f64 / 3600.0;
            if elapsed_h > 0.0 {
                time_since_last_h = Some(elapsed_h);
            }
            if let (Some(lat), Some(lon), Some(llat), Some(llon)) =
                (tx.latitude, tx.longitude, last.latitude, last.longitude)
            {
                let d = stats::haversine_km(lat, lon, llat, llon);
                distance_from_last_km = Some(d);
                if let Some(h) = time_since_last_h {
                    speed_kmh = Some(d / h);
                }
            }
            if let (Some(dev), Some(last_dev)) = (&tx.device_id, &last.device_id) {
                device_switched_fast = Some(
                    dev != last_dev
                        && time_since_last_h
                            .map_or(false, |h| h <= self.config.device_switch_max_hours),
                );
            }
        }

        let hour = tx.ts.hour();
        // The typical hour is as much a baseline as the mean amount:
        // below the sample minimum it is noise, not a habit.
        let hour_delta_from_avg = if baseline.sample_count >= self.config.min_baseline_samples {
            baseline
                .mean_hour
                .map(|mean| stats::circular_hour_diff(f64::from(hour), mean))
        } else {
            None
        };

        let device_seen_recently = match &tx.device_id {
            None => None,
            Some(dev) => self.reader.device_seen_within(
                self.store,
                &tx.source_id,
                dev,
                tx.ts,
                self.config.device_lookback_days,
            )?,
        };

        Ok(FeatureVector {
            amount: tx.amount,
            hour,
            sample_count: baseline.sample_count,
            mean_amount: baseline.mean_amount,
            std_amount: baseline.std_amount,
            z_amount,
            count_10m: counts.source_10m,
            same_target_10m: counts.same_target_10m,
            distance_from_home_km,
            distance_from_last_km,
            time_since_last_h,
            speed_kmh,
            hour_delta_from_avg,
            device_seen_recently,
            device_switched_fast,
        })
    }

    fn z_amount(&self, amount: f64, baseline: &BaselineStats) -> Option<f64> {
        if baseline.sample_count < self.config.min_baseline_samples {
            return None;
        }
        match (baseline.mean_amount, baseline.std_amount) {
            (Some(mean), Some(std)) if std > 0.0 => Some((amount - mean) / std),
            _ => None,
        }
    }

    fn distance_from_home(&self, tx: &Transaction, baseline: &BaselineStats) -> Option<f64> {
        if baseline.sample_count < self.config.min_baseline_samples {
            return None;
        }
        match (tx.latitude, tx.longitude, baseline.mean_lat, baseline.mean_lon) {
            (Some(lat), Some(lon), Some(hlat), Some(hlon)) => {
                Some(stats::haversine_km(lat, lon, hlat, hlon))
            }
            _ => None,
        }
    }
}

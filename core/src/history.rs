//! Windowed historical reads over the ledger, behind a strategy seam.
//!
//! `HistoryReader` has two implementations selected once from the
//! capability probe: `LegacyHistory` (text timestamps, text amounts, no
//! geo or device answers) and `ExtendedHistory` (typed columns). The
//! feature builder and the trainer only ever see the trait, so no
//! capability branching leaks into feature logic.
//!
//! Every window ends strictly before the transaction under evaluation,
//! so a transaction never counts toward its own baseline.

use crate::{
    capability::CapabilitySet,
    error::{RiskError, RiskResult},
    stats,
    store::{HistoryRow, LedgerStore},
    transaction::{parse_timestamp, TS_FORMAT},
};
use chrono::{DateTime, NaiveDateTime};

/// Days of history backing the per-source baseline.
pub const BASELINE_WINDOW_DAYS: u32 = 30;

/// Per-source aggregate over the trailing baseline window.
#[derive(Debug, Clone, Default)]
pub struct BaselineStats {
    pub sample_count: i64,
    pub mean_amount: Option<f64>,
    pub std_amount: Option<f64>,
    /// Circular mean hour-of-day, in [0, 24).
    pub mean_hour: Option<f64>,
    pub mean_lat: Option<f64>,
    pub mean_lon: Option<f64>,
}

/// 10-minute activity counts for burst detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityCounts {
    pub source_10m: i64,
    pub same_target_10m: i64,
}

/// The most recent prior transaction for a source.
#[derive(Debug, Clone)]
pub struct LastTxn {
    pub ts: NaiveDateTime,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub device_id: Option<String>,
}

pub trait HistoryReader: Send + Sync {
    fn baseline(
        &self,
        store: &LedgerStore,
        source: &str,
        at: NaiveDateTime,
    ) -> RiskResult<BaselineStats>;

    fn recent_counts(
        &self,
        store: &LedgerStore,
        source: &str,
        target: &str,
        at: NaiveDateTime,
    ) -> RiskResult<ActivityCounts>;

    fn last_transaction(
        &self,
        store: &LedgerStore,
        source: &str,
        at: NaiveDateTime,
    ) -> RiskResult<Option<LastTxn>>;

    /// None when the schema cannot answer the device question at all.
    fn device_seen_within(
        &self,
        store: &LedgerStore,
        source: &str,
        device: &str,
        at: NaiveDateTime,
        lookback_days: u32,
    ) -> RiskResult<Option<bool>>;

    /// Timestamp of the newest ledger row, used as the training as-of
    /// point so training is reproducible against a fixed ledger.
    fn latest_timestamp(&self, store: &LedgerStore) -> RiskResult<Option<NaiveDateTime>>;

    /// All rows in the trailing window ending at `as_of`, ordered by
    /// (source, time), for offline model training.
    fn window_rows(
        &self,
        store: &LedgerStore,
        as_of: NaiveDateTime,
        window_days: u32,
    ) -> RiskResult<Vec<HistoryRow>>;
}

/// Pick the query strategy once, from the probed capability set.
pub fn select_reader(caps: &CapabilitySet) -> Box<dyn HistoryReader> {
    if caps.extended() {
        log::info!("history strategy: extended (typed columns)");
        Box::new(ExtendedHistory {
            has_geo: caps.has_geo,
            has_device: caps.has_device,
        })
    } else {
        log::info!("history strategy: legacy (text columns)");
        Box::new(LegacyHistory)
    }
}

fn epoch_to_naive(epoch: i64) -> RiskResult<NaiveDateTime> {
    DateTime::from_timestamp(epoch, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| RiskError::Other(anyhow::anyhow!("epoch {epoch} out of range")))
}

fn ts_to_text(at: NaiveDateTime) -> String {
    at.format(TS_FORMAT).to_string()
}

// ── Legacy strategy ────────────────────────────────────────────

/// Text-column queries. Geo and device features are unanswerable here:
/// the legacy schema never recorded them.
pub struct LegacyHistory;

impl HistoryReader for LegacyHistory {
    fn baseline(
        &self,
        store: &LedgerStore,
        source: &str,
        at: NaiveDateTime,
    ) -> RiskResult<BaselineStats> {
        let cur = ts_to_text(at);
        let raw = store.legacy_baseline(source, &cur, BASELINE_WINDOW_DAYS)?;
        let mean_hour = if raw.n > 0 {
            let hours = store.legacy_hours_in_window(source, &cur, BASELINE_WINDOW_DAYS)?;
            stats::circular_mean_hour(&hours)
        } else {
            None
        };
        Ok(BaselineStats {
            sample_count: raw.n,
            mean_amount: (raw.n > 0).then(|| raw.sum / raw.n as f64),
            std_amount: stats::sample_std(raw.n, raw.sum, raw.sumsq),
            mean_hour,
            mean_lat: None,
            mean_lon: None,
        })
    }

    fn recent_counts(
        &self,
        store: &LedgerStore,
        source: &str,
        target: &str,
        at: NaiveDateTime,
    ) -> RiskResult<ActivityCounts> {
        let cur = ts_to_text(at);
        Ok(ActivityCounts {
            source_10m: store.legacy_count_10m(source, &cur)?,
            same_target_10m: store.legacy_same_target_10m(source, target, &cur)?,
        })
    }

    fn last_transaction(
        &self,
        store: &LedgerStore,
        source: &str,
        at: NaiveDateTime,
    ) -> RiskResult<Option<LastTxn>> {
        let cur = ts_to_text(at);
        match store.legacy_last_txn_ts(source, &cur)? {
            None => Ok(None),
            Some(raw) => Ok(Some(LastTxn {
                ts: parse_timestamp(&raw)?,
                latitude: None,
                longitude: None,
                device_id: None,
            })),
        }
    }

    fn device_seen_within(
        &self,
        _store: &LedgerStore,
        _source: &str,
        _device: &str,
        _at: NaiveDateTime,
        _lookback_days: u32,
    ) -> RiskResult<Option<bool>> {
        Ok(None)
    }

    fn latest_timestamp(&self, store: &LedgerStore) -> RiskResult<Option<NaiveDateTime>> {
        match store.legacy_latest_ts()? {
            None => Ok(None),
            Some(raw) => Ok(Some(parse_timestamp(&raw)?)),
        }
    }

    fn window_rows(
        &self,
        store: &LedgerStore,
        as_of: NaiveDateTime,
        window_days: u32,
    ) -> RiskResult<Vec<HistoryRow>> {
        store.legacy_window_rows(&ts_to_text(as_of), window_days)
    }
}

// ── Extended strategy ──────────────────────────────────────────

/// Typed-column queries over epoch timestamps and numeric amounts.
pub struct ExtendedHistory {
    pub has_geo: bool,
    pub has_device: bool,
}

impl HistoryReader for ExtendedHistory {
    fn baseline(
        &self,
        store: &LedgerStore,
        source: &str,
        at: NaiveDateTime,
    ) -> RiskResult<BaselineStats> {
        let cur = at.and_utc().timestamp();
        let raw = store.extended_baseline(source, cur, BASELINE_WINDOW_DAYS, self.has_geo)?;
        let mean_hour = if raw.n > 0 {
            let hours = store.extended_hours_in_window(source, cur, BASELINE_WINDOW_DAYS)?;
            stats::circular_mean_hour(&hours)
        } else {
            None
        };
        Ok(BaselineStats {
            sample_count: raw.n,
            mean_amount: (raw.n > 0).then(|| raw.sum / raw.n as f64),
            std_amount: stats::sample_std(raw.n, raw.sum, raw.sumsq),
            mean_hour,
            mean_lat: raw.avg_lat,
            mean_lon: raw.avg_lon,
        })
    }

    fn recent_counts(
        &self,
        store: &LedgerStore,
        source: &str,
        target: &str,
        at: NaiveDateTime,
    ) -> RiskResult<ActivityCounts> {
        let cur = at.and_utc().timestamp();
        Ok(ActivityCounts {
            source_10m: store.extended_count_10m(source, cur)?,
            same_target_10m: store.extended_same_target_10m(source, target, cur)?,
        })
    }

    fn last_transaction(
        &self,
        store: &LedgerStore,
        source: &str,
        at: NaiveDateTime,
    ) -> RiskResult<Option<LastTxn>> {
        let cur = at.and_utc().timestamp();
        match store.extended_last_txn(source, cur)? {
            None => Ok(None),
            Some((epoch, lat, lon, device)) => Ok(Some(LastTxn {
                ts: epoch_to_naive(epoch)?,
                latitude: if self.has_geo { lat } else { None },
                longitude: if self.has_geo { lon } else { None },
                device_id: if self.has_device { device } else { None },
            })),
        }
    }

    fn device_seen_within(
        &self,
        store: &LedgerStore,
        source: &str,
        device: &str,
        at: NaiveDateTime,
        lookback_days: u32,
    ) -> RiskResult<Option<bool>> {
        if !self.has_device {
            return Ok(None);
        }
        let cur = at.and_utc().timestamp();
        Ok(Some(store.extended_device_seen(
            source,
            device,
            cur,
            lookback_days,
        )?))
    }

    fn latest_timestamp(&self, store: &LedgerStore) -> RiskResult<Option<NaiveDateTime>> {
        match store.extended_latest_epoch()? {
            None => Ok(None),
            Some(epoch) => Ok(Some(epoch_to_naive(epoch)?)),
        }
    }

    fn window_rows(
        &self,
        store: &LedgerStore,
        as_of: NaiveDateTime,
        window_days: u32,
    ) -> RiskResult<Vec<HistoryRow>> {
        store.extended_window_rows(as_of.and_utc().timestamp(), window_days)
    }
}

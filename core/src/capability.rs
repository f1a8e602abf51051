//! Schema capability probe.
//!
//! The wallet ledger exists in two generations: the original table with
//! text timestamps and text amounts, and an extended table carrying a
//! typed epoch timestamp, numeric amount, geo-coordinates, and a device
//! identifier. The probe inspects the table metadata once and reports
//! which optional features are computable. A metadata read failure is
//! fatal: capability detection is a prerequisite, not best-effort.

use crate::{error::RiskResult, store::LedgerStore};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilitySet {
    pub has_typed_timestamp: bool,
    pub has_numeric_amount: bool,
    pub has_geo: bool,
    pub has_device: bool,
}

impl CapabilitySet {
    /// Inspect the ledger's column metadata and derive the flag set.
    pub fn detect(store: &LedgerStore) -> RiskResult<Self> {
        let cols = store.column_names("ledger")?;
        let has = |name: &str| cols.iter().any(|c| c == name);
        let caps = Self {
            has_typed_timestamp: has("event_ts"),
            has_numeric_amount: has("amount_num"),
            has_geo: has("latitude") && has("longitude"),
            has_device: has("device_id"),
        };
        log::info!(
            "ledger capabilities: typed_timestamp={} numeric_amount={} geo={} device={}",
            caps.has_typed_timestamp,
            caps.has_numeric_amount,
            caps.has_geo,
            caps.has_device
        );
        Ok(caps)
    }

    /// The extended query strategy needs both the typed timestamp and
    /// the numeric amount; anything less falls back to legacy queries.
    pub fn extended(&self) -> bool {
        self.has_typed_timestamp && self.has_numeric_amount
    }
}

//! Incoming transaction record: the raw request shape and its validated
//! form.
//!
//! RULE: Nothing downstream of validation ever sees a partially-valid
//! transaction. `TxRequest` carries every field as an Option so a missing
//! field can be named precisely; `validate()` either yields an immutable
//! `Transaction` or a typed error.

use crate::{
    error::{RiskError, RiskResult},
    types::AccountId,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Wire timestamp format used by the wallet ledger.
pub const TS_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// A transaction as received from the API layer, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRequest {
    pub timestamp: Option<String>,
    pub source_id: Option<String>,
    pub target_id: Option<String>,
    pub amount: Option<AmountField>,
    pub category: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// The wallet service sends amounts as either a JSON number or a
/// decimal string; both are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmountField {
    Num(f64),
    Text(String),
}

/// A fully validated, immutable transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub ts: NaiveDateTime,
    pub source_id: AccountId,
    pub target_id: AccountId,
    pub amount: f64,
    pub category: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub device_id: Option<String>,
}

impl Transaction {
    /// Timestamp rendered back in the wire format, for evidence output
    /// and ledger writes.
    pub fn ts_text(&self) -> String {
        self.ts.format(TS_FORMAT).to_string()
    }
}

impl TxRequest {
    /// Validate all required fields, naming the first offending field.
    pub fn validate(&self) -> RiskResult<Transaction> {
        let raw_ts = self
            .timestamp
            .as_deref()
            .ok_or(RiskError::MissingField { field: "timestamp" })?;
        let ts = parse_timestamp(raw_ts)?;

        let source_id = require_text(self.source_id.as_deref(), "source_id")?;
        let target_id = require_text(self.target_id.as_deref(), "target_id")?;
        let category = require_text(self.category.as_deref(), "category")?;

        let amount = match &self.amount {
            None => return Err(RiskError::MissingField { field: "amount" }),
            Some(AmountField::Num(n)) => *n,
            Some(AmountField::Text(s)) => {
                s.trim().parse::<f64>().map_err(|_| RiskError::InvalidField {
                    field: "amount",
                    reason: format!("'{s}' is not a decimal number"),
                })?
            }
        };
        if !amount.is_finite() || amount < 0.0 {
            return Err(RiskError::InvalidField {
                field: "amount",
                reason: format!("must be a finite non-negative number, got {amount}"),
            });
        }

        // Coordinates are optional but must arrive as a pair.
        match (self.latitude, self.longitude) {
            (Some(_), None) => {
                return Err(RiskError::InvalidField {
                    field: "longitude",
                    reason: "latitude given without longitude".into(),
                })
            }
            (None, Some(_)) => {
                return Err(RiskError::InvalidField {
                    field: "latitude",
                    reason: "longitude given without latitude".into(),
                })
            }
            _ => {}
        }
        if let Some(lat) = self.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(RiskError::InvalidField {
                    field: "latitude",
                    reason: format!("{lat} outside [-90, 90]"),
                });
            }
        }
        if let Some(lon) = self.longitude {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(RiskError::InvalidField {
                    field: "longitude",
                    reason: format!("{lon} outside [-180, 180]"),
                });
            }
        }

        Ok(Transaction {
            ts,
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            amount,
            category: category.to_string(),
            latitude: self.latitude,
            longitude: self.longitude,
            device_id: self.device_id.clone().filter(|d| !d.is_empty()),
        })
    }
}

/// Parse a wire-format timestamp ('YYYY-MM-DD_HH:MM:SS').
pub fn parse_timestamp(raw: &str) -> RiskResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT).map_err(|e| RiskError::InvalidField {
        field: "timestamp",
        reason: format!("'{raw}' does not match YYYY-MM-DD_HH:MM:SS: {e}"),
    })
}

fn require_text<'a>(value: Option<&'a str>, field: &'static str) -> RiskResult<&'a str> {
    match value {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(RiskError::MissingField { field }),
    }
}

//! SQLite persistence layer for the wallet ledger.
//!
//! RULE: Only store.rs talks to the database.
//! The history strategies call store methods and never execute SQL
//! directly. Legacy queries work on the original text columns
//! (ts 'YYYY-MM-DD_HH:MM:SS', amount TEXT) via `datetime(replace(...))`
//! and CAST; extended queries use the typed epoch/numeric columns.
//!
//! All window bounds are half-open: `start <= ts < current`, so the
//! transaction being scored never counts toward its own baseline.

use crate::{
    error::RiskResult,
    transaction::Transaction,
    types::TxnId,
};
use rusqlite::{params, Connection, OptionalExtension};

/// Raw 30-day baseline aggregates, before the std/circular-mean math.
#[derive(Debug, Clone, Default)]
pub struct RawBaseline {
    pub n: i64,
    pub sum: f64,
    pub sumsq: f64,
    pub avg_lat: Option<f64>,
    pub avg_lon: Option<f64>,
}

/// One historical row pulled for model training.
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub source_id: String,
    pub epoch: i64,
    pub amount: f64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub struct LedgerStore {
    conn: Connection,
}

impl LedgerStore {
    /// Open (or create) the ledger database at `path`.
    pub fn open(path: &str) -> RiskResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode: better concurrent read performance.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA busy_timeout=5000;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> RiskResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Apply the full schema: legacy table plus extended columns.
    pub fn migrate(&self) -> RiskResult<()> {
        self.migrate_legacy()?;
        // ALTER TABLE ADD COLUMN has no IF NOT EXISTS; guard by probing.
        let cols = self.column_names("ledger")?;
        if !cols.iter().any(|c| c == "event_ts") {
            self.conn
                .execute_batch(include_str!("../../migrations/002_extended_ledger.sql"))?;
        }
        Ok(())
    }

    /// Apply only the legacy schema (text timestamps and amounts).
    pub fn migrate_legacy(&self) -> RiskResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_ledger.sql"))?;
        Ok(())
    }

    /// Column names of `table`, in declaration order.
    pub fn column_names(&self, table: &str) -> RiskResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({table})"))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    // ── Writes ─────────────────────────────────────────────────

    /// Insert a transaction. The legacy columns are always written;
    /// the extended columns only when the schema carries them.
    pub fn insert_transaction(&self, tx: &Transaction, extended: bool) -> RiskResult<TxnId> {
        let txn_id = uuid::Uuid::new_v4().to_string();
        let ts_text = tx.ts_text();
        if extended {
            self.conn.execute(
                "INSERT INTO ledger
                   (txn_id, ts, source_id, target_id, amount, category,
                    event_ts, amount_num, latitude, longitude, device_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    txn_id,
                    ts_text,
                    tx.source_id,
                    tx.target_id,
                    format!("{}", tx.amount),
                    tx.category,
                    tx.ts.and_utc().timestamp(),
                    tx.amount,
                    tx.latitude,
                    tx.longitude,
                    tx.device_id,
                ],
            )?;
        } else {
            self.conn.execute(
                "INSERT INTO ledger (txn_id, ts, source_id, target_id, amount, category)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    txn_id,
                    ts_text,
                    tx.source_id,
                    tx.target_id,
                    format!("{}", tx.amount),
                    tx.category,
                ],
            )?;
        }
        Ok(txn_id)
    }

    // ── Legacy queries (text ts / text amount) ─────────────────

    pub fn legacy_baseline(
        &self,
        source: &str,
        cur_ts: &str,
        window_days: u32,
    ) -> RiskResult<RawBaseline> {
        let row = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CAST(amount AS REAL)), 0.0),
                    COALESCE(SUM(CAST(amount AS REAL) * CAST(amount AS REAL)), 0.0)
             FROM ledger
             WHERE source_id = ?1
               AND datetime(replace(ts, '_', ' ')) >= datetime(replace(?2, '_', ' '), ?3)
               AND datetime(replace(ts, '_', ' ')) <  datetime(replace(?2, '_', ' '))",
            params![source, cur_ts, format!("-{window_days} days")],
            |row| {
                Ok(RawBaseline {
                    n: row.get(0)?,
                    sum: row.get(1)?,
                    sumsq: row.get(2)?,
                    avg_lat: None,
                    avg_lon: None,
                })
            },
        )?;
        Ok(row)
    }

    pub fn legacy_hours_in_window(
        &self,
        source: &str,
        cur_ts: &str,
        window_days: u32,
    ) -> RiskResult<Vec<f64>> {
        let mut stmt = self.conn.prepare(
            "SELECT CAST(strftime('%H', replace(ts, '_', ' ')) AS INTEGER)
             FROM ledger
             WHERE source_id = ?1
               AND datetime(replace(ts, '_', ' ')) >= datetime(replace(?2, '_', ' '), ?3)
               AND datetime(replace(ts, '_', ' ')) <  datetime(replace(?2, '_', ' '))",
        )?;
        let hours = stmt
            .query_map(
                params![source, cur_ts, format!("-{window_days} days")],
                |row| row.get::<_, i64>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hours.into_iter().map(|h| h as f64).collect())
    }

    pub fn legacy_count_10m(&self, source: &str, cur_ts: &str) -> RiskResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM ledger
             WHERE source_id = ?1
               AND datetime(replace(ts, '_', ' ')) >= datetime(replace(?2, '_', ' '), '-10 minutes')
               AND datetime(replace(ts, '_', ' ')) <  datetime(replace(?2, '_', ' '))",
            params![source, cur_ts],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn legacy_same_target_10m(
        &self,
        source: &str,
        target: &str,
        cur_ts: &str,
    ) -> RiskResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM ledger
             WHERE source_id = ?1 AND target_id = ?2
               AND datetime(replace(ts, '_', ' ')) >= datetime(replace(?3, '_', ' '), '-10 minutes')
               AND datetime(replace(ts, '_', ' ')) <  datetime(replace(?3, '_', ' '))",
            params![source, target, cur_ts],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// Timestamp (wire format) of the most recent transaction strictly
    /// before `cur_ts`, if any.
    pub fn legacy_last_txn_ts(&self, source: &str, cur_ts: &str) -> RiskResult<Option<String>> {
        let ts = self
            .conn
            .query_row(
                "SELECT ts FROM ledger
                 WHERE source_id = ?1
                   AND datetime(replace(ts, '_', ' ')) < datetime(replace(?2, '_', ' '))
                 ORDER BY datetime(replace(ts, '_', ' ')) DESC
                 LIMIT 1",
                params![source, cur_ts],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts)
    }

    /// Wire-format timestamp of the newest ledger row, if any.
    /// The text format sorts chronologically, so MAX is safe.
    pub fn legacy_latest_ts(&self) -> RiskResult<Option<String>> {
        let ts = self
            .conn
            .query_row("SELECT MAX(ts) FROM ledger", [], |row| {
                row.get::<_, Option<String>>(0)
            })?;
        Ok(ts)
    }

    /// All rows in the trailing window ending at `as_of_ts`, ordered by
    /// (source, time) for per-source expanding statistics. Epochs are
    /// recovered from the text timestamps.
    pub fn legacy_window_rows(
        &self,
        as_of_ts: &str,
        window_days: u32,
    ) -> RiskResult<Vec<HistoryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_id,
                    CAST(strftime('%s', replace(ts, '_', ' ')) AS INTEGER),
                    CAST(amount AS REAL)
             FROM ledger
             WHERE datetime(replace(ts, '_', ' ')) >= datetime(replace(?1, '_', ' '), ?2)
               AND datetime(replace(ts, '_', ' ')) <= datetime(replace(?1, '_', ' '))
             ORDER BY source_id ASC, datetime(replace(ts, '_', ' ')) ASC",
        )?;
        let rows = stmt
            .query_map(params![as_of_ts, format!("-{window_days} days")], |row| {
                Ok(HistoryRow {
                    source_id: row.get(0)?,
                    epoch: row.get(1)?,
                    amount: row.get(2)?,
                    latitude: None,
                    longitude: None,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Extended queries (epoch ts / numeric amount / geo / device) ──

    pub fn extended_baseline(
        &self,
        source: &str,
        cur_epoch: i64,
        window_days: u32,
        with_geo: bool,
    ) -> RiskResult<RawBaseline> {
        let start = cur_epoch - i64::from(window_days) * 86_400;
        if with_geo {
            let row = self.conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(amount_num), 0.0),
                        COALESCE(SUM(amount_num * amount_num), 0.0),
                        AVG(latitude),
                        AVG(longitude)
                 FROM ledger
                 WHERE source_id = ?1 AND event_ts >= ?2 AND event_ts < ?3",
                params![source, start, cur_epoch],
                |row| {
                    Ok(RawBaseline {
                        n: row.get(0)?,
                        sum: row.get(1)?,
                        sumsq: row.get(2)?,
                        avg_lat: row.get(3)?,
                        avg_lon: row.get(4)?,
                    })
                },
            )?;
            Ok(row)
        } else {
            let row = self.conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(amount_num), 0.0),
                        COALESCE(SUM(amount_num * amount_num), 0.0)
                 FROM ledger
                 WHERE source_id = ?1 AND event_ts >= ?2 AND event_ts < ?3",
                params![source, start, cur_epoch],
                |row| {
                    Ok(RawBaseline {
                        n: row.get(0)?,
                        sum: row.get(1)?,
                        sumsq: row.get(2)?,
                        avg_lat: None,
                        avg_lon: None,
                    })
                },
            )?;
            Ok(row)
        }
    }

    pub fn extended_hours_in_window(
        &self,
        source: &str,
        cur_epoch: i64,
        window_days: u32,
    ) -> RiskResult<Vec<f64>> {
        let start = cur_epoch - i64::from(window_days) * 86_400;
        let mut stmt = self.conn.prepare(
            "SELECT CAST(strftime('%H', event_ts, 'unixepoch') AS INTEGER)
             FROM ledger
             WHERE source_id = ?1 AND event_ts >= ?2 AND event_ts < ?3",
        )?;
        let hours = stmt
            .query_map(params![source, start, cur_epoch], |row| {
                row.get::<_, i64>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hours.into_iter().map(|h| h as f64).collect())
    }

    pub fn extended_count_10m(&self, source: &str, cur_epoch: i64) -> RiskResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM ledger
             WHERE source_id = ?1 AND event_ts >= ?2 AND event_ts < ?3",
            params![source, cur_epoch - 600, cur_epoch],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn extended_same_target_10m(
        &self,
        source: &str,
        target: &str,
        cur_epoch: i64,
    ) -> RiskResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM ledger
             WHERE source_id = ?1 AND target_id = ?2
               AND event_ts >= ?3 AND event_ts < ?4",
            params![source, target, cur_epoch - 600, cur_epoch],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// Most recent transaction strictly before `cur_epoch`:
    /// (epoch, latitude, longitude, device_id).
    #[allow(clippy::type_complexity)]
    pub fn extended_last_txn(
        &self,
        source: &str,
        cur_epoch: i64,
    ) -> RiskResult<Option<(i64, Option<f64>, Option<f64>, Option<String>)>> {
        let row = self
            .conn
            .query_row(
                "SELECT event_ts, latitude, longitude, device_id
                 FROM ledger
                 WHERE source_id = ?1 AND event_ts < ?2
                 ORDER BY event_ts DESC
                 LIMIT 1",
                params![source, cur_epoch],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Whether `device` appears in the source's history in the trailing
    /// `lookback_days`, strictly before `cur_epoch`.
    pub fn extended_device_seen(
        &self,
        source: &str,
        device: &str,
        cur_epoch: i64,
        lookback_days: u32,
    ) -> RiskResult<bool> {
        let start = cur_epoch - i64::from(lookback_days) * 86_400;
        let seen: i64 = self.conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM ledger
                 WHERE source_id = ?1 AND device_id = ?2
                   AND event_ts >= ?3 AND event_ts < ?4)",
            params![source, device, start, cur_epoch],
            |row| row.get(0),
        )?;
        Ok(seen != 0)
    }

    pub fn extended_latest_epoch(&self) -> RiskResult<Option<i64>> {
        let epoch = self
            .conn
            .query_row("SELECT MAX(event_ts) FROM ledger", [], |row| {
                row.get::<_, Option<i64>>(0)
            })?;
        Ok(epoch)
    }

    pub fn extended_window_rows(
        &self,
        as_of_epoch: i64,
        window_days: u32,
    ) -> RiskResult<Vec<HistoryRow>> {
        let start = as_of_epoch - i64::from(window_days) * 86_400;
        let mut stmt = self.conn.prepare(
            "SELECT source_id, event_ts, amount_num, latitude, longitude
             FROM ledger
             WHERE event_ts >= ?1 AND event_ts <= ?2 AND amount_num IS NOT NULL
             ORDER BY source_id ASC, event_ts ASC",
        )?;
        let rows = stmt
            .query_map(params![start, as_of_epoch], |row| {
                Ok(HistoryRow {
                    source_id: row.get(0)?,
                    epoch: row.get(1)?,
                    amount: row.get(2)?,
                    latitude: row.get(3)?,
                    longitude: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

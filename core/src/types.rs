//! Shared primitive types used across the entire pipeline.

/// A stable, unique identifier for a ledger row.
pub type TxnId = String;

/// A wallet/account identifier (source or target of a transfer).
pub type AccountId = String;

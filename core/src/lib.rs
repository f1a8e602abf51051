//! walletrisk-core: transaction risk-scoring pipeline for a wallet
//! ledger.
//!
//! One incoming transaction flows through: schema capability probe
//! (cached) → feature builder (windowed historical queries) → rule
//! engine or anomaly model → decision gate, yielding an approve /
//! review / block decision with a complete evidence trail.

pub mod capability;
pub mod config;
pub mod decision;
pub mod error;
pub mod features;
pub mod history;
pub mod model;
pub mod pipeline;
pub mod rng;
pub mod rules;
pub mod stats;
pub mod store;
pub mod transaction;
pub mod types;

pub use capability::CapabilitySet;
pub use config::RiskConfig;
pub use decision::{Decision, RiskAssessment};
pub use error::{RiskError, RiskResult};
pub use pipeline::RiskPipeline;
pub use store::LedgerStore;
pub use transaction::TxRequest;

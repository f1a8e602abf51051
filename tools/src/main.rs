//! risk-runner: headless scoring/training runner for the wallet
//! risk pipeline.
//!
//! Usage:
//!   risk-runner seed  --db wallet.db --accounts 20 --days 30 --seed 7
//!   risk-runner score --db wallet.db --tx tx.json [--use-model --model m.json]
//!   risk-runner train --db wallet.db --window-days 90 --contamination 0.02 --out m.json

use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use walletrisk_core::{
    config::RiskConfig,
    decision::RiskAssessment,
    model::ModelArtifact,
    pipeline::RiskPipeline,
    rng::{RngStream, ScopedRng},
    store::LedgerStore,
    transaction::{Transaction, TxRequest},
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("help");
    match cmd {
        "seed" => cmd_seed(&args),
        "score" => cmd_score(&args),
        "train" => cmd_train(&args),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("risk-runner — wallet risk pipeline runner");
    println!();
    println!("  risk-runner seed  --db wallet.db [--accounts 20] [--days 30] [--seed 7] [--legacy]");
    println!("  risk-runner score --db wallet.db --tx tx.json [--config cfg.json]");
    println!("                    [--use-model] [--model artifact.json]");
    println!("  risk-runner train --db wallet.db [--window-days 90] [--contamination 0.02]");
    println!("                    [--out artifact.json] [--config cfg.json]");
}

fn load_config(args: &[String]) -> Result<RiskConfig> {
    match flag_value(args, "--config") {
        Some(path) => Ok(RiskConfig::from_file(path)?),
        None => Ok(RiskConfig::default()),
    }
}

// ── seed ───────────────────────────────────────────────────────

/// Deterministic synthetic ledger for demos and manual testing. Each
/// account gets a home location, a device pool, and a typical hour;
/// amounts are Pareto-distributed around a per-account floor.
fn cmd_seed(args: &[String]) -> Result<()> {
    let db = flag_value(args, "--db").unwrap_or("wallet.db");
    let accounts = parse_arg(args, "--accounts", 20u64);
    let days = parse_arg(args, "--days", 30u64);
    let seed = parse_arg(args, "--seed", 7u64);
    let legacy = args.iter().any(|a| a == "--legacy");

    let store = LedgerStore::open(db)?;
    if legacy {
        store.migrate_legacy()?;
    } else {
        store.migrate()?;
    }

    let mut rng = ScopedRng::new(seed, RngStream::LedgerSeeder);
    let base = NaiveDate::from_ymd_opt(2025, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| anyhow::anyhow!("bad base date"))?;

    let mut inserted = 0u64;
    for a in 0..accounts {
        let source_id = format!("w-{a:04}");
        let home_lat = rng.uniform(-60.0, 60.0);
        let home_lon = rng.uniform(-150.0, 150.0);
        let typical_hour = rng.next_u64_below(24) as i64;
        let devices = [format!("dev-{a:04}-a"), format!("dev-{a:04}-b")];
        let amount_floor = rng.uniform(50.0, 5_000.0);
        let txns_per_day = 1 + rng.next_u64_below(4);

        for day in 0..days {
            for _ in 0..txns_per_day {
                let jitter_h = rng.next_u64_below(5) as i64 - 2;
                let hour = (typical_hour + jitter_h).rem_euclid(24);
                let minute = rng.next_u64_below(60) as i64;
                let ts: NaiveDateTime = base
                    + Duration::days(day as i64)
                    + Duration::hours(hour)
                    + Duration::minutes(minute);
                let target = format!("w-{:04}", rng.next_u64_below(accounts.max(2)));
                let tx = Transaction {
                    ts,
                    source_id: source_id.clone(),
                    target_id: target,
                    amount: rng.pareto(amount_floor, 2.5),
                    category: "transfer".to_string(),
                    latitude: (!legacy).then(|| home_lat + rng.uniform(-0.05, 0.05)),
                    longitude: (!legacy).then(|| home_lon + rng.uniform(-0.05, 0.05)),
                    device_id: (!legacy).then(|| {
                        devices[if rng.chance(0.9) { 0 } else { 1 }].clone()
                    }),
                };
                store.insert_transaction(&tx, !legacy)?;
                inserted += 1;
            }
        }
    }

    println!("seeded {inserted} transactions for {accounts} accounts into {db}");
    Ok(())
}

// ── score ──────────────────────────────────────────────────────

fn cmd_score(args: &[String]) -> Result<()> {
    let db = flag_value(args, "--db").unwrap_or("wallet.db");
    let tx_path = match flag_value(args, "--tx") {
        Some(p) => p,
        None => {
            print_usage();
            anyhow::bail!("score requires --tx <file.json>");
        }
    };
    let use_model = args.iter().any(|a| a == "--use-model");
    let config = load_config(args)?;

    let request: TxRequest = serde_json::from_str(&std::fs::read_to_string(tx_path)?)?;

    let store = LedgerStore::open(db)?;
    let pipeline = RiskPipeline::new(store, config)?;

    if let Some(model_path) = flag_value(args, "--model") {
        pipeline.install_artifact(ModelArtifact::from_file(model_path)?);
    }

    let result = if use_model {
        pipeline.score_with_model(&request)
    } else {
        pipeline.score(&request)
    };

    match result {
        Ok(assessment) => {
            println!("{}", serde_json::to_string_pretty(&assessment)?);
            Ok(())
        }
        Err(e) if e.is_input_error() => {
            let payload = serde_json::json!({ "error": e.to_string() });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            std::process::exit(2);
        }
        Err(e) => {
            // Fail-safe: a system failure yields a conservative review,
            // never a silent approve.
            log::error!("scoring failed: {e}");
            let fallback = RiskAssessment::system_fallback(&e.to_string());
            println!("{}", serde_json::to_string_pretty(&fallback)?);
            std::process::exit(1);
        }
    }
}

// ── train ──────────────────────────────────────────────────────

fn cmd_train(args: &[String]) -> Result<()> {
    let db = flag_value(args, "--db").unwrap_or("wallet.db");
    let window_days = parse_arg(args, "--window-days", 90u32);
    let contamination = parse_arg(args, "--contamination", 0.02f64);
    let out = flag_value(args, "--out").unwrap_or("artifact.json");
    let config = load_config(args)?;

    let store = LedgerStore::open(db)?;
    let pipeline = RiskPipeline::new(store, config)?;

    match pipeline.train_model(window_days, contamination) {
        Ok((report, artifact)) => {
            artifact.save_to_file(out)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            let payload = serde_json::json!({
                "ok": false,
                "stage": "train",
                "error": e.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            std::process::exit(1);
        }
    }
}

// ── arg helpers ────────────────────────────────────────────────

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use trade_sentinel::clock::SystemClock;
use trade_sentinel::config::Config;
use trade_sentinel::ledger::hashing::short_hash;
use trade_sentinel::ledger::{verify_blocks, Block, Sha256Hasher, TradeLedger};

fn main() -> Result<()> {
    let cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    // Export path from the first argument, else the configured one
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.ledger.export_path));

    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read ledger export {}", path.display()))?;

    println!("{}", "=".repeat(60));
    println!("LEDGER VERIFICATION: {}", path.display());
    println!("{}", "=".repeat(60));

    let blocks: Vec<Block> =
        serde_json::from_str(&json).context("Ledger export is not a block list")?;
    let structure = verify_blocks(&blocks, &Sha256Hasher);
    println!(
        "Blocks: {} | Records: {}",
        structure.total_blocks, structure.total_records
    );
    for b in &blocks {
        println!(
            "  #{:<4} {} records  nonce {:<8} hash {}",
            b.index,
            b.records.len(),
            b.nonce,
            short_hash(&b.hash)
        );
    }

    if !structure.is_valid {
        println!();
        println!("FAILED: {}", structure.message);
        if let Some(i) = structure.first_broken_block {
            println!("First broken block: #{}", i);
        }
        bail!("ledger chain is broken");
    }

    // Full import also checks signatures and snapshot content hashes
    match TradeLedger::import(
        &json,
        cfg.ledger.clone(),
        Arc::new(Sha256Hasher),
        Arc::new(SystemClock),
    ) {
        Ok(ledger) => {
            println!();
            println!(
                "VALID: {} blocks, {} snapshots, no tampering detected",
                ledger.blocks().len(),
                ledger.snapshot_count()
            );
            Ok(())
        }
        Err(e) => {
            println!();
            println!("FAILED: {}", e);
            bail!("ledger import rejected");
        }
    }
}

use thiserror::Error;

use crate::models::{LedgerAction, RiskTier};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger integrity fault: {0}")]
    IntegrityFault(String),

    #[error("Snapshot already exists for signal {0}")]
    DuplicateSnapshot(String),

    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    #[error("{0} records cannot be appended directly")]
    InvalidAction(LedgerAction),

    #[error("Grace window still open for {signal_id}: {remaining_secs}s remaining")]
    GraceWindowOpen {
        signal_id: String,
        remaining_secs: i64,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Invalid risk limits: {0}")]
    InvalidLimits(String),

    #[error("Manual resume denied in tier {tier}: drawdown {drawdown_pct:.2}% >= {threshold_pct:.2}%")]
    ResumeDenied {
        tier: RiskTier,
        drawdown_pct: f64,
        threshold_pct: f64,
    },

    #[error("Non-positive equity value: {0}")]
    InvalidEquity(f64),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error("Unknown trade: {0}")]
    UnknownTrade(String),
}

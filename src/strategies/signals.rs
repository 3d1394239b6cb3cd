use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::sltp::SltpLevels;
use crate::models::{Direction, Market, Timeframe};

/// A scored, not-yet-approved trading opportunity.
///
/// Everything on a candidate is computed once by the scorer. The pipeline moves
/// it into the gating stage, so each candidate is consumed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSignal {
    pub id: String,
    pub symbol: String,
    pub market: Market,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward: f64,
    pub win_probability: f64,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub pattern_confidence: Option<f64>,
    #[serde(default)]
    pub mtf_alignment: Option<f64>,
    pub bullish_score: f64,
    pub bearish_score: f64,
    pub snapshot_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl CandidateSignal {
    pub fn pattern_name(&self) -> &str {
        self.pattern.as_deref().unwrap_or("NONE")
    }

    pub fn risk_distance(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }
}

/// Risk-reward of a level set: |target - entry| / |entry - stop|. Zero when the
/// stop sits on the entry.
pub fn risk_reward(entry: f64, stop: f64, target: f64) -> f64 {
    let risk = (entry - stop).abs();
    if risk <= 0.0 {
        return 0.0;
    }
    (target - entry).abs() / risk
}

/// Final decision handed to the execution collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedTrade {
    pub signal_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub position_size: f64,
    pub confidence: f64,
    pub levels: SltpLevels,
    pub snapshot_hash: String,
    pub ledger_record_id: u64,
    /// True when the ENTRY record already sits in a sealed block.
    pub sealed: bool,
    pub approved_at: DateTime<Utc>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::hashing::HashFunction;
use crate::strategies::signals::CandidateSignal;

/// Frozen copy of a candidate as it was when the decision was made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub signal_id: String,
    pub captured_at: DateTime<Utc>,
    pub signal: CandidateSignal,
    pub content_hash: String,
    pub locked: bool,
    pub no_repaint_verified: bool,
    pub confirmed: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Detected changes. Stays empty unless something rewrote the snapshot.
    pub modifications: Vec<SnapshotModification>,
    pub entry_record_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotModification {
    pub detected_at: DateTime<Utc>,
    pub expected_hash: String,
    pub actual_hash: String,
    pub detail: String,
}

impl SignalSnapshot {
    pub fn capture(
        h: &dyn HashFunction,
        signal: &CandidateSignal,
        captured_at: DateTime<Utc>,
        entry_record_id: u64,
    ) -> Self {
        Self {
            signal_id: signal.id.clone(),
            captured_at,
            signal: signal.clone(),
            content_hash: content_hash(h, signal),
            locked: true,
            no_repaint_verified: false,
            confirmed: false,
            confirmed_at: None,
            modifications: Vec::new(),
            entry_record_id,
        }
    }

    pub fn recompute_hash(&self, h: &dyn HashFunction) -> String {
        content_hash(h, &self.signal)
    }
}

/// Hash over the decision-relevant fields of a candidate.
pub fn content_hash(h: &dyn HashFunction, s: &CandidateSignal) -> String {
    let fields = [
        s.id.clone(),
        s.symbol.clone(),
        s.direction.to_string(),
        format!("{}", s.confidence),
        s.snapshot_time.to_rfc3339(),
        s.created_at.to_rfc3339(),
        format!("{}", s.entry_price),
        format!("{}", s.stop_loss),
        format!("{}", s.take_profit),
        format!("{}", s.risk_reward),
        format!("{}", s.win_probability),
        s.pattern_name().to_string(),
        s.pattern_confidence.map(|c| format!("{}", c)).unwrap_or_default(),
        s.mtf_alignment.map(|a| format!("{}", a)).unwrap_or_default(),
    ];
    let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
    h.hash_fields(&refs)
}

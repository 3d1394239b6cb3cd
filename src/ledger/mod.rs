pub mod block;
pub mod hashing;
pub mod merkle;
pub mod snapshot;

pub use block::{verify_blocks, Block, ChainVerification, LedgerRecord};
pub use hashing::{HashFunction, Sha256Hasher, SharedHasher};
pub use snapshot::{SignalSnapshot, SnapshotModification};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock::SharedClock;
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::ledger::hashing::{short_hash, zero_hash};
use crate::ledger::merkle::{merkle_proof, ProofStep};
use crate::models::LedgerAction;
use crate::strategies::signals::CandidateSignal;

/// Returned by `create_snapshot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotReceipt {
    pub signal_id: String,
    pub content_hash: String,
    pub record_id: u64,
    /// The ENTRY record landed in a sealed block immediately.
    pub sealed: bool,
}

/// Inclusion proof for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordProof {
    pub record_id: u64,
    pub block_index: u64,
    pub record_hash: String,
    pub merkle_root: String,
    pub steps: Vec<ProofStep>,
}

/// Append-only, hash-chained record of every trade decision.
///
/// Records are chained one to the next as they are appended and sit in a
/// pending buffer until `batch_size` of them are sealed into a proof-of-work
/// block. Any failed verification puts the ledger into an integrity fault,
/// after which writes are refused until `reconcile` succeeds.
pub struct TradeLedger {
    cfg: LedgerConfig,
    hasher: SharedHasher,
    clock: SharedClock,
    blocks: Vec<Block>,
    pending: Vec<LedgerRecord>,
    snapshots: HashMap<String, SignalSnapshot>,
    next_record_id: u64,
    last_record_hash: String,
    fault: Option<String>,
}

impl TradeLedger {
    pub fn new(cfg: LedgerConfig, clock: SharedClock) -> Self {
        Self::with_hasher(cfg, Arc::new(Sha256Hasher), clock)
    }

    pub fn with_hasher(cfg: LedgerConfig, hasher: SharedHasher, clock: SharedClock) -> Self {
        let genesis = Block::genesis(hasher.as_ref(), clock.now(), cfg.difficulty);
        info!(
            "Ledger initialised: genesis {} ({}, difficulty {}, batch {})",
            short_hash(&genesis.hash),
            hasher.name(),
            cfg.difficulty,
            cfg.batch_size
        );
        Self {
            cfg,
            hasher,
            clock,
            blocks: vec![genesis],
            pending: Vec::new(),
            snapshots: HashMap::new(),
            next_record_id: 1,
            last_record_hash: zero_hash(),
            fault: None,
        }
    }

    // ── Writes ──────────────────────────────────────────────────

    /// Freeze `signal`, hash it, and record the ENTRY.
    pub fn create_snapshot(
        &mut self,
        signal: &CandidateSignal,
    ) -> Result<SnapshotReceipt, LedgerError> {
        self.ensure_writable()?;
        if self.snapshots.contains_key(&signal.id) {
            return Err(LedgerError::DuplicateSnapshot(signal.id.clone()));
        }

        let h = self.hasher.clone();
        let content_hash = snapshot::content_hash(h.as_ref(), signal);
        let payload = json!({
            "signal": serde_json::to_value(signal)?,
            "content_hash": content_hash,
        });
        let record_id = self.push_record(&signal.id, LedgerAction::Entry, payload);
        let snap = SignalSnapshot::capture(h.as_ref(), signal, self.clock.now(), record_id);
        self.snapshots.insert(signal.id.clone(), snap);

        self.seal_if_full();
        let sealed = self.is_sealed(record_id);
        info!(
            "Snapshot locked: {} {} {} @ {:.4} (record #{}, hash {})",
            signal.id,
            signal.direction,
            signal.symbol,
            signal.entry_price,
            record_id,
            short_hash(&content_hash)
        );

        Ok(SnapshotReceipt {
            signal_id: signal.id.clone(),
            content_hash,
            record_id,
            sealed,
        })
    }

    /// Append an EXIT, MODIFY or CANCEL record for a known trade.
    pub fn append(
        &mut self,
        trade_id: &str,
        action: LedgerAction,
        payload: serde_json::Value,
    ) -> Result<u64, LedgerError> {
        self.ensure_writable()?;
        if action == LedgerAction::Entry {
            return Err(LedgerError::InvalidAction(action));
        }
        if !self.snapshots.contains_key(trade_id) {
            return Err(LedgerError::UnknownSignal(trade_id.to_string()));
        }
        let id = self.push_record(trade_id, action, payload);
        debug!("Ledger record #{} {} {}", id, action, trade_id);
        self.seal_if_full();
        Ok(id)
    }

    /// Seal whatever is pending. Returns the new block index, if any.
    pub fn flush(&mut self) -> Result<Option<u64>, LedgerError> {
        self.ensure_writable()?;
        if self.pending.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.seal_pending()))
    }

    fn ensure_writable(&self) -> Result<(), LedgerError> {
        match &self.fault {
            Some(reason) => Err(LedgerError::IntegrityFault(reason.clone())),
            None => Ok(()),
        }
    }

    fn push_record(
        &mut self,
        trade_id: &str,
        action: LedgerAction,
        payload: serde_json::Value,
    ) -> u64 {
        let h = self.hasher.as_ref();
        let mut record = LedgerRecord {
            id: self.next_record_id,
            trade_id: trade_id.to_string(),
            action,
            timestamp: self.clock.now(),
            payload,
            previous_hash: self.last_record_hash.clone(),
            hash: String::new(),
            signature: String::new(),
        };
        record.hash = record.compute_hash(h);
        record.signature = LedgerRecord::sign(h, &self.cfg.signing_key, &record.hash);

        self.last_record_hash = record.hash.clone();
        self.next_record_id += 1;
        let id = record.id;
        self.pending.push(record);
        id
    }

    fn seal_if_full(&mut self) {
        if self.pending.len() >= self.cfg.batch_size.max(1) {
            self.seal_pending();
        }
    }

    fn seal_pending(&mut self) -> u64 {
        let records = std::mem::take(&mut self.pending);
        let count = records.len();
        let previous = self
            .blocks
            .last()
            .map(|b| b.hash.clone())
            .unwrap_or_else(zero_hash);
        let index = self.blocks.len() as u64;
        let block = Block::seal(
            self.hasher.as_ref(),
            index,
            self.clock.now(),
            records,
            previous,
            self.cfg.difficulty,
        );
        info!(
            "Block #{} sealed: {} records, nonce {}, hash {}",
            block.index,
            count,
            block.nonce,
            short_hash(&block.hash)
        );
        self.blocks.push(block);
        index
    }

    // ── Verification ────────────────────────────────────────────

    /// Recompute the snapshot's content hash and every record written for the
    /// signal, along with the Merkle root and hash of each sealed block holding
    /// one. A mismatch is logged as a modification and faults the ledger.
    /// Repeated calls give the same answer.
    pub fn verify_no_repaint(&mut self, signal_id: &str) -> Result<bool, LedgerError> {
        let check = self.check_snapshot(signal_id)?;
        let now = self.clock.now();
        let snap = self
            .snapshots
            .get_mut(signal_id)
            .ok_or_else(|| LedgerError::UnknownSignal(signal_id.to_string()))?;

        match check {
            Ok(()) => {
                snap.no_repaint_verified = true;
                Ok(true)
            }
            Err((actual_hash, detail)) => {
                snap.no_repaint_verified = false;
                if !snap
                    .modifications
                    .iter()
                    .any(|m| m.actual_hash == actual_hash && m.detail == detail)
                {
                    snap.modifications.push(SnapshotModification {
                        detected_at: now,
                        expected_hash: snap.content_hash.clone(),
                        actual_hash,
                        detail: detail.clone(),
                    });
                }
                error!("Repaint detected on {}: {}", signal_id, detail);
                self.fault = Some(format!("{}: {}", signal_id, detail));
                Ok(false)
            }
        }
    }

    /// Outer error: unknown signal. Inner error: (recomputed hash, reason).
    fn check_snapshot(
        &self,
        signal_id: &str,
    ) -> Result<Result<(), (String, String)>, LedgerError> {
        let snap = self
            .snapshots
            .get(signal_id)
            .ok_or_else(|| LedgerError::UnknownSignal(signal_id.to_string()))?;
        let h = self.hasher.as_ref();
        let actual = snap.recompute_hash(h);

        if !snap.locked {
            return Ok(Err((actual, "snapshot is not locked".to_string())));
        }
        if actual != snap.content_hash {
            return Ok(Err((actual, "snapshot content hash mismatch".to_string())));
        }
        let Some(entry) = self.record(snap.entry_record_id) else {
            return Ok(Err((actual, "ENTRY record missing".to_string())));
        };
        if entry.action != LedgerAction::Entry || entry.trade_id != signal_id {
            return Ok(Err((actual, "ENTRY record does not match signal".to_string())));
        }
        if entry.compute_hash(h) != entry.hash {
            return Ok(Err((actual, "ENTRY record hash mismatch".to_string())));
        }
        if entry.payload.get("content_hash").and_then(|v| v.as_str())
            != Some(snap.content_hash.as_str())
        {
            return Ok(Err((actual, "ENTRY record holds a different content hash".to_string())));
        }

        let records: Vec<&LedgerRecord> = self.all_records().collect();
        for (i, r) in records.iter().enumerate() {
            if r.trade_id != signal_id {
                continue;
            }
            let expected_previous = match i.checked_sub(1) {
                Some(p) => records[p].hash.clone(),
                None => zero_hash(),
            };
            if r.previous_hash != expected_previous {
                return Ok(Err((actual, format!("record {} is not linked to its predecessor", r.id))));
            }
            if r.compute_hash(h) != r.hash {
                return Ok(Err((actual, format!("record {} hash mismatch", r.id))));
            }
            if LedgerRecord::sign(h, &self.cfg.signing_key, &r.hash) != r.signature {
                return Ok(Err((actual, format!("record {} signature invalid", r.id))));
            }
        }

        for block in self
            .blocks
            .iter()
            .filter(|b| b.records.iter().any(|r| r.trade_id == signal_id))
        {
            if block.compute_merkle_root(h) != block.merkle_root {
                return Ok(Err((actual, format!("block {} Merkle root mismatch", block.index))));
            }
            if block.compute_hash(h) != block.hash {
                return Ok(Err((actual, format!("block {} hash mismatch", block.index))));
            }
        }
        Ok(Ok(()))
    }

    /// Mark a snapshot confirmed once the grace window has passed and it
    /// still verifies.
    pub fn confirm_immutable(&mut self, signal_id: &str) -> Result<(), LedgerError> {
        let captured_at = self
            .snapshots
            .get(signal_id)
            .map(|s| s.captured_at)
            .ok_or_else(|| LedgerError::UnknownSignal(signal_id.to_string()))?;
        let now = self.clock.now();
        let elapsed = now - captured_at;
        let grace = Duration::seconds(self.cfg.grace_window_secs);
        if elapsed < grace {
            return Err(LedgerError::GraceWindowOpen {
                signal_id: signal_id.to_string(),
                remaining_secs: (grace - elapsed).num_seconds().max(1),
            });
        }
        if !self.verify_no_repaint(signal_id)? {
            return Err(LedgerError::IntegrityFault(format!(
                "{} failed no-repaint verification",
                signal_id
            )));
        }
        if let Some(snap) = self.snapshots.get_mut(signal_id) {
            if !snap.confirmed {
                snap.confirmed = true;
                snap.confirmed_at = Some(now);
                info!("Snapshot confirmed immutable: {}", signal_id);
            }
        }
        Ok(())
    }

    /// Full verification of sealed blocks, record signatures and the pending
    /// tail. A failure faults the ledger.
    pub fn verify_chain(&mut self) -> ChainVerification {
        let v = self.check_chain();
        if !v.is_valid {
            error!("Ledger verification failed: {}", v.message);
            self.fault = Some(v.message.clone());
        }
        v
    }

    fn check_chain(&self) -> ChainVerification {
        let h = self.hasher.as_ref();
        let mut v = verify_blocks(&self.blocks, h);
        if !v.is_valid {
            return v;
        }
        let tip = self.blocks.len() as u64;
        let broken = |block: u64, message: String| ChainVerification {
            is_valid: false,
            total_blocks: v.total_blocks,
            total_records: v.total_records + self.pending.len(),
            first_broken_block: Some(block),
            message,
        };

        for block in &self.blocks {
            for r in &block.records {
                if LedgerRecord::sign(h, &self.cfg.signing_key, &r.hash) != r.signature {
                    return broken(block.index, format!("Record {} signature invalid", r.id));
                }
            }
        }

        let mut prev = self
            .blocks
            .iter()
            .rev()
            .find_map(|b| b.records.last())
            .map(|r| r.hash.clone())
            .unwrap_or_else(zero_hash);
        for r in &self.pending {
            if r.previous_hash != prev || r.compute_hash(h) != r.hash {
                return broken(tip, format!("Pending record {} breaks the chain", r.id));
            }
            if LedgerRecord::sign(h, &self.cfg.signing_key, &r.hash) != r.signature {
                return broken(tip, format!("Record {} signature invalid", r.id));
            }
            prev = r.hash.clone();
        }

        v.total_records += self.pending.len();
        v
    }

    /// Re-verify everything and clear the fault when the ledger is clean.
    pub fn reconcile(&mut self) -> Result<ChainVerification, LedgerError> {
        let v = self.check_chain();
        if !v.is_valid {
            self.fault = Some(v.message.clone());
            return Err(LedgerError::IntegrityFault(v.message));
        }
        let mut ids: Vec<String> = self.snapshots.keys().cloned().collect();
        ids.sort();
        for id in ids {
            if let Err((_, detail)) = self.check_snapshot(&id)? {
                let reason = format!("{}: {}", id, detail);
                self.fault = Some(reason.clone());
                return Err(LedgerError::IntegrityFault(reason));
            }
        }
        if let Some(previous) = self.fault.take() {
            warn!("Ledger fault cleared after reconcile (was: {})", previous);
        }
        Ok(v)
    }

    // ── Export / import ─────────────────────────────────────────

    /// Seal pending records and serialise the ordered block list.
    pub fn export(&mut self) -> Result<String, LedgerError> {
        self.flush()?;
        Ok(serde_json::to_string_pretty(&self.blocks)?)
    }

    pub fn export_to_file(&mut self, path: &Path) -> Result<(), LedgerError> {
        let json = self.export()?;
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        std::fs::write(path, json)?;
        info!("Ledger exported to {} ({} blocks)", path.display(), self.blocks.len());
        Ok(())
    }

    /// Rebuild a ledger from an export, refusing anything that does not verify.
    pub fn import(
        json: &str,
        cfg: LedgerConfig,
        hasher: SharedHasher,
        clock: SharedClock,
    ) -> Result<Self, LedgerError> {
        let blocks: Vec<Block> = serde_json::from_str(json)?;
        let h = hasher.as_ref();
        let v = verify_blocks(&blocks, h);
        if !v.is_valid {
            return Err(LedgerError::IntegrityFault(v.message));
        }

        let mut snapshots = HashMap::new();
        let mut next_record_id = 1;
        let mut last_record_hash = zero_hash();
        for r in blocks.iter().flat_map(|b| b.records.iter()) {
            if LedgerRecord::sign(h, &cfg.signing_key, &r.hash) != r.signature {
                return Err(LedgerError::IntegrityFault(format!(
                    "Record {} signature invalid",
                    r.id
                )));
            }
            if r.action == LedgerAction::Entry {
                let signal: CandidateSignal = serde_json::from_value(
                    r.payload.get("signal").cloned().unwrap_or_default(),
                )?;
                let snap = SignalSnapshot::capture(h, &signal, r.timestamp, r.id);
                if r.payload.get("content_hash").and_then(|v| v.as_str())
                    != Some(snap.content_hash.as_str())
                {
                    return Err(LedgerError::IntegrityFault(format!(
                        "ENTRY record {} content hash mismatch for {}",
                        r.id, signal.id
                    )));
                }
                snapshots.insert(signal.id.clone(), snap);
            }
            next_record_id = r.id + 1;
            last_record_hash = r.hash.clone();
        }

        info!(
            "Ledger imported: {} blocks, {} records, {} snapshots",
            v.total_blocks,
            v.total_records,
            snapshots.len()
        );
        Ok(Self {
            cfg,
            hasher,
            clock,
            blocks,
            pending: Vec::new(),
            snapshots,
            next_record_id,
            last_record_hash,
            fault: None,
        })
    }

    // ── Reads ───────────────────────────────────────────────────

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn pending(&self) -> &[LedgerRecord] {
        &self.pending
    }

    pub fn snapshot(&self, signal_id: &str) -> Option<&SignalSnapshot> {
        self.snapshots.get(signal_id)
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    pub fn hasher(&self) -> &SharedHasher {
        &self.hasher
    }

    pub fn record(&self, id: u64) -> Option<&LedgerRecord> {
        self.all_records().find(|r| r.id == id)
    }

    /// Every record for `trade_id`, oldest first.
    pub fn history(&self, trade_id: &str) -> Vec<&LedgerRecord> {
        self.all_records().filter(|r| r.trade_id == trade_id).collect()
    }

    pub fn is_sealed(&self, record_id: u64) -> bool {
        self.blocks
            .iter()
            .any(|b| b.records.iter().any(|r| r.id == record_id))
    }

    /// Merkle inclusion proof for a sealed record.
    pub fn prove_record(&self, record_id: u64) -> Option<RecordProof> {
        let block = self
            .blocks
            .iter()
            .find(|b| b.records.iter().any(|r| r.id == record_id))?;
        let leaves = block.record_hashes();
        let pos = block.records.iter().position(|r| r.id == record_id)?;
        let steps = merkle_proof(self.hasher.as_ref(), &leaves, pos)?;
        Some(RecordProof {
            record_id,
            block_index: block.index,
            record_hash: leaves[pos].clone(),
            merkle_root: block.merkle_root.clone(),
            steps,
        })
    }

    fn all_records(&self) -> impl Iterator<Item = &LedgerRecord> {
        self.blocks
            .iter()
            .flat_map(|b| b.records.iter())
            .chain(self.pending.iter())
    }
}

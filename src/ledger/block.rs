use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::hashing::{meets_difficulty, zero_hash, HashFunction};
use crate::ledger::merkle::merkle_root;
use crate::models::LedgerAction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: u64,
    pub trade_id: String,
    pub action: LedgerAction,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub previous_hash: String,
    pub hash: String,
    pub signature: String,
}

impl LedgerRecord {
    pub fn compute_hash(&self, h: &dyn HashFunction) -> String {
        let id = self.id.to_string();
        let action = self.action.to_string();
        let ts = self.timestamp.to_rfc3339();
        let payload = self.payload.to_string();
        h.hash_fields(&[
            &id,
            &self.trade_id,
            &action,
            &ts,
            &payload,
            &self.previous_hash,
        ])
    }

    pub fn sign(h: &dyn HashFunction, key: &str, hash: &str) -> String {
        h.digest(format!("{}:{}", key, hash).as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub records: Vec<LedgerRecord>,
    pub hash: String,
    pub previous_hash: String,
    pub merkle_root: String,
    pub nonce: u64,
    pub difficulty: usize,
}

impl Block {
    pub fn genesis(h: &dyn HashFunction, timestamp: DateTime<Utc>, difficulty: usize) -> Self {
        Self::seal(h, 0, timestamp, Vec::new(), zero_hash(), difficulty)
    }

    /// Build a block over `records` and search nonces until the hash meets `difficulty`.
    pub fn seal(
        h: &dyn HashFunction,
        index: u64,
        timestamp: DateTime<Utc>,
        records: Vec<LedgerRecord>,
        previous_hash: String,
        difficulty: usize,
    ) -> Self {
        let leaves: Vec<String> = records.iter().map(|r| r.hash.clone()).collect();
        let mut block = Self {
            index,
            timestamp,
            merkle_root: merkle_root(h, &leaves),
            records,
            hash: String::new(),
            previous_hash,
            nonce: 0,
            difficulty,
        };
        loop {
            let hash = block.compute_hash(h);
            if meets_difficulty(&hash, difficulty) {
                block.hash = hash;
                return block;
            }
            block.nonce += 1;
        }
    }

    pub fn record_hashes(&self) -> Vec<String> {
        self.records.iter().map(|r| r.hash.clone()).collect()
    }

    pub fn compute_merkle_root(&self, h: &dyn HashFunction) -> String {
        merkle_root(h, &self.record_hashes())
    }

    pub fn compute_hash(&self, h: &dyn HashFunction) -> String {
        let index = self.index.to_string();
        let ts = self.timestamp.to_rfc3339();
        let records = self.record_hashes().join(",");
        let nonce = self.nonce.to_string();
        let difficulty = self.difficulty.to_string();
        h.hash_fields(&[
            &index,
            &ts,
            &self.merkle_root,
            &records,
            &self.previous_hash,
            &nonce,
            &difficulty,
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub is_valid: bool,
    pub total_blocks: usize,
    pub total_records: usize,
    pub first_broken_block: Option<u64>,
    pub message: String,
}

/// Walk `blocks` in order checking linkage, block hashes, proof of work,
/// Merkle roots and the record hash chain. Needs nothing but the blocks and
/// the hash function, so external consumers can run it on an export.
pub fn verify_blocks(blocks: &[Block], h: &dyn HashFunction) -> ChainVerification {
    let total_records = blocks.iter().map(|b| b.records.len()).sum();
    let broken = |index: u64, message: String| ChainVerification {
        is_valid: false,
        total_blocks: blocks.len(),
        total_records,
        first_broken_block: Some(index),
        message,
    };

    if blocks.is_empty() {
        return broken(0, "Missing genesis block".to_string());
    }

    let mut expected_prev_block = zero_hash();
    let mut expected_prev_record = zero_hash();
    let mut expected_record_id: Option<u64> = None;

    for (i, block) in blocks.iter().enumerate() {
        if block.index != i as u64 {
            return broken(
                block.index,
                format!("Block at position {} has index {}", i, block.index),
            );
        }
        if block.previous_hash != expected_prev_block {
            return broken(
                block.index,
                format!(
                    "Chain broken at block {}: expected previous '{}', got '{}'",
                    block.index,
                    &expected_prev_block[..expected_prev_block.len().min(16)],
                    &block.previous_hash[..block.previous_hash.len().min(16)],
                ),
            );
        }
        if block.compute_merkle_root(h) != block.merkle_root {
            return broken(
                block.index,
                format!("Merkle root mismatch at block {}", block.index),
            );
        }
        if block.compute_hash(h) != block.hash {
            return broken(
                block.index,
                format!(
                    "Hash mismatch at block {}: block may have been tampered with",
                    block.index
                ),
            );
        }
        if !meets_difficulty(&block.hash, block.difficulty) {
            return broken(
                block.index,
                format!(
                    "Block {} hash does not meet difficulty {}",
                    block.index, block.difficulty
                ),
            );
        }

        for record in &block.records {
            if let Some(expected) = expected_record_id {
                if record.id != expected {
                    return broken(
                        block.index,
                        format!(
                            "Record sequence gap in block {}: expected {}, got {}",
                            block.index, expected, record.id
                        ),
                    );
                }
            }
            if record.previous_hash != expected_prev_record {
                return broken(
                    block.index,
                    format!("Record chain broken at record {}", record.id),
                );
            }
            if record.compute_hash(h) != record.hash {
                return broken(
                    block.index,
                    format!("Record {} hash mismatch: payload may have been altered", record.id),
                );
            }
            expected_prev_record = record.hash.clone();
            expected_record_id = Some(record.id + 1);
        }

        expected_prev_block = block.hash.clone();
    }

    ChainVerification {
        is_valid: true,
        total_blocks: blocks.len(),
        total_records,
        first_broken_block: None,
        message: format!(
            "All {} blocks and {} records verified successfully",
            blocks.len(),
            total_records
        ),
    }
}

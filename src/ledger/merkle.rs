use serde::{Deserialize, Serialize};

use crate::ledger::hashing::HashFunction;

/// One sibling on the path from a leaf to the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofStep {
    pub hash: String,
    /// Sibling sits to the left of the running hash.
    pub is_left: bool,
}

fn parent(h: &dyn HashFunction, left: &str, right: &str) -> String {
    h.digest(format!("{}{}", left, right).as_bytes())
}

fn next_level(h: &dyn HashFunction, level: &[String]) -> Vec<String> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [l, r] => parent(h, l, r),
            // Odd count: pair the last node with itself.
            _ => parent(h, &pair[0], &pair[0]),
        })
        .collect()
}

/// Pairwise root over `leaves`. An empty set hashes the empty string.
pub fn merkle_root(h: &dyn HashFunction, leaves: &[String]) -> String {
    if leaves.is_empty() {
        return h.digest(b"");
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(h, &level);
    }
    level.remove(0)
}

pub fn merkle_proof(h: &dyn HashFunction, leaves: &[String], index: usize) -> Option<Vec<ProofStep>> {
    if index >= leaves.len() {
        return None;
    }
    let mut proof = Vec::new();
    let mut level = leaves.to_vec();
    let mut idx = index;
    while level.len() > 1 {
        let sibling = if idx % 2 == 0 {
            let s = level.get(idx + 1).unwrap_or(&level[idx]);
            ProofStep {
                hash: s.clone(),
                is_left: false,
            }
        } else {
            ProofStep {
                hash: level[idx - 1].clone(),
                is_left: true,
            }
        };
        proof.push(sibling);
        level = next_level(h, &level);
        idx /= 2;
    }
    Some(proof)
}

pub fn verify_proof(h: &dyn HashFunction, leaf: &str, proof: &[ProofStep], root: &str) -> bool {
    let computed = proof.iter().fold(leaf.to_string(), |acc, step| {
        if step.is_left {
            parent(h, &step.hash, &acc)
        } else {
            parent(h, &acc, &step.hash)
        }
    });
    computed == root
}

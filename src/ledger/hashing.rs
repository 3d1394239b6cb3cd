use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Digest used for records, blocks, Merkle nodes and snapshots. Output is
/// lowercase hex.
pub trait HashFunction: Send + Sync {
    fn digest(&self, data: &[u8]) -> String;

    fn name(&self) -> &'static str;

    /// Hash of `fields` joined with `|`.
    fn hash_fields(&self, fields: &[&str]) -> String {
        self.digest(fields.join("|").as_bytes())
    }
}

pub type SharedHasher = Arc<dyn HashFunction>;

#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hasher;

impl HashFunction for Sha256Hasher {
    fn digest(&self, data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    fn name(&self) -> &'static str {
        "sha256"
    }
}

/// Previous-hash placeholder for the first record and the genesis block.
pub fn zero_hash() -> String {
    "0".repeat(64)
}

/// True when `hash` starts with `difficulty` zero hex digits.
/// Leading 16 characters for log lines; shorter digests come back whole.
pub fn short_hash(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}

pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            Sha256Hasher.digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn fields_are_pipe_joined() {
        let h = Sha256Hasher;
        assert_eq!(h.hash_fields(&["a", "b"]), h.digest(b"a|b"));
        assert_ne!(h.hash_fields(&["a|b"]), h.hash_fields(&["a", "c"]));
    }

    #[test]
    fn difficulty_counts_leading_zeros() {
        assert!(meets_difficulty("00ab", 2));
        assert!(!meets_difficulty("0a0b", 2));
        assert!(meets_difficulty("abc", 0));
        assert!(!meets_difficulty("0", 2));
    }

    #[test]
    fn short_hash_tolerates_small_digests() {
        assert_eq!(short_hash(&zero_hash()), "0000000000000000");
        assert_eq!(short_hash("abc"), "abc");
    }
}

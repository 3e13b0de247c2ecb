// chain/src/types/block.rs

//! Block type, canonical hashing, and proof-of-work sealing.
//!
//! A block's content hash is the SHA-256 digest of its canonical
//! key-sorted JSON with the `hash` field omitted; transactions inside are
//! embedded with their signatures. The same bytes are used for mining,
//! validation, and the wire format, so there is exactly one encoding.

use serde::{Deserialize, Serialize};

use super::tx::Transaction;
use super::{canonical_bytes, canonical_bytes_without, sha256_hex};

/// Strongly-typed block hash: a lowercase hex SHA-256 digest.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(pub String);

impl BlockHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the hash starts with at least `difficulty` hex zeros.
    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        self.0.len() >= difficulty && self.0.as_bytes()[..difficulty].iter().all(|b| *b == b'0')
    }
}

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One block of the chain.
///
/// `id` is the block's 0-based position; the value `-1` never appears on
/// a chain and is reserved for the end-of-chain sentinel frame used by
/// chain transfers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: i64,
    pub txns: Vec<Transaction>,
    pub nonce: u64,
    pub prev_hash: String,
    pub timestamp: f64,
    pub hash: BlockHash,
}

impl Block {
    /// Builds an unsealed candidate block (nonce 0, empty hash) for the
    /// miner to work on.
    pub fn candidate(id: i64, txns: Vec<Transaction>, prev_hash: String, timestamp: f64) -> Self {
        Self {
            id,
            txns,
            nonce: 0,
            prev_hash,
            timestamp,
            hash: BlockHash(String::new()),
        }
    }

    /// The end-of-chain sentinel sent after the last block of a
    /// `GET-CHAIN` transfer.
    pub fn end_of_chain() -> Self {
        Self {
            id: -1,
            txns: Vec::new(),
            nonce: 0,
            prev_hash: String::new(),
            timestamp: 0.0,
            hash: BlockHash(String::new()),
        }
    }

    pub fn is_end_of_chain(&self) -> bool {
        self.id < 0
    }

    /// Canonical bytes that feed the content hash: everything but the
    /// `hash` field, keys sorted.
    pub fn hashable_bytes(&self) -> Vec<u8> {
        canonical_bytes_without(self, "hash")
    }

    /// Recomputes this block's content hash from its fields.
    pub fn compute_hash(&self) -> BlockHash {
        BlockHash(sha256_hex(&self.hashable_bytes()))
    }

    /// Tries one nonce: sets it, recomputes the hash, and keeps the hash
    /// if it clears the difficulty. Returns whether the block is now
    /// sealed.
    pub fn try_seal(&mut self, nonce: u64, difficulty: usize) -> bool {
        self.nonce = nonce;
        let hash = self.compute_hash();
        if hash.meets_difficulty(difficulty) {
            self.hash = hash;
            return true;
        }
        false
    }

    /// Block-local validity: stored hash matches the recomputed one,
    /// clears the difficulty, and every transaction's signature verifies.
    ///
    /// Linkage and semantic rules live on the chain, not here.
    pub fn is_valid(&self, difficulty: usize) -> bool {
        let recomputed = self.compute_hash();
        if recomputed != self.hash {
            tracing::debug!(
                id = self.id,
                stored = %self.hash,
                recomputed = %recomputed,
                "block hash does not match its contents"
            );
            return false;
        }

        if !self.hash.meets_difficulty(difficulty) {
            tracing::debug!(id = self.id, hash = %self.hash, "block hash misses difficulty");
            return false;
        }

        for txn in &self.txns {
            if !txn.verify() {
                tracing::debug!(id = self.id, "block carries an unverifiable transaction");
                return false;
            }
        }

        true
    }

    /// Canonical wire bytes, hash included.
    pub fn to_bytes(&self) -> Vec<u8> {
        canonical_bytes(self)
    }

    /// Parses a block from canonical wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GENESIS_PREV_HASH, Identity, TxData, tx::Transaction};
    use std::sync::OnceLock;

    fn test_identity() -> &'static Identity {
        static IDENTITY: OnceLock<Identity> = OnceLock::new();
        IDENTITY.get_or_init(|| Identity::generate().expect("keygen"))
    }

    fn signed_tx() -> Transaction {
        let identity = test_identity();
        let mut tx = Transaction::new(
            identity.peer_id().clone(),
            1_700_000_000.0,
            TxData::create_poll(
                "11111111-2222-4333-8444-555555555555".to_string(),
                "lunch".to_string(),
                vec!["a".to_string(), "b".to_string()],
            ),
        );
        tx.sign(identity);
        tx
    }

    /// Seals a block at low difficulty, trying nonces until one fits.
    fn mine_block(id: i64, prev_hash: &str, difficulty: usize) -> Block {
        let mut block = Block::candidate(id, vec![signed_tx()], prev_hash.to_string(), 1_700_000_001.0);
        let mut nonce = 0;
        while !block.try_seal(nonce, difficulty) {
            nonce += 1;
        }
        block
    }

    #[test]
    fn sealed_block_is_valid_and_hash_recomputes() {
        let block = mine_block(0, GENESIS_PREV_HASH, 1);
        assert!(block.is_valid(1));
        assert_eq!(block.compute_hash(), block.hash);
        assert!(block.hash.as_str().starts_with('0'));
    }

    #[test]
    fn hash_is_deterministic() {
        let block = mine_block(0, GENESIS_PREV_HASH, 1);
        assert_eq!(block.compute_hash(), block.compute_hash());
    }

    #[test]
    fn hashable_bytes_omit_hash_field() {
        let mut block = mine_block(0, GENESIS_PREV_HASH, 1);
        let before = block.hashable_bytes();
        block.hash = BlockHash("f".repeat(64));
        assert_eq!(before, block.hashable_bytes());
    }

    #[test]
    fn tampered_block_fails_validity() {
        let block = mine_block(0, GENESIS_PREV_HASH, 1);

        let mut wrong_nonce = block.clone();
        wrong_nonce.nonce += 1;
        assert!(!wrong_nonce.is_valid(1));

        let mut wrong_prev = block.clone();
        wrong_prev.prev_hash = "f".repeat(64);
        assert!(!wrong_prev.is_valid(1));

        let mut wrong_txn = block.clone();
        wrong_txn.txns[0].timestamp += 1.0;
        assert!(!wrong_txn.is_valid(1));
    }

    #[test]
    fn difficulty_prefix_is_enforced() {
        let block = mine_block(0, GENESIS_PREV_HASH, 1);
        // A block sealed at difficulty 1 almost certainly misses a
        // 64-zero prefix.
        assert!(!block.hash.meets_difficulty(64));
        assert!(BlockHash("0".repeat(64)).meets_difficulty(64));
        assert!(!BlockHash("0ab".to_string()).meets_difficulty(4));
    }

    #[test]
    fn wire_roundtrip_preserves_block() {
        let block = mine_block(3, "00ab", 1);
        let back = Block::from_bytes(&block.to_bytes()).unwrap();
        assert_eq!(block, back);
        assert!(back.is_valid(1));
    }

    #[test]
    fn sentinel_is_recognizable_and_roundtrips() {
        let sentinel = Block::end_of_chain();
        assert!(sentinel.is_end_of_chain());
        let back = Block::from_bytes(&sentinel.to_bytes()).unwrap();
        assert!(back.is_end_of_chain());
    }
}

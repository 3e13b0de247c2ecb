//! The chain itself: ordered blocks plus admission rules.
//!
//! Admission is layered the cheap-checks-first way: position and linkage
//! are plain field comparisons, block-local validity re-hashes and
//! re-verifies signatures, and the semantic rule (no duplicate poll
//! names) scans the chain. Fork resolution replaces the whole suffix and
//! hands back the local peer's dropped transactions for re-mining.

use crate::types::{Block, GENESIS_PREV_HASH, PeerId, Transaction};

/// An ordered sequence of blocks with a fixed network difficulty.
pub struct Blockchain {
    blocks: Vec<Block>,
    difficulty: usize,
}

impl Blockchain {
    /// Creates an empty chain.
    pub fn new(difficulty: usize) -> Self {
        Self {
            blocks: Vec::new(),
            difficulty,
        }
    }

    /// Builds a chain from blocks fetched from a remote peer, admitting
    /// them one by one. Returns `None` as soon as any block fails
    /// admission; a partially valid chain is abandoned entirely.
    pub fn from_validated(blocks: Vec<Block>, difficulty: usize) -> Option<Self> {
        let mut chain = Blockchain::new(difficulty);
        for block in blocks {
            if !chain.can_append(&block) {
                return None;
            }
            chain.append(block);
        }
        Some(chain)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// The last block, if any.
    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Shallow copy of the whole chain, handed to the application layer
    /// and to `GET-CHAIN` service so no lock is held across I/O.
    pub fn snapshot(&self) -> Vec<Block> {
        self.blocks.clone()
    }

    /// Consumes the chain, yielding its blocks.
    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    /// Position the next mined block will occupy.
    pub fn next_id(&self) -> i64 {
        self.blocks.len() as i64
    }

    /// `prev_hash` the next mined block must carry.
    pub fn next_prev_hash(&self) -> String {
        match self.tip() {
            Some(tip) => tip.hash.as_str().to_string(),
            None => GENESIS_PREV_HASH.to_string(),
        }
    }

    /// Full admission check for `block` as the next chain entry:
    ///
    /// 1. `block.id` equals the current length;
    /// 2. `block.prev_hash` links to the tip (genesis accepts anything);
    /// 3. block-local validity at the configured difficulty;
    /// 4. the block does not re-create an existing poll name.
    pub fn can_append(&self, block: &Block) -> bool {
        if block.id != self.next_id() {
            tracing::debug!(id = block.id, expected = self.next_id(), "rejected block: wrong position");
            return false;
        }

        if let Some(tip) = self.tip() {
            if block.prev_hash != tip.hash.as_str() {
                tracing::debug!(id = block.id, "rejected block: does not link to tip");
                return false;
            }
        }

        if !block.is_valid(self.difficulty) {
            return false;
        }

        if self.is_repeat_poll(block) {
            tracing::debug!(id = block.id, "rejected block: poll name already exists");
            return false;
        }

        true
    }

    /// True if `block`'s first transaction creates a poll whose name is
    /// already created by some block on the chain.
    pub fn is_repeat_poll(&self, block: &Block) -> bool {
        let Some(name) = block
            .txns
            .first()
            .and_then(|txn| txn.data.created_poll_name())
        else {
            return false;
        };

        self.blocks.iter().any(|existing| {
            existing
                .txns
                .first()
                .and_then(|txn| txn.data.created_poll_name())
                .is_some_and(|existing_name| existing_name == name)
        })
    }

    /// True if `block`'s first transaction votes in a poll that no block
    /// on the chain has created.
    ///
    /// Only the miner consults this, for its own freshly mined block;
    /// replicated blocks from other peers are not re-checked.
    pub fn is_vote_for_unknown_poll(&self, block: &Block) -> bool {
        let Some(poll_id) = block.txns.first().and_then(|txn| txn.data.voted_poll_id()) else {
            return false;
        };

        !self.blocks.iter().any(|existing| {
            existing.txns.iter().any(|txn| {
                txn.data
                    .action()
                    .and_then(|action| match action {
                        crate::types::PollAction::CreatePoll { poll_id: id, .. } => Some(id.as_str()),
                        _ => None,
                    })
                    .is_some_and(|id| id == poll_id)
            })
        })
    }

    /// Appends without re-checking; callers hold the chain lock and have
    /// already run [`can_append`](Blockchain::can_append).
    pub fn append(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// Mutable access for the fault-injection hooks; nothing else may
    /// rewrite history.
    pub(crate) fn blocks_mut(&mut self) -> &mut [Block] {
        &mut self.blocks
    }

    /// Replaces this chain with `remote` (already validated by the
    /// caller) and returns the local peer's transactions from the
    /// dropped suffix, oldest first.
    ///
    /// The dropped suffix starts after the longest common prefix.
    /// Transactions by other senders are discarded; re-mining those is
    /// their originator's job.
    pub fn replace_with(&mut self, remote: Vec<Block>, local_id: &PeerId) -> Vec<Transaction> {
        let common = self
            .blocks
            .iter()
            .zip(remote.iter())
            .take_while(|(ours, theirs)| ours.hash == theirs.hash)
            .count();

        let dropped: Vec<Transaction> = self.blocks[common..]
            .iter()
            .flat_map(|block| block.txns.iter())
            .filter(|txn| &txn.sender == local_id)
            .cloned()
            .collect();

        self.blocks = remote;
        dropped
    }
}

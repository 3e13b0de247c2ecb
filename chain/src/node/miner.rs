//! The mining loop.
//!
//! The miner works on one transaction at a time and must stay
//! cooperative: it holds the chain lock only to snapshot the tip and to
//! append, and it bounds each hashing burst so inbound blocks get a
//! chance to move the chain underneath it. When that happens the
//! in-flight transaction goes back to the front of the queue and the
//! whole step restarts against the new tip.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::types::{Block, Transaction, unix_timestamp};

use super::{Shared, broadcast_block};

/// Nonces tried per pass before re-checking the chain head.
const ATTEMPTS_PER_PASS: u64 = 100;

/// Pause between mining passes.
const PASS_DELAY: Duration = Duration::from_millis(100);

/// Yield when the pending queue is empty.
const IDLE_DELAY: Duration = Duration::from_millis(1);

/// What happened when the miner tried to append its sealed block.
enum AppendOutcome {
    /// Appended; broadcast it.
    Appended,
    /// Duplicate poll or vote for a poll that does not exist. The
    /// transaction is dropped, not re-queued.
    SemanticReject,
    /// Another block took our slot while we were hashing; the
    /// transaction goes back to the front of the queue.
    LostRace,
}

pub(crate) async fn run(shared: Arc<Shared>) {
    loop {
        if shared.is_shutting_down() {
            break;
        }

        let Some(mut txn) = shared.pending.lock().await.pop_front() else {
            tokio::time::sleep(IDLE_DELAY).await;
            continue;
        };

        // Stamp and sign at mining time, not submission time, so
        // re-mined transactions carry a fresh signature.
        txn.timestamp = unix_timestamp();
        txn.sign(&shared.identity);

        mine_one(&shared, txn).await;
    }

    tracing::info!("miner stopped");
}

/// Mines `txn` until it lands in a block, is preempted, or is rejected.
async fn mine_one(shared: &Shared, txn: Transaction) {
    let difficulty = shared.config.difficulty;

    let (mine_id, prev_hash) = {
        let chain = shared.chain.lock().await;
        (chain.next_id(), chain.next_prev_hash())
    };

    let mut nonce = 0u64;
    loop {
        if shared.is_shutting_down() {
            // Preserve the transaction for the shutdown report; it was
            // never mined.
            shared.pending.lock().await.push_front(txn);
            return;
        }

        // One pass: a fresh block timestamp, then a bounded nonce burst.
        let started = Instant::now();
        let mut candidate = Block::candidate(
            mine_id,
            vec![txn.clone()],
            prev_hash.clone(),
            unix_timestamp(),
        );

        let mut sealed = false;
        for _ in 0..ATTEMPTS_PER_PASS {
            if candidate.try_seal(nonce, difficulty) {
                sealed = true;
                break;
            }
            nonce = nonce.wrapping_add(1);
        }
        shared
            .metrics
            .node
            .mining_pass_seconds
            .observe(started.elapsed().as_secs_f64());

        if sealed {
            match try_append(shared, &candidate).await {
                AppendOutcome::Appended => {
                    let mined = shared.mined_count.fetch_add(1, Ordering::Relaxed) + 1;
                    broadcast_block(shared, &candidate, mined).await;
                }
                AppendOutcome::SemanticReject => {
                    tracing::warn!(id = candidate.id, "mined block rejected semantically; transaction dropped");
                }
                AppendOutcome::LostRace => {
                    shared.pending.lock().await.push_front(txn);
                }
            }
            return;
        }

        // Pass exhausted: give up on this tip if someone else extended
        // the chain at or past our slot.
        let moved = {
            let chain = shared.chain.lock().await;
            chain.next_id() > mine_id
        };
        if moved {
            tracing::debug!(id = mine_id, "chain moved mid-mine; re-queueing transaction");
            shared.pending.lock().await.push_front(txn);
            return;
        }

        tokio::time::sleep(PASS_DELAY).await;
    }
}

/// Final admission of a locally mined block, under the chain lock.
///
/// Semantic rules come first: a block that would duplicate a poll name
/// or vote in a nonexistent poll is dropped for good, even if it also
/// lost the race.
async fn try_append(shared: &Shared, candidate: &Block) -> AppendOutcome {
    let mut chain = shared.chain.lock().await;

    if chain.is_repeat_poll(candidate) || chain.is_vote_for_unknown_poll(candidate) {
        shared.metrics.node.blocks_rejected.inc();
        return AppendOutcome::SemanticReject;
    }

    if !chain.can_append(candidate) {
        return AppendOutcome::LostRace;
    }

    chain.append(candidate.clone());
    shared.metrics.node.blocks_mined.inc();
    shared.metrics.node.chain_height.set(chain.len() as i64);
    tracing::info!(id = candidate.id, hash = %candidate.hash, "mined block appended");
    AppendOutcome::Appended
}

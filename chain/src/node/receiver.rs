//! The receive-processor: drains the inbound block buffer and runs the
//! fork-resolution state machine.
//!
//! Blocks are processed in arrival order. Block-local validity comes
//! first (cheap, no lock), then linkage under the chain lock. A valid
//! block that claims a position at or past our chain length but does not
//! link exposes a fork; resolution is a full-chain fetch from the peer
//! that mined the block, identified by its first transaction's sender.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::blockchain::Blockchain;
use crate::net::wire::WireError;
use crate::types::Block;

use super::state::PeerState;
use super::{InboundBlock, Shared, fetch_chain};

/// Bound on one whole-chain fetch during fork resolution.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) async fn run(shared: Arc<Shared>, mut inbound: mpsc::UnboundedReceiver<InboundBlock>) {
    let mut shutdown = shared.shutdown_signal();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if shared.is_shutting_down() {
                    break;
                }
            }
            received = inbound.recv() => {
                let Some(message) = received else { break };
                process(&shared, message).await;
            }
        }
    }

    tracing::info!("receive-processor stopped");
}

async fn process(shared: &Shared, message: InboundBlock) {
    let InboundBlock { source_ip, block } = message;
    shared.metrics.node.blocks_received.inc();

    // Block-local validity first: no lock needed, and most garbage dies
    // here.
    if !block.is_valid(shared.config.difficulty) {
        shared.metrics.node.blocks_rejected.inc();
        tracing::debug!(id = block.id, "inbound block failed validity; discarded");
        return;
    }

    {
        let mut chain = shared.chain.lock().await;

        if chain.can_append(&block) {
            tracing::info!(id = block.id, hash = %block.hash, "appended inbound block");
            chain.append(block);
            shared.metrics.node.chain_height.set(chain.len() as i64);
            return;
        }

        if block.id < chain.next_id() {
            // Stale or duplicate position that does not beat our chain.
            shared.metrics.node.blocks_rejected.inc();
            tracing::debug!(id = block.id, height = chain.len(), "stale inbound block; discarded");
            return;
        }
    }

    // Valid, id at or past our length, does not link: a fork.
    resolve_fork(shared, source_ip, &block).await;
}

/// The WAITING_FOR_CHAIN leg of the state machine.
async fn resolve_fork(shared: &Shared, source_ip: IpAddr, block: &Block) {
    shared.set_state(PeerState::WaitingForChain).await;
    tracing::info!(id = block.id, %source_ip, "fork detected; fetching remote chain");

    if let Err(e) = fetch_and_adopt(shared, source_ip, block).await {
        tracing::warn!("fork resolution abandoned: {e}");
    }

    shared.set_state(PeerState::Mining).await;
}

async fn fetch_and_adopt(
    shared: &Shared,
    source_ip: IpAddr,
    block: &Block,
) -> Result<(), WireError> {
    // The fork-exposing block tells us who mined it; the tracker tells
    // us where that peer listens. The IP is the one the block came from,
    // because GET-PEER only resolves ports.
    let Some(sender) = block.txns.first().map(|txn| txn.sender.clone()) else {
        return Err(WireError::BadPayload(
            "fork block carries no transactions".to_string(),
        ));
    };

    let port = {
        let mut tracker = shared.tracker.lock().await;
        tracker.peer_port(&sender).await?
    };
    let Some(port) = port else {
        tracing::warn!(sender = %sender.fingerprint(), "tracker does not know the forking peer");
        return Ok(());
    };

    let blocks = match tokio::time::timeout(FETCH_TIMEOUT, fetch_chain(source_ip, port)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "chain fetch timed out",
            )));
        }
    };
    let remote_len = blocks.len();

    // Validate outside the chain lock; signature checks are not cheap.
    let Some(remote) = Blockchain::from_validated(blocks, shared.config.difficulty) else {
        shared.metrics.node.blocks_rejected.inc();
        tracing::warn!(remote_len, "remote chain failed validation; keeping local chain");
        return Ok(());
    };

    let mut chain = shared.chain.lock().await;
    if remote.len() <= chain.len() {
        tracing::info!(
            remote_len,
            local_len = chain.len(),
            "remote chain not longer; keeping local chain"
        );
        return Ok(());
    }

    let dropped = chain.replace_with(remote.into_blocks(), shared.identity.peer_id());
    shared.metrics.node.fork_resolutions.inc();
    shared.metrics.node.chain_height.set(chain.len() as i64);
    let new_len = chain.len();
    drop(chain);

    // Oldest lost transaction first: pushing front in reverse order
    // leaves the queue prefix in original order.
    let requeued = dropped.len();
    if requeued > 0 {
        let mut pending = shared.pending.lock().await;
        for txn in dropped.into_iter().rev() {
            pending.push_front(txn);
        }
    }

    tracing::info!(height = new_len, requeued, "adopted remote chain");
    Ok(())
}

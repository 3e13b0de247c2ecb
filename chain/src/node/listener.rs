//! The acceptor: one inbound request per connection.
//!
//! Each accepted connection carries exactly one request. A `BLOCK` frame
//! is pushed into the inbound buffer together with its source IP and the
//! connection is done; a `GET-CHAIN` request gets the whole chain
//! streamed back from a snapshot, so the chain lock is never held across
//! the writes.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::net::framed::FrameReader;
use crate::net::wire::{self, FrameTag, PeerRequest};
use crate::types::Block;

use super::{InboundBlock, Shared};

pub(crate) async fn run(shared: Arc<Shared>, listener: TcpListener) {
    let mut shutdown = shared.shutdown_signal();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if shared.is_shutting_down() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        tokio::spawn(handle_connection(shared.clone(), stream, addr));
                    }
                    Err(e) => {
                        tracing::warn!("accept failed: {e}");
                    }
                }
            }
        }
    }

    tracing::info!("acceptor stopped");
}

async fn handle_connection(shared: Arc<Shared>, stream: TcpStream, addr: SocketAddr) {
    let mut frame = FrameReader::new(stream);

    match wire::read_peer_request(&mut frame).await {
        Ok(Some(PeerRequest::Block {
            tag: FrameTag::Block,
            block,
        })) => {
            let message = InboundBlock {
                source_ip: addr.ip(),
                block,
            };
            if shared.inbound.send(message).is_err() {
                tracing::debug!("inbound buffer closed; dropping block");
            }
        }
        Ok(Some(PeerRequest::Block {
            tag: FrameTag::ChainTransfer,
            ..
        })) => {
            tracing::debug!(peer = %addr, "unsolicited chain-transfer frame; dropped");
        }
        Ok(Some(PeerRequest::GetChain)) => {
            serve_chain(&shared, frame.into_inner(), addr).await;
        }
        Ok(None) => {}
        Err(e) => {
            tracing::debug!(peer = %addr, "protocol error on inbound connection: {e}");
        }
    }
}

/// Streams a chain snapshot followed by the end-of-chain sentinel.
async fn serve_chain(shared: &Shared, mut stream: TcpStream, addr: SocketAddr) {
    let snapshot = { shared.chain.lock().await.snapshot() };

    for block in &snapshot {
        if let Err(e) = wire::write_block(&mut stream, block, FrameTag::ChainTransfer).await {
            tracing::debug!(peer = %addr, "chain transfer aborted: {e}");
            return;
        }
    }
    if let Err(e) = wire::write_block(&mut stream, &Block::end_of_chain(), FrameTag::ChainTransfer).await
    {
        tracing::debug!(peer = %addr, "chain transfer sentinel not delivered: {e}");
        return;
    }

    tracing::debug!(peer = %addr, blocks = snapshot.len(), "served chain");
}

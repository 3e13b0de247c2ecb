//! The directory table and the per-peer session loop.
//!
//! A session covers one peer's whole membership: it opens with
//! `JOIN`/`ID`, stays registered while the connection lives, answers
//! `LIST` and `GET-PEER` lookups, and ends with `LEAVE` or disconnect,
//! either of which removes the peer from the table. The directory knows
//! nothing about liveness beyond "this session is still connected".

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use chain::net::framed::FrameReader;
use chain::net::wire::{
    self, PeerAddr, RESP_PEER_PORT, RESP_PEERS, VERB_GET_PEER, VERB_ID, VERB_JOIN, VERB_LEAVE,
    VERB_LIST, WireError,
};
use chain::types::PeerId;

/// The directory table: peer identity to listening address.
#[derive(Default)]
pub struct Directory {
    peers: Mutex<HashMap<PeerId, PeerAddr>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, peer_id: PeerId, addr: PeerAddr) {
        self.peers.lock().await.insert(peer_id, addr);
    }

    pub async fn remove(&self, peer_id: &PeerId) {
        self.peers.lock().await.remove(peer_id);
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Active peers, excluding the asking peer itself.
    pub async fn list_excluding(&self, exclude: &PeerId) -> Vec<PeerAddr> {
        self.peers
            .lock()
            .await
            .iter()
            .filter(|(peer_id, _)| *peer_id != exclude)
            .map(|(_, addr)| *addr)
            .collect()
    }

    /// Listening port of a peer, if it is currently registered.
    pub async fn port_of(&self, peer_id: &PeerId) -> Option<u16> {
        self.peers.lock().await.get(peer_id).map(|addr| addr.port)
    }
}

/// Runs one peer session to completion and deregisters the peer
/// afterwards, whether it left cleanly or just vanished.
pub async fn run_session(directory: Arc<Directory>, stream: TcpStream, addr: SocketAddr) {
    tracing::info!(peer = %addr, "peer connected");

    let mut registered: Option<PeerId> = None;
    if let Err(e) = serve(&directory, stream, addr.ip(), &mut registered).await {
        tracing::debug!(peer = %addr, "session ended with protocol error: {e}");
    }

    if let Some(peer_id) = registered {
        directory.remove(&peer_id).await;
        let remaining = directory.len().await;
        tracing::info!(
            peer = %peer_id.fingerprint(),
            remaining,
            "peer removed from directory"
        );
    }
}

/// The session body, generic over the stream so tests can drive it over
/// an in-memory duplex pipe.
pub(crate) async fn serve<S>(
    directory: &Directory,
    stream: S,
    peer_ip: IpAddr,
    registered: &mut Option<PeerId>,
) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut frame = FrameReader::new(stream);

    // Registration: JOIN with the listening port, then ID with the key.
    let Some(line) = frame.read_line().await? else {
        return Ok(());
    };
    let tokens = wire::split_line(&line)?;
    match tokens.first().map(String::as_str) {
        Some(VERB_JOIN) => {}
        // A peer may bail out before ever registering.
        Some(VERB_LEAVE) => return Ok(()),
        Some(other) => return Err(WireError::UnknownVerb(other.to_string())),
        None => return Err(WireError::MalformedHeader(String::new())),
    }

    let port_line = frame.read_line().await?.ok_or(WireError::UnexpectedEof)?;
    let port = std::str::from_utf8(&port_line)
        .ok()
        .and_then(|raw| raw.trim().parse::<u16>().ok())
        .ok_or_else(|| {
            WireError::MalformedHeader(String::from_utf8_lossy(&port_line).into_owned())
        })?;

    let peer_id = read_identity(&mut frame, VERB_ID).await?;
    directory
        .register(peer_id.clone(), PeerAddr { ip: peer_ip, port })
        .await;
    *registered = Some(peer_id.clone());
    let total = directory.len().await;
    tracing::info!(
        peer = %peer_id.fingerprint(),
        %peer_ip,
        port,
        total,
        "peer registered"
    );

    // The registration ack is the current peer list.
    send_peer_list(directory, &mut frame, &peer_id).await?;

    // Lookup loop until LEAVE or disconnect.
    loop {
        let Some(line) = frame.read_line().await? else {
            return Ok(());
        };
        let tokens = wire::split_line(&line)?;

        match tokens.first().map(String::as_str) {
            Some(VERB_LEAVE) => {
                tracing::info!(peer = %peer_id.fingerprint(), "peer is leaving the network");
                return Ok(());
            }
            Some(VERB_LIST) => {
                let asking = read_counted_identity(&mut frame, &tokens).await?;
                send_peer_list(directory, &mut frame, &asking).await?;
            }
            Some(VERB_GET_PEER) => {
                let wanted = read_counted_identity(&mut frame, &tokens).await?;
                let port = directory.port_of(&wanted).await;
                let answer = match port {
                    Some(port) => port.to_string(),
                    None => "-1".to_string(),
                };
                let response = format!("{RESP_PEER_PORT}\n{answer}\n");
                frame.get_mut().write_all(response.as_bytes()).await?;
            }
            _ => {
                tracing::warn!(line = %String::from_utf8_lossy(&line), "unrecognized request type");
            }
        }
    }
}

/// Reads a `<verb> <len>\n<peer_id>` pair where the header has already
/// been consumed and tokenized.
async fn read_counted_identity<S>(
    frame: &mut FrameReader<S>,
    tokens: &[String],
) -> Result<PeerId, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let len = wire::counted_len(tokens)?;
    let bytes = frame.read_exact(len).await?.ok_or(WireError::UnexpectedEof)?;
    PeerId::from_wire_bytes(bytes)
        .ok_or_else(|| WireError::BadPayload("peer id is not valid UTF-8".to_string()))
}

/// Reads a full `<verb> <len>\n<peer_id>` exchange, checking the verb.
async fn read_identity<S>(frame: &mut FrameReader<S>, verb: &str) -> Result<PeerId, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = frame.read_line().await?.ok_or(WireError::UnexpectedEof)?;
    let tokens = wire::split_line(&line)?;
    if tokens.first().map(String::as_str) != Some(verb) {
        return Err(WireError::MalformedHeader(tokens.join(" ")));
    }
    read_counted_identity(frame, &tokens).await
}

async fn send_peer_list<S>(
    directory: &Directory,
    frame: &mut FrameReader<S>,
    exclude: &PeerId,
) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peers = directory.list_excluding(exclude).await;
    let response = format!("{RESP_PEERS}\n{}\n", wire::format_peer_list(&peers));
    frame.get_mut().write_all(response.as_bytes()).await?;
    frame.get_mut().flush().await?;
    Ok(())
}

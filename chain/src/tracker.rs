//! Client side of the tracker session.
//!
//! A peer keeps exactly one connection to the tracker for its whole
//! lifetime. Every exchange on it is strict request/response, and the
//! node serializes access behind a mutex, so this type can assume it owns
//! the stream for the duration of each call.

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::net::framed::FrameReader;
use crate::net::wire::{
    self, PeerAddr, RESP_PEER_PORT, RESP_PEERS, VERB_GET_PEER, VERB_ID, VERB_JOIN, VERB_LEAVE,
    VERB_LIST, WireError,
};
use crate::types::PeerId;

/// One registered session against the tracker.
pub struct TrackerClient {
    frame: FrameReader<TcpStream>,
}

impl TrackerClient {
    /// Connects to the tracker. Failure here is fatal for startup.
    pub async fn connect(host: &str, port: u16) -> Result<Self, WireError> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self {
            frame: FrameReader::new(stream),
        })
    }

    /// Registers this peer: `JOIN` with our listening port, then `ID`
    /// with our public key. The tracker answers with the current peer
    /// list (excluding us), which doubles as the registration ack.
    pub async fn join(
        &mut self,
        listening_port: u16,
        peer_id: &PeerId,
    ) -> Result<Vec<PeerAddr>, WireError> {
        let join = format!("{VERB_JOIN}\n{listening_port}\n");
        self.frame.get_mut().write_all(join.as_bytes()).await?;
        self.send_identity(VERB_ID, peer_id).await?;
        self.read_peer_list().await
    }

    /// Asks for the active peer list, excluding `peer_id`.
    pub async fn list(&mut self, peer_id: &PeerId) -> Result<Vec<PeerAddr>, WireError> {
        self.send_identity(VERB_LIST, peer_id).await?;
        self.read_peer_list().await
    }

    /// Resolves a peer identity to its listening port. `None` means the
    /// tracker does not know that peer (it answered `-1`).
    pub async fn peer_port(&mut self, peer_id: &PeerId) -> Result<Option<u16>, WireError> {
        self.send_identity(VERB_GET_PEER, peer_id).await?;

        let header = self.expect_line().await?;
        let tokens = wire::split_line(&header)?;
        if tokens.first().map(String::as_str) != Some(RESP_PEER_PORT) {
            return Err(WireError::MalformedHeader(tokens.join(" ")));
        }

        let answer = self.expect_line().await?;
        let answer = String::from_utf8(answer)
            .map_err(|_| WireError::BadPayload("non-utf8 port".to_string()))?;
        let answer = answer.trim();

        if answer == "-1" {
            return Ok(None);
        }
        answer
            .parse::<u16>()
            .map(Some)
            .map_err(|_| WireError::BadPayload(format!("bad port: {answer:?}")))
    }

    /// Announces departure. Errors are irrelevant at this point; the
    /// tracker also deregisters us on disconnect.
    pub async fn leave(&mut self) -> Result<(), WireError> {
        let leave = format!("{VERB_LEAVE}\n");
        self.frame.get_mut().write_all(leave.as_bytes()).await?;
        Ok(())
    }

    /// Sends a `<verb> <len>\n<peer_id_bytes>` counted header.
    async fn send_identity(&mut self, verb: &str, peer_id: &PeerId) -> Result<(), WireError> {
        let key = peer_id.as_bytes();
        let header = format!("{verb} {}\n", key.len());
        let stream = self.frame.get_mut();
        stream.write_all(header.as_bytes()).await?;
        stream.write_all(key).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Reads a `PEERS\n<list>\n` response.
    async fn read_peer_list(&mut self) -> Result<Vec<PeerAddr>, WireError> {
        let header = self.expect_line().await?;
        let tokens = wire::split_line(&header)?;
        if tokens.first().map(String::as_str) != Some(RESP_PEERS) {
            return Err(WireError::MalformedHeader(tokens.join(" ")));
        }

        let list = self.expect_line().await?;
        let list = String::from_utf8(list)
            .map_err(|_| WireError::BadPayload("non-utf8 peer list".to_string()))?;
        wire::parse_peer_list(&list)
    }

    async fn expect_line(&mut self) -> Result<Vec<u8>, WireError> {
        self.frame
            .read_line()
            .await?
            .ok_or(WireError::UnexpectedEof)
    }
}

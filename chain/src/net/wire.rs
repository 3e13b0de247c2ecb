// chain/src/net/wire.rs

//! Wire protocol: verbs, frames, and the peer-list codec.
//!
//! Peer-to-peer traffic is `BLOCK <len> <tag>\n<block_json>` frames and
//! `GET-CHAIN\n` requests; tracker traffic is the `JOIN`/`ID`/`LIST`/
//! `GET-PEER`/`LEAVE` session verbs with `PEERS` and `PEER-PORT`
//! responses. Protocol violations map onto [`WireError`] and cost the
//! offender its connection, never chain state.

use std::fmt;
use std::net::IpAddr;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::types::Block;

use super::framed::FrameReader;

pub const VERB_BLOCK: &str = "BLOCK";
pub const VERB_GET_CHAIN: &str = "GET-CHAIN";
pub const VERB_JOIN: &str = "JOIN";
pub const VERB_ID: &str = "ID";
pub const VERB_LIST: &str = "LIST";
pub const VERB_GET_PEER: &str = "GET-PEER";
pub const VERB_LEAVE: &str = "LEAVE";
pub const RESP_PEERS: &str = "PEERS";
pub const RESP_PEER_PORT: &str = "PEER-PORT";

/// Upper bound on a counted payload. Generous; a block is a few KB.
pub const MAX_PAYLOAD_LEN: usize = 4 * 1024 * 1024;

/// Numeric tag carried in a `BLOCK` header, distinguishing a freshly
/// mined broadcast from a block streamed during a chain transfer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameTag {
    /// A newly mined block being broadcast.
    Block = 2,
    /// One block of a `GET-CHAIN` response.
    ChainTransfer = 4,
}

impl FrameTag {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            2 => Some(FrameTag::Block),
            4 => Some(FrameTag::ChainTransfer),
            _ => None,
        }
    }
}

/// Protocol-level failure on one connection.
#[derive(Debug)]
pub enum WireError {
    /// Underlying socket error.
    Io(std::io::Error),
    /// The peer closed the connection mid-message.
    UnexpectedEof,
    /// Header line did not match the expected shape.
    MalformedHeader(String),
    /// Verb is not part of the protocol.
    UnknownVerb(String),
    /// Counted payload length exceeds [`MAX_PAYLOAD_LEN`].
    PayloadTooLarge(usize),
    /// Payload bytes did not decode (bad UTF-8 or JSON).
    BadPayload(String),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Io(e) => write!(f, "socket error: {e}"),
            WireError::UnexpectedEof => write!(f, "connection closed mid-message"),
            WireError::MalformedHeader(line) => write!(f, "malformed header: {line:?}"),
            WireError::UnknownVerb(verb) => write!(f, "unknown verb: {verb:?}"),
            WireError::PayloadTooLarge(len) => write!(f, "payload of {len} bytes exceeds limit"),
            WireError::BadPayload(msg) => write!(f, "undecodable payload: {msg}"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<std::io::Error> for WireError {
    fn from(e: std::io::Error) -> Self {
        WireError::Io(e)
    }
}

/// One request read off an inbound peer connection.
#[derive(Debug)]
pub enum PeerRequest {
    /// `BLOCK <len> <tag>` plus payload.
    Block { tag: FrameTag, block: Block },
    /// `GET-CHAIN`.
    GetChain,
}

/// Decodes a header line as ASCII tokens.
pub fn split_line(line: &[u8]) -> Result<Vec<String>, WireError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| WireError::MalformedHeader(String::from_utf8_lossy(line).into_owned()))?;
    Ok(text.split_whitespace().map(str::to_string).collect())
}

/// Parses the decimal payload length out of a `<VERB> <len>` header.
pub fn counted_len(tokens: &[String]) -> Result<usize, WireError> {
    let len = tokens
        .get(1)
        .and_then(|t| t.parse::<usize>().ok())
        .ok_or_else(|| WireError::MalformedHeader(tokens.join(" ")))?;
    if len > MAX_PAYLOAD_LEN {
        return Err(WireError::PayloadTooLarge(len));
    }
    Ok(len)
}

/// Reads the single request carried by an inbound peer connection.
///
/// `Ok(None)` means the peer closed before sending anything.
pub async fn read_peer_request<S>(
    reader: &mut FrameReader<S>,
) -> Result<Option<PeerRequest>, WireError>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let Some(line) = reader.read_line().await? else {
        return Ok(None);
    };
    let tokens = split_line(&line)?;

    match tokens.first().map(String::as_str) {
        Some(VERB_BLOCK) => {
            if tokens.len() != 3 {
                return Err(WireError::MalformedHeader(tokens.join(" ")));
            }
            let len = counted_len(&tokens)?;
            let tag = tokens[2]
                .parse::<u32>()
                .ok()
                .and_then(FrameTag::from_u32)
                .ok_or_else(|| WireError::MalformedHeader(tokens.join(" ")))?;

            let body = reader
                .read_exact(len)
                .await?
                .ok_or(WireError::UnexpectedEof)?;
            let block =
                Block::from_bytes(&body).map_err(|e| WireError::BadPayload(e.to_string()))?;

            Ok(Some(PeerRequest::Block { tag, block }))
        }
        Some(VERB_GET_CHAIN) => Ok(Some(PeerRequest::GetChain)),
        Some(other) => Err(WireError::UnknownVerb(other.to_string())),
        None => Err(WireError::MalformedHeader(String::new())),
    }
}

/// Writes one `BLOCK` frame.
pub async fn write_block<W>(writer: &mut W, block: &Block, tag: FrameTag) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = block.to_bytes();
    let header = format!("{VERB_BLOCK} {} {}\n", body.len(), tag as u32);
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Writes a `GET-CHAIN` request.
pub async fn write_get_chain<W>(writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(format!("{VERB_GET_CHAIN}\n").as_bytes()).await?;
    writer.flush().await
}

/// Network address of a peer's listening socket, as exchanged in `PEERS`
/// responses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PeerAddr {
    pub ip: IpAddr,
    pub port: u16,
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Parses the `PEERS` list line: space-separated `ip,port` pairs, empty
/// line for an empty list.
pub fn parse_peer_list(line: &str) -> Result<Vec<PeerAddr>, WireError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    trimmed
        .split(' ')
        .map(|entry| {
            let (ip, port) = entry
                .split_once(',')
                .ok_or_else(|| WireError::MalformedHeader(entry.to_string()))?;
            let ip: IpAddr = ip
                .parse()
                .map_err(|_| WireError::MalformedHeader(entry.to_string()))?;
            let port: u16 = port
                .parse()
                .map_err(|_| WireError::MalformedHeader(entry.to_string()))?;
            Ok(PeerAddr { ip, port })
        })
        .collect()
}

/// Formats a `PEERS` list line (without the trailing newline).
pub fn format_peer_list<'a, I>(peers: I) -> String
where
    I: IntoIterator<Item = &'a PeerAddr>,
{
    peers
        .into_iter()
        .map(|peer| format!("{},{}", peer.ip, peer.port))
        .collect::<Vec<_>>()
        .join(" ")
}

//! Buffered frame reading over a stream socket.
//!
//! Wire messages are newline-delimited headers optionally followed by
//! counted byte payloads, and TCP does not respect either boundary: one
//! segment can end mid-header or carry the start of the next message.
//! `FrameReader` keeps whatever a read pulled in past the requested
//! boundary and serves it to the next call first.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Read chunk size. One chunk comfortably fits every header; block
/// payloads just take a few more reads.
const READ_CHUNK: usize = 4096;

/// A buffered reader with the two primitives the protocol needs:
/// bytes-up-to-newline and exactly-n-bytes.
///
/// Not safe for concurrent use on a single connection; each connection
/// gets its own reader.
pub struct FrameReader<S> {
    stream: S,
    residual: Vec<u8>,
}

impl<S> FrameReader<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            residual: Vec::new(),
        }
    }

    /// Access to the underlying stream, e.g. to write a response on a
    /// full-duplex connection.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Consumes the reader, returning the stream.
    ///
    /// Any buffered residual bytes are dropped; callers switch to raw
    /// stream I/O only when the peer is done sending framed input (one
    /// request per connection).
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> FrameReader<S> {
    /// Returns the bytes up to, but excluding, the next `\n`, drawing
    /// from the residual buffer before touching the socket.
    ///
    /// Returns `Ok(None)` if the peer closed the connection before a
    /// newline arrived.
    pub async fn read_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(idx) = self.residual.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.residual.drain(..=idx).collect();
                line.pop();
                return Ok(Some(line));
            }

            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    /// Returns exactly `n` bytes, buffering any over-read for the next
    /// call. `Ok(None)` means the peer closed before `n` bytes arrived.
    pub async fn read_exact(&mut self, n: usize) -> std::io::Result<Option<Vec<u8>>> {
        while self.residual.len() < n {
            if !self.fill().await? {
                return Ok(None);
            }
        }
        Ok(Some(self.residual.drain(..n).collect()))
    }

    /// Pulls one chunk off the socket into the residual buffer. `false`
    /// means EOF.
    async fn fill(&mut self) -> std::io::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        let read = self.stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(false);
        }
        self.residual.extend_from_slice(&chunk[..read]);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn read_line_strips_newline() {
        let mut reader = FrameReader::new(Cursor::new(b"PEERS\nrest".to_vec()));
        let line = reader.read_line().await.unwrap().unwrap();
        assert_eq!(line, b"PEERS");
    }

    #[tokio::test]
    async fn residual_survives_across_calls() {
        // Two headers and a payload delivered as one blob; the reader
        // must hand them out piecewise.
        let blob = b"JOIN\n9000\nID 3\nabcLIST 1\n".to_vec();
        let mut reader = FrameReader::new(Cursor::new(blob));

        assert_eq!(reader.read_line().await.unwrap().unwrap(), b"JOIN");
        assert_eq!(reader.read_line().await.unwrap().unwrap(), b"9000");
        assert_eq!(reader.read_line().await.unwrap().unwrap(), b"ID 3");
        assert_eq!(reader.read_exact(3).await.unwrap().unwrap(), b"abc");
        assert_eq!(reader.read_line().await.unwrap().unwrap(), b"LIST 1");
    }

    #[tokio::test]
    async fn read_exact_spans_payload_boundaries() {
        let mut reader = FrameReader::new(Cursor::new(b"abcdef".to_vec()));
        assert_eq!(reader.read_exact(2).await.unwrap().unwrap(), b"ab");
        assert_eq!(reader.read_exact(4).await.unwrap().unwrap(), b"cdef");
    }

    #[tokio::test]
    async fn eof_mid_frame_returns_none() {
        let mut reader = FrameReader::new(Cursor::new(b"no newline here".to_vec()));
        assert!(reader.read_line().await.unwrap().is_none());

        let mut reader = FrameReader::new(Cursor::new(b"abc".to_vec()));
        assert!(reader.read_exact(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_line_is_distinct_from_eof() {
        let mut reader = FrameReader::new(Cursor::new(b"\n".to_vec()));
        let line = reader.read_line().await.unwrap().unwrap();
        assert!(line.is_empty());
        assert!(reader.read_line().await.unwrap().is_none());
    }
}

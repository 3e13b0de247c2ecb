//! Framed socket I/O and the wire protocol.
//!
//! Everything on the wire is an ASCII verb line followed, where the verb
//! says so, by a counted byte payload. [`framed::FrameReader`] provides
//! the two read primitives (line-delimited and exactly-n) over a residual
//! buffer; [`wire`] defines the verbs, frames, and peer-list codec on top
//! of it.

pub mod framed;
pub mod wire;

pub use framed::FrameReader;
pub use wire::{FrameTag, PeerAddr, PeerRequest, WireError};

//! Core domain types used by the chain.
//!
//! This module defines the peer identity newtype, the canonical-encoding
//! helpers shared by hashing and signing, and re-exports the transaction
//! and block types. The goal is to avoid "naked" strings and byte buffers
//! in public APIs and instead use domain-specific newtypes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod block;
pub mod identity;
pub mod tx;

pub use block::{Block, BlockHash};
pub use identity::Identity;
pub use tx::{PollAction, Signature, Transaction, TxData};

/// Length in hex characters of a SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// `prev_hash` value used by a locally mined genesis block.
///
/// Chain admission accepts any `prev_hash` at position zero, so this is a
/// convention rather than a rule, but every chain this node mines from
/// scratch starts here.
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Stable network identifier of a peer.
///
/// A `PeerId` is the PEM (`SubjectPublicKeyInfo`) encoding of the peer's
/// RSA public key. It travels inside every transaction as the `sender`
/// field, keys the tracker's directory table, and is what signatures are
/// verified against. Lifetime = process lifetime; keys are not persisted.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wraps an already PEM-encoded public key.
    pub fn from_pem(pem: String) -> Self {
        PeerId(pem)
    }

    /// Rebuilds a `PeerId` from raw bytes received off the wire.
    ///
    /// Returns `None` if the bytes are not valid UTF-8. No further
    /// validation happens here; a garbage key simply fails signature
    /// verification later.
    pub fn from_wire_bytes(bytes: Vec<u8>) -> Option<Self> {
        String::from_utf8(bytes).ok().map(PeerId)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Byte representation sent in `ID` / `LIST` / `GET-PEER` payloads.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Short hex fingerprint for log lines.
    ///
    /// The full PEM key is several hundred bytes; logs only need enough
    /// of it to tell peers apart.
    pub fn fingerprint(&self) -> String {
        let digest = sha256_hex(self.0.as_bytes());
        digest[..12].to_string()
    }
}

/// Lowercase hex SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Returns the current wall-clock time as fractional seconds since the
/// Unix epoch.
///
/// On error (system clock before epoch) this falls back to 0.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs_f64()
}

/// Canonical byte encoding of a serializable value.
///
/// The value is first projected into a [`serde_json::Value`], whose object
/// map is backed by a `BTreeMap`, so keys come out lexicographically
/// sorted regardless of struct field order. The resulting JSON bytes are
/// the input to both content hashing and signing; independent
/// implementations can reproduce them bit-exactly.
///
/// # Panics
///
/// Panics if the value cannot be represented as JSON. This is considered
/// a programming error, because all chain types are plain data.
pub(crate) fn canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    let value =
        serde_json::to_value(value).expect("chain types should always be JSON-serializable");
    serde_json::to_vec(&value).expect("JSON value encoding cannot fail")
}

/// Like [`canonical_bytes`] but with one top-level key removed before
/// encoding. Used to produce a block's hashable bytes (minus `hash`) and
/// a transaction's signable bytes (minus `signature`).
pub(crate) fn canonical_bytes_without<T: Serialize>(value: &T, skip_key: &str) -> Vec<u8> {
    let mut value =
        serde_json::to_value(value).expect("chain types should always be JSON-serializable");
    if let Some(map) = value.as_object_mut() {
        map.remove(skip_key);
    }
    serde_json::to_vec(&value).expect("JSON value encoding cannot fail")
}

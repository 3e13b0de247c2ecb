// chain/src/types/tx.rs

//! Transaction types for the chain.
//!
//! A [`Transaction`] carries one application payload (a poll creation or
//! a vote), the sender's identity, a creation timestamp, and a PSS
//! signature over the canonical encoding of everything except the
//! signature itself. Payloads are a tagged sum type with an opaque
//! catch-all so that unknown payload shapes survive a round-trip through
//! this node unmodified.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::identity::{Identity, verify_bytes};
use super::{PeerId, canonical_bytes, canonical_bytes_without};

/// Detached PSS-SHA256 signature bytes.
///
/// Encoded as a lowercase hex string on the wire and inside canonical
/// block bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Signature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(&self.0);
        let shown = hex.get(..16).unwrap_or(&hex);
        write!(f, "Signature({shown}..)")
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex_str = String::deserialize(deserializer)?;
        let bytes = hex::decode(&hex_str)
            .map_err(|e| D::Error::custom(format!("invalid signature hex: {e}")))?;
        Ok(Signature(bytes))
    }
}

/// The two poll operations the application records on-chain.
///
/// Serialized with an internal `transaction_type` tag, so the JSON shape
/// is flat: `{"transaction_type":"create_poll","poll_id":...,...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transaction_type", rename_all = "snake_case")]
pub enum PollAction {
    /// Opens a new poll. `poll_id` is a UUID-v4 string minted by the
    /// creating peer; `poll_name` must be unique across the chain.
    CreatePoll {
        poll_id: String,
        poll_name: String,
        options: Vec<String>,
    },
    /// Casts a vote for `vote` (an option string) in poll `poll_id`.
    Vote { poll_id: String, vote: String },
}

/// Transaction payload: a known poll action, or an opaque JSON record.
///
/// The opaque variant exists for forward compatibility: a block mined by
/// a newer peer with a payload shape this node does not know still
/// hashes, verifies, and replicates correctly; only the poll queries
/// ignore it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TxData {
    Poll(PollAction),
    Opaque(serde_json::Value),
}

impl TxData {
    pub fn create_poll(poll_id: String, poll_name: String, options: Vec<String>) -> Self {
        TxData::Poll(PollAction::CreatePoll {
            poll_id,
            poll_name,
            options,
        })
    }

    pub fn vote(poll_id: String, vote: String) -> Self {
        TxData::Poll(PollAction::Vote { poll_id, vote })
    }

    /// The recognized poll action, if this payload is one.
    pub fn action(&self) -> Option<&PollAction> {
        match self {
            TxData::Poll(action) => Some(action),
            TxData::Opaque(_) => None,
        }
    }

    /// Poll name if this payload creates a poll.
    pub fn created_poll_name(&self) -> Option<&str> {
        match self.action() {
            Some(PollAction::CreatePoll { poll_name, .. }) => Some(poll_name),
            _ => None,
        }
    }

    /// Poll id if this payload is a vote.
    pub fn voted_poll_id(&self) -> Option<&str> {
        match self.action() {
            Some(PollAction::Vote { poll_id, .. }) => Some(poll_id),
            _ => None,
        }
    }
}

/// One application transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// PEM public key of the peer that created (and signs) this
    /// transaction.
    pub sender: PeerId,
    /// Creation time, fractional seconds since the Unix epoch. Re-stamped
    /// when a transaction is re-mined after a fork.
    pub timestamp: f64,
    /// Application payload.
    pub data: TxData,
    /// PSS-SHA256 signature over the signable bytes, absent until signed.
    pub signature: Option<Signature>,
}

impl Transaction {
    /// Creates an unsigned transaction.
    pub fn new(sender: PeerId, timestamp: f64, data: TxData) -> Self {
        Self {
            sender,
            timestamp,
            data,
            signature: None,
        }
    }

    /// Canonical bytes covered by the signature: the key-sorted JSON of
    /// this transaction without its `signature` field.
    pub fn signable_bytes(&self) -> Vec<u8> {
        canonical_bytes_without(self, "signature")
    }

    /// Signs (or re-signs) this transaction with `identity`.
    ///
    /// The caller is responsible for `identity` matching `sender`;
    /// a mismatch just produces a transaction that fails [`verify`].
    ///
    /// [`verify`]: Transaction::verify
    pub fn sign(&mut self, identity: &Identity) {
        let bytes = self.signable_bytes();
        self.signature = Some(Signature::from_bytes(identity.sign_bytes(&bytes)));
    }

    /// Checks the signature against the public key in `sender`.
    ///
    /// Missing signature, malformed sender key, and digest mismatch all
    /// return `false`; nothing propagates.
    pub fn verify(&self) -> bool {
        let Some(signature) = &self.signature else {
            return false;
        };
        verify_bytes(&self.sender, &self.signable_bytes(), signature.as_bytes())
    }

    /// Canonical wire bytes, signature included.
    pub fn to_bytes(&self) -> Vec<u8> {
        canonical_bytes(self)
    }

    /// Parses a transaction from canonical wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    // RSA keygen is expensive; share one identity across this module's
    // tests.
    fn test_identity() -> &'static Identity {
        static IDENTITY: OnceLock<Identity> = OnceLock::new();
        IDENTITY.get_or_init(|| Identity::generate().expect("keygen"))
    }

    fn sample_create() -> TxData {
        TxData::create_poll(
            "8c5f2a90-0000-4000-8000-000000000001".to_string(),
            "lunch".to_string(),
            vec!["pizza".to_string(), "sushi".to_string()],
        )
    }

    #[test]
    fn payload_serializes_with_flat_tag() {
        let data = sample_create();
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["transaction_type"], "create_poll");
        assert_eq!(value["poll_name"], "lunch");

        let vote = TxData::vote("some-id".to_string(), "pizza".to_string());
        let value = serde_json::to_value(&vote).unwrap();
        assert_eq!(value["transaction_type"], "vote");
        assert_eq!(value["vote"], "pizza");
    }

    #[test]
    fn unknown_payload_shape_falls_back_to_opaque() {
        let raw = r#"{"transaction_type":"delegate","to":"someone"}"#;
        let data: TxData = serde_json::from_str(raw).unwrap();
        assert!(matches!(data, TxData::Opaque(_)));
        assert!(data.action().is_none());

        // And it round-trips unmodified.
        let back = serde_json::to_string(&serde_json::to_value(&data).unwrap()).unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&back).unwrap();
        assert_eq!(reparsed["transaction_type"], "delegate");
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let identity = test_identity();
        let mut tx = Transaction::new(identity.peer_id().clone(), 1_700_000_000.5, sample_create());
        assert!(!tx.verify());

        tx.sign(identity);
        assert!(tx.verify());
    }

    #[test]
    fn tampering_any_field_breaks_verification() {
        let identity = test_identity();
        let mut tx = Transaction::new(identity.peer_id().clone(), 1_700_000_000.0, sample_create());
        tx.sign(identity);

        let mut bumped = tx.clone();
        bumped.timestamp += 1.0;
        assert!(!bumped.verify());

        let mut swapped = tx.clone();
        swapped.data = TxData::vote("x".to_string(), "y".to_string());
        assert!(!swapped.verify());

        let mut other_sender = tx.clone();
        other_sender.sender = PeerId::from_pem("-----BEGIN PUBLIC KEY-----\n-----END PUBLIC KEY-----\n".to_string());
        assert!(!other_sender.verify());
    }

    #[test]
    fn resigning_after_restamp_verifies_again() {
        let identity = test_identity();
        let mut tx = Transaction::new(identity.peer_id().clone(), 1_700_000_000.0, sample_create());
        tx.sign(identity);

        tx.timestamp = 1_700_000_123.25;
        assert!(!tx.verify());
        tx.sign(identity);
        assert!(tx.verify());
    }

    #[test]
    fn wire_roundtrip_preserves_transaction() {
        let identity = test_identity();
        let mut tx = Transaction::new(identity.peer_id().clone(), 1_700_000_000.75, sample_create());

        // Unsigned.
        let back = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(tx, back);

        // Signed.
        tx.sign(identity);
        let back = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(tx, back);
        assert!(back.verify());
    }

    #[test]
    fn signable_bytes_exclude_signature() {
        let identity = test_identity();
        let mut tx = Transaction::new(identity.peer_id().clone(), 1_700_000_000.0, sample_create());
        let before = tx.signable_bytes();
        tx.sign(identity);
        assert_eq!(before, tx.signable_bytes());
    }
}

//! Peer keypair and signature primitives.
//!
//! Every peer generates a fresh RSA-2048 keypair at startup. The public
//! half, serialized as PEM `SubjectPublicKeyInfo`, becomes the peer's
//! [`PeerId`]; the private half signs transactions with PSS-SHA256
//! (PKCS#1 v2.1). Nothing is written to disk.

use std::fmt;

use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::pss::{Signature as PssSignature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use super::PeerId;

/// RSA modulus size used for peer keypairs.
const KEY_BITS: usize = 2048;

/// Error produced while generating or encoding a keypair.
///
/// These only occur at startup; signing and verification never error
/// (verification failures are `false`, per the transaction contract).
#[derive(Debug)]
pub enum IdentityError {
    /// RSA key generation failed.
    KeyGen(String),
    /// Public key could not be serialized as PEM SPKI.
    Encoding(String),
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityError::KeyGen(msg) => write!(f, "key generation failed: {msg}"),
            IdentityError::Encoding(msg) => write!(f, "public key encoding failed: {msg}"),
        }
    }
}

impl std::error::Error for IdentityError {}

/// A peer's signing identity: private key plus the derived [`PeerId`].
pub struct Identity {
    signing_key: SigningKey<Sha256>,
    peer_id: PeerId,
}

impl Identity {
    /// Generates a fresh RSA-2048 identity.
    ///
    /// This is slow (a second or two on commodity hardware); call it once
    /// at process startup.
    pub fn generate() -> Result<Self, IdentityError> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS)
            .map_err(|e| IdentityError::KeyGen(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        let pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| IdentityError::Encoding(e.to_string()))?;

        Ok(Self {
            signing_key: SigningKey::new(private_key),
            peer_id: PeerId::from_pem(pem),
        })
    }

    /// The PEM-encoded public key identifying this peer on the network.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Produces a PSS-SHA256 signature over `message`.
    ///
    /// PSS salts are randomized, so two signatures over the same bytes
    /// differ; both verify.
    pub fn sign_bytes(&self, message: &[u8]) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        self.signing_key.sign_with_rng(&mut rng, message).to_vec()
    }
}

/// Verifies `signature` over `message` against the public key carried in
/// `peer_id`.
///
/// Any failure (unparseable PEM, malformed signature bytes, digest
/// mismatch) yields `false`; this function never errors.
pub fn verify_bytes(peer_id: &PeerId, message: &[u8], signature: &[u8]) -> bool {
    let Ok(public_key) = RsaPublicKey::from_public_key_pem(peer_id.as_str()) else {
        return false;
    };
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let Ok(signature) = PssSignature::try_from(signature) else {
        return false;
    };
    verifying_key.verify(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identity_signs_and_verifies() {
        let identity = Identity::generate().expect("keygen");
        let message = b"canonical transaction bytes";

        let signature = identity.sign_bytes(message);
        assert!(verify_bytes(identity.peer_id(), message, &signature));
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let identity = Identity::generate().expect("keygen");
        let signature = identity.sign_bytes(b"original");
        assert!(!verify_bytes(identity.peer_id(), b"tampered", &signature));
    }

    #[test]
    fn verify_rejects_garbage_key_and_signature() {
        let identity = Identity::generate().expect("keygen");
        let bogus_id = PeerId::from_pem("not a pem key".to_string());

        assert!(!verify_bytes(&bogus_id, b"msg", b"sig"));
        assert!(!verify_bytes(identity.peer_id(), b"msg", b"definitely not a signature"));
    }

    #[test]
    fn peer_id_is_pem_spki() {
        let identity = Identity::generate().expect("keygen");
        let pem = identity.peer_id().as_str();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert!(pem.trim_end().ends_with("-----END PUBLIC KEY-----"));
    }
}

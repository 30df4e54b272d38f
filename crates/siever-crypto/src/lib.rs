//! Key custody for the siever node.
//!
//! All signing happens in-memory against a key loaded once at startup (§4.1
//! of the spec): [`Signer`] is the capability every other component depends
//! on, never a concrete key backend, so the hot path never re-touches disk
//! or a KMS.

use ed25519_consensus::{Signature, SigningKey, VerificationKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key file could not be read: {0}")]
    Io(String),
    #[error("key material is malformed: {0}")]
    Malformed(String),
}

/// Signs and verifies bytes or pre-computed digests under a loaded key, and
/// exposes the peer's own identity certificate.
///
/// Implementations MUST fail only at construction time (`KeyError`); once a
/// `Signer` exists, signing and verification are infallible with respect to
/// key availability.
pub trait Signer: Send + Sync {
    fn sign(&self, data: &[u8]) -> Vec<u8>;
    fn sign_hash(&self, digest: &[u8; 32]) -> Vec<u8>;
    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> bool;
    fn verify_hash(&self, public_key: &[u8], digest: &[u8; 32], signature: &[u8]) -> bool;
    fn public_key(&self) -> Vec<u8>;
    fn own_cert(&self) -> Vec<u8>;
}

fn verify_with(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(vk_bytes) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };

    let Ok(vk) = VerificationKey::try_from(vk_bytes) else {
        return false;
    };
    let sig = Signature::from(sig_bytes);

    vk.verify(&sig, message).is_ok()
}

/// A signer backed by an Ed25519 key loaded from a local key file.
///
/// The file is expected to hold the raw 32-byte seed; production deployments
/// typically protect it with filesystem permissions or an encrypting wrapper
/// upstream of this loader (out of scope here, see §2).
pub struct FileKeySigner {
    signing_key: SigningKey,
    cert: Vec<u8>,
}

impl FileKeySigner {
    pub fn load(path: &std::path::Path) -> Result<Self, KeyError> {
        let raw = std::fs::read(path).map_err(|e| KeyError::Io(e.to_string()))?;
        Self::from_seed_bytes(&raw)
    }

    fn from_seed_bytes(raw: &[u8]) -> Result<Self, KeyError> {
        let seed: [u8; 32] = raw
            .get(..32)
            .ok_or_else(|| KeyError::Malformed("key file shorter than 32 bytes".to_string()))?
            .try_into()
            .unwrap();

        let signing_key = SigningKey::from(seed);
        let cert = self_signed_cert(&signing_key);

        Ok(FileKeySigner { signing_key, cert })
    }
}

impl Signer for FileKeySigner {
    fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing_key.sign(data).to_bytes().to_vec()
    }

    fn sign_hash(&self, digest: &[u8; 32]) -> Vec<u8> {
        self.signing_key.sign(digest).to_bytes().to_vec()
    }

    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> bool {
        verify_with(public_key, data, signature)
    }

    fn verify_hash(&self, public_key: &[u8], digest: &[u8; 32], signature: &[u8]) -> bool {
        verify_with(public_key, digest, signature)
    }

    fn public_key(&self) -> Vec<u8> {
        self.signing_key.verification_key().to_bytes().to_vec()
    }

    fn own_cert(&self) -> Vec<u8> {
        self.cert.clone()
    }
}

/// A signer whose key is deterministically derived from a shared seed via
/// the same random table every peer loads from RS's `GetRandomTable`.
///
/// This yields the *same* key across peers given the same seed, which is
/// only ever safe in a controlled test network (§4.1) — never use this
/// backend against a deployment whose peers are meant to hold distinct keys.
pub struct SeedDerivedSigner {
    inner: FileKeySigner,
}

impl SeedDerivedSigner {
    pub fn derive(seed: &[u8], peer_index: u32) -> Result<Self, KeyError> {
        use sha3::{Digest, Sha3_256};

        let mut hasher = Sha3_256::new();
        hasher.update(b"siever-seed-derived-key-v1");
        hasher.update(seed);
        hasher.update(peer_index.to_be_bytes());
        let derived: [u8; 32] = hasher.finalize().into();

        Ok(SeedDerivedSigner {
            inner: FileKeySigner::from_seed_bytes(&derived)?,
        })
    }
}

impl Signer for SeedDerivedSigner {
    fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.inner.sign(data)
    }

    fn sign_hash(&self, digest: &[u8; 32]) -> Vec<u8> {
        self.inner.sign_hash(digest)
    }

    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> bool {
        self.inner.verify(public_key, data, signature)
    }

    fn verify_hash(&self, public_key: &[u8], digest: &[u8; 32], signature: &[u8]) -> bool {
        self.inner.verify_hash(public_key, digest, signature)
    }

    fn public_key(&self) -> Vec<u8> {
        self.inner.public_key()
    }

    fn own_cert(&self) -> Vec<u8> {
        self.inner.own_cert()
    }
}

/// Minimal self-signed certificate stand-in: DER-ish TLV wrapping the raw
/// public key. Real certificate issuance (the CA toolchain behind `<prog>
/// tool`) is out of scope; this exists so `own_cert()` has stable bytes to
/// hand to `Subscribe`/`ConnectPeer`.
fn self_signed_cert(key: &SigningKey) -> Vec<u8> {
    let pk = key.verification_key().to_bytes();
    let mut cert = Vec::with_capacity(2 + pk.len());
    cert.push(0x30); // SEQUENCE tag, for DER texture
    cert.push(pk.len() as u8);
    cert.extend_from_slice(&pk);
    cert
}

/// Recovers the raw Ed25519 public key from a cert produced by
/// [`self_signed_cert`]. `PeerManager` only ever stores the cert bytes
/// (§3, `PeerEntry.cert`); this is how verifiers get back to a key
/// `Signer::verify_hash` can use.
pub fn public_key_from_cert(cert: &[u8]) -> Option<&[u8]> {
    let len = *cert.get(1)? as usize;
    cert.get(2..2 + len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trips() {
        let signer = SeedDerivedSigner::derive(b"test-network-seed", 0).unwrap();
        let msg = b"hello siever";
        let sig = signer.sign(msg);
        assert!(signer.verify(&signer.public_key(), msg, &sig));
    }

    #[test]
    fn tampered_message_fails_verification() {
        let signer = SeedDerivedSigner::derive(b"test-network-seed", 0).unwrap();
        let sig = signer.sign(b"hello");
        assert!(!signer.verify(&signer.public_key(), b"goodbye", &sig));
    }

    #[test]
    fn same_seed_same_index_yields_same_key() {
        let a = SeedDerivedSigner::derive(b"shared", 3).unwrap();
        let b = SeedDerivedSigner::derive(b"shared", 3).unwrap();
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn different_index_yields_different_key() {
        let a = SeedDerivedSigner::derive(b"shared", 0).unwrap();
        let b = SeedDerivedSigner::derive(b"shared", 1).unwrap();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn file_key_signer_rejects_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        std::fs::write(&path, b"too short").unwrap();
        assert!(FileKeySigner::load(&path).is_err());
    }

    #[test]
    fn file_key_signer_loads_and_signs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        std::fs::write(&path, [7u8; 32]).unwrap();

        let signer = FileKeySigner::load(&path).unwrap();
        let sig = signer.sign(b"payload");
        assert!(signer.verify(&signer.public_key(), b"payload", &sig));
        assert!(!signer.own_cert().is_empty());
    }
}

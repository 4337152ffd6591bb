//! Node keypairs: X25519 for decryption, Ed25519 for signatures.
//!
//! Every share, folder and file owns one keypair. The private half never
//! leaves the client unlocked; on the wire it is sealed under the node's
//! session key (or, for the user key, under the password-derived key).

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::session::{open, seal};
use crate::KEY_SIZE;

/// Serialized size of either half of a keypair (encryption ‖ signing)
pub const KEYPAIR_BYTES: usize = 2 * KEY_SIZE;

/// Size of an Ed25519 signature
pub const SIGNATURE_SIZE: usize = 64;

const LOCK_AAD: &[u8] = b"cirrus-node-key-v1";

/// An unlocked node private key.
#[derive(Clone)]
pub struct NodeKeyPair {
    encryption: StaticSecret,
    signing: SigningKey,
}

impl NodeKeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let mut enc = [0u8; KEY_SIZE];
        let mut sig = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut enc);
        rand::thread_rng().fill_bytes(&mut sig);
        let pair = Self::from_parts(enc, sig);
        enc.zeroize();
        sig.zeroize();
        pair
    }

    fn from_parts(enc: [u8; KEY_SIZE], sig: [u8; KEY_SIZE]) -> Self {
        Self {
            encryption: StaticSecret::from(enc),
            signing: SigningKey::from_bytes(&sig),
        }
    }

    pub fn public(&self) -> NodePublicKey {
        NodePublicKey {
            encryption: X25519PublicKey::from(&self.encryption),
            signing: self.signing.verifying_key(),
        }
    }

    /// Detached Ed25519 signature over `msg`.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.signing.sign(msg).to_bytes().to_vec()
    }

    pub(crate) fn decryption_secret(&self) -> &StaticSecret {
        &self.encryption
    }

    /// Seal the private key under a 256-bit key (session or derived key).
    ///
    /// Output: `[24-byte nonce][64-byte key + 16-byte tag]`
    pub fn lock(&self, key: &[u8; KEY_SIZE]) -> anyhow::Result<Vec<u8>> {
        let mut raw = [0u8; KEYPAIR_BYTES];
        raw[..KEY_SIZE].copy_from_slice(&self.encryption.to_bytes());
        raw[KEY_SIZE..].copy_from_slice(&self.signing.to_bytes());
        let sealed = seal(key, &raw, LOCK_AAD);
        raw.zeroize();
        sealed
    }

    /// Unlock a private key produced by [`NodeKeyPair::lock`].
    pub fn unlock(locked: &[u8], key: &[u8; KEY_SIZE]) -> anyhow::Result<Self> {
        let mut raw = open(key, locked, LOCK_AAD)
            .map_err(|_| anyhow::anyhow!("private key unlock failed: wrong key or corrupted data"))?;
        if raw.len() != KEYPAIR_BYTES {
            raw.zeroize();
            anyhow::bail!(
                "unlocked private key has wrong size: {} bytes (expected {})",
                raw.len(),
                KEYPAIR_BYTES
            );
        }

        let mut enc = [0u8; KEY_SIZE];
        let mut sig = [0u8; KEY_SIZE];
        enc.copy_from_slice(&raw[..KEY_SIZE]);
        sig.copy_from_slice(&raw[KEY_SIZE..]);
        raw.zeroize();

        let pair = Self::from_parts(enc, sig);
        enc.zeroize();
        sig.zeroize();
        Ok(pair)
    }
}

impl std::fmt::Debug for NodeKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeyPair")
            .field("public", &self.public().fingerprint())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Public half of a node keypair
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NodePublicKey {
    encryption: X25519PublicKey,
    signing: VerifyingKey,
}

impl NodePublicKey {
    pub(crate) fn encryption_key(&self) -> &X25519PublicKey {
        &self.encryption
    }

    /// `[32-byte X25519 key][32-byte Ed25519 key]`
    pub fn to_bytes(&self) -> [u8; KEYPAIR_BYTES] {
        let mut out = [0u8; KEYPAIR_BYTES];
        out[..KEY_SIZE].copy_from_slice(self.encryption.as_bytes());
        out[KEY_SIZE..].copy_from_slice(self.signing.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        if bytes.len() != KEYPAIR_BYTES {
            anyhow::bail!(
                "invalid public key size, expected {}, got {}",
                KEYPAIR_BYTES,
                bytes.len()
            );
        }
        let mut enc = [0u8; KEY_SIZE];
        let mut sig = [0u8; KEY_SIZE];
        enc.copy_from_slice(&bytes[..KEY_SIZE]);
        sig.copy_from_slice(&bytes[KEY_SIZE..]);
        let signing = VerifyingKey::from_bytes(&sig)
            .map_err(|e| anyhow::anyhow!("invalid signing key: {e}"))?;
        Ok(Self {
            encryption: X25519PublicKey::from(enc),
            signing,
        })
    }

    /// Verify a detached signature produced by [`NodeKeyPair::sign`].
    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> anyhow::Result<()> {
        let signature = Signature::from_slice(signature)
            .map_err(|e| anyhow::anyhow!("malformed signature: {e}"))?;
        self.signing
            .verify(msg, &signature)
            .map_err(|_| anyhow::anyhow!("signature verification failed"))
    }

    /// Short BLAKE3 fingerprint, handy in logs.
    pub fn fingerprint(&self) -> String {
        blake3::hash(&self.to_bytes()).to_hex().as_str()[..16].to_string()
    }
}

impl std::fmt::Debug for NodePublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NodePublicKey")
            .field(&self.fingerprint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::generate_session_key;

    #[test]
    fn test_lock_unlock_roundtrip() {
        let pair = NodeKeyPair::generate();
        let key = generate_session_key();

        let locked = pair.lock(key.as_bytes()).unwrap();
        let unlocked = NodeKeyPair::unlock(&locked, key.as_bytes()).unwrap();

        assert_eq!(pair.public(), unlocked.public());
    }

    #[test]
    fn test_unlock_wrong_key() {
        let pair = NodeKeyPair::generate();
        let locked = pair.lock(generate_session_key().as_bytes()).unwrap();
        assert!(NodeKeyPair::unlock(&locked, generate_session_key().as_bytes()).is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let pair = NodeKeyPair::generate();
        let public = pair.public();
        let sig = pair.sign(b"hello, world!");

        assert!(public.verify(b"hello, world!", &sig).is_ok());
        assert!(public.verify(b"hello, world?", &sig).is_err());
        assert!(NodeKeyPair::generate()
            .public()
            .verify(b"hello, world!", &sig)
            .is_err());
    }

    #[test]
    fn test_public_key_bytes_roundtrip() {
        let public = NodeKeyPair::generate().public();
        let restored = NodePublicKey::from_bytes(&public.to_bytes()).unwrap();
        assert_eq!(public, restored);
        assert!(NodePublicKey::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_malformed_signature_rejected() {
        let pair = NodeKeyPair::generate();
        assert!(pair.public().verify(b"msg", &[0u8; 12]).is_err());
    }
}

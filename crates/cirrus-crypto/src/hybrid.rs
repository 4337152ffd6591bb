//! Hybrid public-key messages: ephemeral X25519 ECDH + XChaCha20-Poly1305.
//!
//! Stands in for OpenPGP messages; callers treat the output as opaque.
//!
//! Wire format:
//! ```text
//! [ ephemeral X25519 public key: 32 bytes ][ nonce: 24 bytes ][ ciphertext + tag ]
//! ```
//! The symmetric key is HKDF-SHA256(shared secret) with the ephemeral and
//! recipient public keys bound into the info string.

use rand::RngCore;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::keypair::{NodeKeyPair, NodePublicKey};
use crate::session::{hkdf_derive, open, seal};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

const HYBRID_INFO: &[u8] = b"cirrus-hybrid-v1";

/// Encrypt `plaintext` so that only the holder of `recipient`'s private key can read it.
pub fn encrypt_to(recipient: &NodePublicKey, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut eph_bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut eph_bytes);
    let ephemeral = StaticSecret::from(eph_bytes);
    eph_bytes.zeroize();

    let ephemeral_public = X25519PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient.encryption_key());
    let mut key = message_key(shared.as_bytes(), &ephemeral_public, recipient.encryption_key())?;

    let sealed = seal(&key, plaintext, ephemeral_public.as_bytes());
    key.zeroize();

    let sealed = sealed?;
    let mut out = Vec::with_capacity(KEY_SIZE + sealed.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt a message produced by [`encrypt_to`].
pub fn decrypt_with(keypair: &NodeKeyPair, message: &[u8]) -> anyhow::Result<Vec<u8>> {
    if message.len() < KEY_SIZE + NONCE_SIZE + TAG_SIZE {
        anyhow::bail!(
            "hybrid message too short: {} bytes (minimum {})",
            message.len(),
            KEY_SIZE + NONCE_SIZE + TAG_SIZE
        );
    }

    let (eph, sealed) = message.split_at(KEY_SIZE);
    let mut eph_bytes = [0u8; KEY_SIZE];
    eph_bytes.copy_from_slice(eph);
    let ephemeral_public = X25519PublicKey::from(eph_bytes);

    let secret = keypair.decryption_secret();
    let shared = secret.diffie_hellman(&ephemeral_public);
    let recipient = X25519PublicKey::from(secret);
    let mut key = message_key(shared.as_bytes(), &ephemeral_public, &recipient)?;

    let plaintext = open(&key, sealed, ephemeral_public.as_bytes());
    key.zeroize();
    plaintext.map_err(|_| anyhow::anyhow!("hybrid decryption failed: not encrypted to this key"))
}

fn message_key(
    shared: &[u8; KEY_SIZE],
    ephemeral: &X25519PublicKey,
    recipient: &X25519PublicKey,
) -> anyhow::Result<[u8; KEY_SIZE]> {
    let mut info = Vec::with_capacity(HYBRID_INFO.len() + 2 * KEY_SIZE);
    info.extend_from_slice(HYBRID_INFO);
    info.extend_from_slice(ephemeral.as_bytes());
    info.extend_from_slice(recipient.as_bytes());
    hkdf_derive(shared, &info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hybrid_roundtrip() {
        let pair = NodeKeyPair::generate();
        let msg = encrypt_to(&pair.public(), b"top secret").unwrap();
        assert_eq!(decrypt_with(&pair, &msg).unwrap(), b"top secret");
    }

    #[test]
    fn test_hybrid_wrong_recipient() {
        let alice = NodeKeyPair::generate();
        let bob = NodeKeyPair::generate();
        let msg = encrypt_to(&alice.public(), b"for alice").unwrap();
        assert!(decrypt_with(&bob, &msg).is_err());
    }

    #[test]
    fn test_hybrid_is_randomized() {
        let pair = NodeKeyPair::generate();
        let a = encrypt_to(&pair.public(), b"same").unwrap();
        let b = encrypt_to(&pair.public(), b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hybrid_tampered() {
        let pair = NodeKeyPair::generate();
        let mut msg = encrypt_to(&pair.public(), b"payload").unwrap();
        let last = msg.len() - 1;
        msg[last] ^= 0xFF;
        assert!(decrypt_with(&pair, &msg).is_err());
    }

    #[test]
    fn test_hybrid_too_short() {
        let pair = NodeKeyPair::generate();
        assert!(decrypt_with(&pair, &[0u8; 40]).is_err());
    }
}

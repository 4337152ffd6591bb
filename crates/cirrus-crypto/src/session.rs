//! Session keys and the symmetric envelope used at every level of the tree

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// A 256-bit symmetric session key. Zeroized on drop.
#[derive(Clone)]
pub struct SessionKey {
    bytes: [u8; KEY_SIZE],
}

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
        if bytes.len() != KEY_SIZE {
            anyhow::bail!(
                "session key has wrong size: {} bytes (expected {})",
                bytes.len(),
                KEY_SIZE
            );
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self::from_bytes(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for SessionKey {}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit session key.
pub fn generate_session_key() -> SessionKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    SessionKey::from_bytes(bytes)
}

/// Encrypt under a 256-bit key with XChaCha20-Poly1305 and a random nonce.
///
/// Output: `[24-byte nonce][ciphertext + 16-byte tag]`
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8]) -> anyhow::Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| anyhow::anyhow!("seal failed: {e}"))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt the output of [`seal`]. Fails on a wrong key, wrong AAD or tampering.
pub fn open(key: &[u8; KEY_SIZE], sealed: &[u8], aad: &[u8]) -> anyhow::Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        anyhow::bail!(
            "sealed data too short: {} bytes (minimum {})",
            sealed.len(),
            NONCE_SIZE + TAG_SIZE
        );
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.into());

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| anyhow::anyhow!("open failed: wrong key or corrupted data"))
}

/// HKDF-SHA256 key derivation with a domain-specific info string.
pub(crate) fn hkdf_derive(ikm: &[u8], info: &[u8]) -> anyhow::Result<[u8; KEY_SIZE]> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(info, &mut okm)
        .map_err(|e| anyhow::anyhow!("HKDF expand failed: {e}"))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_generation() {
        let k1 = generate_session_key();
        let k2 = generate_session_key();
        assert_ne!(k1, k2, "random keys must differ");
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = generate_session_key();
        let sealed = seal(key.as_bytes(), b"payload", b"ctx").unwrap();
        let opened = open(key.as_bytes(), &sealed, b"ctx").unwrap();
        assert_eq!(opened, b"payload");
    }

    #[test]
    fn test_open_wrong_key() {
        let sealed = seal(generate_session_key().as_bytes(), b"payload", b"").unwrap();
        assert!(open(generate_session_key().as_bytes(), &sealed, b"").is_err());
    }

    #[test]
    fn test_open_wrong_aad() {
        let key = generate_session_key();
        let sealed = seal(key.as_bytes(), b"payload", b"a").unwrap();
        assert!(open(key.as_bytes(), &sealed, b"b").is_err());
    }

    #[test]
    fn test_open_truncated() {
        let key = generate_session_key();
        assert!(open(key.as_bytes(), &[0u8; 10], b"").is_err());
    }

    #[test]
    fn test_sealed_size() {
        let key = generate_session_key();
        let sealed = seal(key.as_bytes(), &[0u8; KEY_SIZE], b"").unwrap();
        // nonce (24) + key (32) + tag (16) = 72
        assert_eq!(sealed.len(), NONCE_SIZE + KEY_SIZE + TAG_SIZE);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(SessionKey::from_slice(&[1u8; 16]).is_err());
        assert!(SessionKey::from_slice(&[1u8; KEY_SIZE]).is_ok());
    }

    #[test]
    fn test_debug_redacts() {
        let key = SessionKey::from_bytes([7u8; KEY_SIZE]);
        assert!(format!("{key:?}").contains("REDACTED"));
    }

    #[test]
    fn test_hkdf_domains_differ() {
        let a = hkdf_derive(&[1u8; KEY_SIZE], b"one").unwrap();
        let b = hkdf_derive(&[1u8; KEY_SIZE], b"two").unwrap();
        assert_ne!(a, b);
    }
}

//! File content keys and block encryption
//!
//! Each file revision has one random content key. On the wire the content
//! key is hybrid-encrypted to the file's node key and signed by it, so a
//! swapped key packet is detected before any block is read.
//!
//! Blocks are sealed with AAD = `[u32 BE block index][revision id]`, which
//! stops blocks being reordered or moved between revisions.

use rand::RngCore;
use zeroize::Zeroize;

use crate::hybrid::{decrypt_with, encrypt_to};
use crate::keypair::{NodeKeyPair, NodePublicKey};
use crate::session::{open, seal};
use crate::KEY_SIZE;

/// A per-revision content key. Zeroized on drop.
#[derive(Clone)]
pub struct ContentKey {
    bytes: [u8; KEY_SIZE],
}

impl ContentKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl PartialEq for ContentKey {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for ContentKey {}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

pub fn generate_content_key() -> ContentKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    let key = ContentKey::from_bytes(bytes);
    bytes.zeroize();
    key
}

/// Wrap a content key for the file key and sign the raw key bytes.
///
/// Returns `(packet, signature)`.
pub fn seal_content_key(
    key: &ContentKey,
    file_key: &NodeKeyPair,
) -> anyhow::Result<(Vec<u8>, Vec<u8>)> {
    let packet = encrypt_to(&file_key.public(), key.as_bytes())?;
    let signature = file_key.sign(key.as_bytes());
    Ok((packet, signature))
}

/// Unwrap a content key and check its signature against `signer`.
pub fn open_content_key(
    packet: &[u8],
    signature: &[u8],
    file_key: &NodeKeyPair,
    signer: &NodePublicKey,
) -> anyhow::Result<ContentKey> {
    let mut raw = decrypt_with(file_key, packet)
        .map_err(|_| anyhow::anyhow!("content key unwrap failed"))?;
    if raw.len() != KEY_SIZE {
        let len = raw.len();
        raw.zeroize();
        anyhow::bail!("content key has wrong size: {len} bytes");
    }
    if let Err(e) = signer.verify(&raw, signature) {
        raw.zeroize();
        return Err(anyhow::anyhow!("content key signature invalid: {e}"));
    }
    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&raw);
    raw.zeroize();
    let key = ContentKey::from_bytes(bytes);
    bytes.zeroize();
    Ok(key)
}

fn block_aad(index: u32, revision_id: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(4 + revision_id.len());
    aad.extend_from_slice(&index.to_be_bytes());
    aad.extend_from_slice(revision_id.as_bytes());
    aad
}

pub fn encrypt_block(
    key: &ContentKey,
    index: u32,
    revision_id: &str,
    plaintext: &[u8],
) -> anyhow::Result<Vec<u8>> {
    seal(key.as_bytes(), plaintext, &block_aad(index, revision_id))
}

pub fn decrypt_block(
    key: &ContentKey,
    index: u32,
    revision_id: &str,
    ciphertext: &[u8],
) -> anyhow::Result<Vec<u8>> {
    open(key.as_bytes(), ciphertext, &block_aad(index, revision_id))
        .map_err(|_| anyhow::anyhow!("block {index} decryption failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_roundtrip() {
        let key = generate_content_key();
        let enc = encrypt_block(&key, 0, "rev-1", b"hello").unwrap();
        assert_eq!(decrypt_block(&key, 0, "rev-1", &enc).unwrap(), b"hello");
    }

    #[test]
    fn test_block_wrong_index_or_revision() {
        let key = generate_content_key();
        let enc = encrypt_block(&key, 3, "rev-1", b"data").unwrap();
        assert!(decrypt_block(&key, 4, "rev-1", &enc).is_err());
        assert!(decrypt_block(&key, 3, "rev-2", &enc).is_err());
    }

    #[test]
    fn test_content_key_seal_open() {
        let file_key = NodeKeyPair::generate();
        let key = generate_content_key();
        let (packet, sig) = seal_content_key(&key, &file_key).unwrap();
        let opened = open_content_key(&packet, &sig, &file_key, &file_key.public()).unwrap();
        assert_eq!(opened, key);
    }

    #[test]
    fn test_content_key_bad_signature() {
        let file_key = NodeKeyPair::generate();
        let key = generate_content_key();
        let (packet, _) = seal_content_key(&key, &file_key).unwrap();
        let forged = NodeKeyPair::generate().sign(key.as_bytes());
        assert!(open_content_key(&packet, &forged, &file_key, &file_key.public()).is_err());
    }
}

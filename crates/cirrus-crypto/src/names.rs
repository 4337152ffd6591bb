//! Node name encryption and sibling name hashes
//!
//! File names are sealed with the parent's session key. Share and folder
//! names are hybrid-encrypted to the node's own key. Either way the wire
//! value is base64.
//!
//! The name hash is a keyed BLAKE3 over the lowercased name, keyed from the
//! parent session key. Two siblings with the same name (case-insensitively)
//! share a hash, which is how the remote detects conflicts blind.

use crate::encoding::{b64_decode, b64_encode};
use crate::hybrid::{decrypt_with, encrypt_to};
use crate::keypair::{NodeKeyPair, NodePublicKey};
use crate::session::{hkdf_derive, open, seal, SessionKey};

const NAME_AAD: &[u8] = b"cirrus-name-v1";
const NAME_HASH_INFO: &[u8] = b"cirrus-name-hash-v1";

/// Hex name hash of `name` under the parent folder's session key.
pub fn name_hash(parent: &SessionKey, name: &str) -> anyhow::Result<String> {
    let key = hkdf_derive(parent.as_bytes(), NAME_HASH_INFO)?;
    let hash = blake3::keyed_hash(&key, name.to_lowercase().as_bytes());
    Ok(hash.to_hex().to_string())
}

pub fn encrypt_name_with_session(parent: &SessionKey, name: &str) -> anyhow::Result<String> {
    let sealed = seal(parent.as_bytes(), name.as_bytes(), NAME_AAD)?;
    Ok(b64_encode(&sealed))
}

pub fn decrypt_name_with_session(parent: &SessionKey, encrypted: &str) -> anyhow::Result<String> {
    let sealed = b64_decode(encrypted)?;
    let plain = open(parent.as_bytes(), &sealed, NAME_AAD)
        .map_err(|_| anyhow::anyhow!("name decryption failed: wrong parent key"))?;
    String::from_utf8(plain).map_err(|e| anyhow::anyhow!("decrypted name is not UTF-8: {e}"))
}

pub fn encrypt_name_to(recipient: &NodePublicKey, name: &str) -> anyhow::Result<String> {
    let msg = encrypt_to(recipient, name.as_bytes())?;
    Ok(b64_encode(&msg))
}

pub fn decrypt_name_with(keypair: &NodeKeyPair, encrypted: &str) -> anyhow::Result<String> {
    let msg = b64_decode(encrypted)?;
    let plain = decrypt_with(keypair, &msg)
        .map_err(|_| anyhow::anyhow!("name decryption failed: wrong node key"))?;
    String::from_utf8(plain).map_err(|e| anyhow::anyhow!("decrypted name is not UTF-8: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::generate_session_key;

    #[test]
    fn test_session_name_roundtrip() {
        let parent = generate_session_key();
        let enc = encrypt_name_with_session(&parent, "Quarterly report.pdf").unwrap();
        assert_eq!(
            decrypt_name_with_session(&parent, &enc).unwrap(),
            "Quarterly report.pdf"
        );
        assert!(decrypt_name_with_session(&generate_session_key(), &enc).is_err());
    }

    #[test]
    fn test_keypair_name_roundtrip() {
        let node = NodeKeyPair::generate();
        let enc = encrypt_name_to(&node.public(), "Reports").unwrap();
        assert_eq!(decrypt_name_with(&node, &enc).unwrap(), "Reports");
        assert!(decrypt_name_with(&NodeKeyPair::generate(), &enc).is_err());
    }

    #[test]
    fn test_name_hash_case_insensitive() {
        let parent = generate_session_key();
        assert_eq!(
            name_hash(&parent, "Reports").unwrap(),
            name_hash(&parent, "REPORTS").unwrap()
        );
        assert_ne!(
            name_hash(&parent, "Reports").unwrap(),
            name_hash(&parent, "Reports 2").unwrap()
        );
    }

    #[test]
    fn test_name_hash_scoped_to_parent() {
        let a = name_hash(&generate_session_key(), "same").unwrap();
        let b = name_hash(&generate_session_key(), "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unicode_names() {
        let parent = generate_session_key();
        let name = "日本語のファイル.txt";
        let enc = encrypt_name_with_session(&parent, name).unwrap();
        assert_eq!(decrypt_name_with_session(&parent, &enc).unwrap(), name);
    }
}

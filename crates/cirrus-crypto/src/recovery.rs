//! BIP-39 recovery phrases
//!
//! A 24-word phrase is shown once at account setup. It derives a key that can
//! re-lock the user private key if the password is lost. The phrase itself is
//! never persisted.

use bip39::Mnemonic;
use rand::RngCore;
use secrecy::SecretString;

use crate::kdf::{derive_key, DerivedKey, KdfParams, SALT_SIZE};

const RECOVERY_SALT: [u8; SALT_SIZE] = *b"cirrus-recover-1";

/// Generate a new 24-word phrase and the key it derives.
pub fn generate_recovery_phrase() -> anyhow::Result<(String, DerivedKey)> {
    let mut entropy = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut entropy);

    let mnemonic = Mnemonic::from_entropy(&entropy)
        .map_err(|e| anyhow::anyhow!("recovery phrase generation failed: {e}"))?;

    let words = mnemonic.to_string();
    let key = recovery_phrase_to_key(&words)?;
    Ok((words, key))
}

/// Derive the recovery key from a phrase. Whitespace and case are normalized.
///
/// Any valid BIP-39 length is accepted, so 12-word phrases still work.
pub fn recovery_phrase_to_key(words: &str) -> anyhow::Result<DerivedKey> {
    let normalized = normalize(words);
    let _mnemonic: Mnemonic = normalized
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid recovery phrase: {e}"))?;

    // 256 bits of phrase entropy; the fixed salt and lighter cost are enough
    let params = KdfParams {
        mem_cost_kib: 16384,
        time_cost: 2,
        parallelism: 1,
    };
    derive_key(&SecretString::from(normalized), &RECOVERY_SALT, &params)
}

/// True when `words` derives exactly `expected`.
pub fn verify_recovery_phrase(words: &str, expected: &DerivedKey) -> bool {
    match recovery_phrase_to_key(words) {
        Ok(key) => &key == expected,
        Err(_) => false,
    }
}

fn normalize(words: &str) -> String {
    words
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_phrase() {
        let (words, key) = generate_recovery_phrase().unwrap();
        assert_eq!(words.split_whitespace().count(), 24);
        assert_ne!(key.as_bytes(), &[0u8; 32]);
    }

    #[test]
    fn test_phrase_roundtrip() {
        let (words, original) = generate_recovery_phrase().unwrap();
        let recovered = recovery_phrase_to_key(&words).unwrap();
        assert_eq!(original, recovered);
    }

    #[test]
    fn test_phrase_normalization() {
        let (words, original) = generate_recovery_phrase().unwrap();
        let messy = format!("  {}  ", words.to_uppercase().replace(' ', "   "));
        assert!(verify_recovery_phrase(&messy, &original));
    }

    #[test]
    fn test_twelve_word_phrase_accepted() {
        let mnemonic = Mnemonic::from_entropy(&[7u8; 16]).unwrap();
        let words = mnemonic.to_string();
        assert_eq!(words.split_whitespace().count(), 12);
        let key = recovery_phrase_to_key(&words).unwrap();
        assert!(verify_recovery_phrase(&words, &key));
    }

    #[test]
    fn test_invalid_phrase() {
        assert!(recovery_phrase_to_key("not a valid phrase at all").is_err());
        assert!(!verify_recovery_phrase("nope", &DerivedKey::from_bytes([1u8; 32])));
    }
}

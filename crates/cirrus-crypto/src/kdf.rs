//! Password key derivation: Argon2id password → derived key
//!
//! The derived key locks the user's private key. It is cached in the secret
//! store between sessions so the password is only needed at login.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::encoding::{b64_decode, b64_encode};
use crate::KEY_SIZE;

/// Size of the Argon2id salt in bytes
pub const SALT_SIZE: usize = 16;

/// A 256-bit key derived from the account password. Zeroized on drop.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Base64 form used when persisting to the secret store.
    pub fn to_base64(&self) -> String {
        b64_encode(&self.bytes)
    }

    pub fn from_base64(encoded: &str) -> anyhow::Result<Self> {
        let mut raw = b64_decode(encoded)?;
        if raw.len() != KEY_SIZE {
            let len = raw.len();
            raw.zeroize();
            anyhow::bail!("derived key has wrong size: {len} bytes (expected {KEY_SIZE})");
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&raw);
        raw.zeroize();
        Ok(Self { bytes })
    }
}

impl PartialEq for DerivedKey {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for DerivedKey {}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Iterations (default: 3)
    pub time_cost: u32,
    /// Lanes (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and high-entropy inputs.
    pub fn light() -> Self {
        Self {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

/// Fresh random salt for a new account.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit key from a password and salt using Argon2id.
pub fn derive_key(
    password: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> anyhow::Result<DerivedKey> {
    if password.expose_secret().is_empty() {
        anyhow::bail!("cannot derive a key from an empty password");
    }

    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| anyhow::anyhow!("invalid Argon2id params: {e}"))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| anyhow::anyhow!("Argon2id KDF failed: {e}"))?;

    let derived = DerivedKey::from_bytes(key);
    key.zeroize();
    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdf_deterministic() {
        let password = SecretString::from("correct horse battery staple");
        let salt = [1u8; SALT_SIZE];

        let key1 = derive_key(&password, &salt, &KdfParams::light()).unwrap();
        let key2 = derive_key(&password, &salt, &KdfParams::light()).unwrap();

        assert_eq!(key1, key2, "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_different_passwords() {
        let salt = [1u8; SALT_SIZE];
        let key1 = derive_key(&SecretString::from("password-a"), &salt, &KdfParams::light()).unwrap();
        let key2 = derive_key(&SecretString::from("password-b"), &salt, &KdfParams::light()).unwrap();
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_kdf_different_salts() {
        let password = SecretString::from("same-password");
        let key1 = derive_key(&password, &[1u8; SALT_SIZE], &KdfParams::light()).unwrap();
        let key2 = derive_key(&password, &[2u8; SALT_SIZE], &KdfParams::light()).unwrap();
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_kdf_rejects_empty_password() {
        let result = derive_key(&SecretString::from(""), &[0u8; SALT_SIZE], &KdfParams::light());
        assert!(result.is_err());
    }

    #[test]
    fn test_base64_roundtrip() {
        let key = DerivedKey::from_bytes([9u8; KEY_SIZE]);
        let restored = DerivedKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key, restored);
        assert!(DerivedKey::from_base64("AAAA").is_err());
    }
}

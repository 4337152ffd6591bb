//! cirrus-secrets: where the derived key lives between sessions
//!
//! The password-derived key is the only long-lived secret the client keeps.
//! It goes into a [`SecretStore`] under a fixed name so a restarted client
//! can unlock the user key without prompting again.
//!
//! Backends:
//!   - `keychain`: platform keychain via `keyring`
//!   - `memory`: process-local map, for tests and ephemeral sessions
//!
//! [`device`] builds the device fingerprint sent alongside a login.

pub mod device;
pub mod keychain;
pub mod memory;
pub mod vault;

pub use device::{device_identifier, DeviceFacts, DeviceIdentifier};
pub use keychain::KeychainStore;
pub use memory::MemorySecretStore;
pub use vault::DerivedKeyVault;

use std::sync::Arc;

use anyhow::Result;
use secrecy::SecretString;

/// Opaque key → secret string storage.
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<SecretString>>;
    fn set(&self, key: &str, secret: &SecretString) -> Result<()>;
    /// Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Build the store named by `[secrets] backend`.
pub fn open_store(config: &cirrus_core::config::SecretsConfig) -> Result<Arc<dyn SecretStore>> {
    match config.backend.as_str() {
        "keychain" => {
            let store = KeychainStore::new(&config.service);
            if !store.is_available() {
                anyhow::bail!("platform keychain is not available for service '{}'", config.service);
            }
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemorySecretStore::new())),
        other => anyhow::bail!("unknown secrets backend '{other}' (expected keychain or memory)"),
    }
}

/// Well-known entry names
pub mod keys {
    /// The password-derived key (base64)
    pub const DERIVED_KEY: &str = "derived-key";
    /// The SRP session id of the last successful login
    pub const SESSION_ID: &str = "session-id";
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_core::config::SecretsConfig;

    #[test]
    fn test_open_memory_backend() {
        let config = SecretsConfig {
            service: "cirrus-test".into(),
            backend: "memory".into(),
        };
        let store = open_store(&config).unwrap();
        assert!(store.get("anything").unwrap().is_none());
    }

    #[test]
    fn test_open_unknown_backend() {
        let config = SecretsConfig {
            service: "cirrus-test".into(),
            backend: "floppy".into(),
        };
        let err = open_store(&config).err().unwrap();
        assert!(err.to_string().contains("floppy"));
    }
}

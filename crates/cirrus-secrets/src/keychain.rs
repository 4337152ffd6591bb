//! Platform keychain store.
//!
//! Uses the `keyring` crate for cross-platform access:
//! - macOS: Keychain Services
//! - Linux: Secret Service (D-Bus)
//! - Windows: Credential Manager

use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::SecretStore;

#[derive(Debug, Clone)]
pub struct KeychainStore {
    service: String,
}

impl KeychainStore {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Whether an entry can be created at all on this platform.
    pub fn is_available(&self) -> bool {
        keyring::Entry::new(&self.service, "__cirrus_probe__").is_ok()
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key)
            .map_err(|e| anyhow::anyhow!("keychain entry creation: {e}"))
    }
}

impl SecretStore for KeychainStore {
    fn get(&self, key: &str) -> Result<Option<SecretString>> {
        match self.entry(key)?.get_password() {
            Ok(mut password) => {
                let secret = SecretString::from(password.clone());
                password.zeroize();
                Ok(Some(secret))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("keychain get for '{key}': {e}")),
        }
    }

    fn set(&self, key: &str, secret: &SecretString) -> Result<()> {
        self.entry(key)?
            .set_password(secret.expose_secret())
            .map_err(|e| anyhow::anyhow!("keychain store for '{key}': {e}"))?;
        tracing::debug!(service = %self.service, key, "stored secret in platform keychain");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => {
                tracing::debug!(service = %self.service, key, "deleted secret from platform keychain");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("keychain delete for '{key}': {e}")),
        }
    }
}

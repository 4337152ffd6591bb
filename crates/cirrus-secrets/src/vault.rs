//! Persists the password-derived key through a [`SecretStore`].

use std::sync::Arc;

use anyhow::{Context, Result};
use cirrus_crypto::DerivedKey;
use secrecy::{ExposeSecret, SecretString};

use crate::{keys, SecretStore};

#[derive(Clone)]
pub struct DerivedKeyVault {
    store: Arc<dyn SecretStore>,
}

impl DerivedKeyVault {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    pub fn persist(&self, key: &DerivedKey) -> Result<()> {
        self.store
            .set(keys::DERIVED_KEY, &SecretString::from(key.to_base64()))
            .context("persisting derived key")?;
        tracing::info!("derived key saved to secret store");
        Ok(())
    }

    /// The stored key, or `None` if nothing was saved. A corrupt entry is an error.
    pub fn load(&self) -> Result<Option<DerivedKey>> {
        let Some(secret) = self.store.get(keys::DERIVED_KEY)? else {
            return Ok(None);
        };
        let key = DerivedKey::from_base64(secret.expose_secret())
            .context("stored derived key is corrupt")?;
        Ok(Some(key))
    }

    pub fn forget(&self) -> Result<()> {
        self.store.delete(keys::DERIVED_KEY)?;
        tracing::info!("derived key removed from secret store");
        Ok(())
    }
}

impl std::fmt::Debug for DerivedKeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKeyVault").finish_non_exhaustive()
    }
}

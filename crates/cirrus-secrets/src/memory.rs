//! In-process secret store

use std::collections::HashMap;

use anyhow::Result;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};

use crate::SecretStore;

/// Holds secrets for the lifetime of the process. Values are
/// `SecretString`, so they are zeroized when replaced or dropped.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, SecretString>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> Result<Option<SecretString>> {
        Ok(self
            .entries
            .lock()
            .get(key)
            .map(|s| SecretString::from(s.expose_secret().to_string())))
    }

    fn set(&self, key: &str, secret: &SecretString) -> Result<()> {
        self.entries.lock().insert(
            key.to_string(),
            SecretString::from(secret.expose_secret().to_string()),
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

impl std::fmt::Debug for MemorySecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySecretStore")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let store = MemorySecretStore::new();
        store.set("k", &SecretString::from("v1")).unwrap();
        assert_eq!(store.get("k").unwrap().unwrap().expose_secret(), "v1");

        store.set("k", &SecretString::from("v2")).unwrap();
        assert_eq!(store.get("k").unwrap().unwrap().expose_secret(), "v2");
        assert_eq!(store.len(), 1);

        store.delete("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
        store.delete("k").unwrap();
        assert!(store.is_empty());
    }
}

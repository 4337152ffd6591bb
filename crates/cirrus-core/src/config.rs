use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{DriveError, DriveResult};

/// Top-level client configuration (loaded from cirrus.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CirrusConfig {
    pub client: ClientConfig,
    pub cache: CacheConfig,
    pub workers: WorkerConfig,
    pub kdf: KdfConfig,
    pub secrets: SecretsConfig,
}

impl CirrusConfig {
    /// Read a TOML config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> DriveResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| DriveError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
    /// Address used to sign new nodes
    pub signer_email: Option<String>,
}

/// Node cache and folder loader tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Per-node decryption budget in seconds (default: 30)
    pub decrypt_timeout_secs: u64,
    /// A folder page fetched within this window is served from cache (default: 30)
    pub fresh_window_secs: u64,
    /// Default page size for folder listings
    pub page_size: u64,
}

impl CacheConfig {
    pub fn decrypt_timeout(&self) -> Duration {
        Duration::from_secs(self.decrypt_timeout_secs)
    }

    pub fn fresh_window(&self) -> Duration {
        Duration::from_secs(self.fresh_window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Crypto worker count (0 = available parallelism)
    pub threads: usize,
    /// Maximum items per sub-batch submitted to the pool
    pub batch_size: usize,
}

/// Argon2id parameters for the password-derived key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Parallelism (default: 4)
    pub argon2_parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Keychain service name under which the derived key is stored
    pub service: String,
    /// "keychain" or "memory"
    pub backend: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "text".into(),
            signer_email: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            decrypt_timeout_secs: 30,
            fresh_window_secs: 30,
            page_size: 150,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            batch_size: 50,
        }
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            service: "cirrus".into(),
            backend: "keychain".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[client]
log_level = "debug"
log_format = "json"
signer_email = "user@x.com"

[cache]
decrypt_timeout_secs = 10
fresh_window_secs = 5
page_size = 50

[workers]
threads = 4
batch_size = 20

[kdf]
argon2_mem_cost_kib = 131072
argon2_time_cost = 4
argon2_parallelism = 8

[secrets]
service = "cirrus-test"
backend = "memory"
"#;
        let config: CirrusConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.client.log_level, "debug");
        assert_eq!(config.client.signer_email.as_deref(), Some("user@x.com"));
        assert_eq!(config.cache.decrypt_timeout(), Duration::from_secs(10));
        assert_eq!(config.cache.page_size, 50);
        assert_eq!(config.workers.threads, 4);
        assert_eq!(config.kdf.argon2_mem_cost_kib, 131072);
        assert_eq!(config.secrets.backend, "memory");
    }

    #[test]
    fn test_parse_defaults() {
        let config: CirrusConfig = toml::from_str("").unwrap();

        assert_eq!(config.client.log_level, "info");
        assert_eq!(config.cache.decrypt_timeout_secs, 30);
        assert_eq!(config.cache.fresh_window(), Duration::from_secs(30));
        assert_eq!(config.workers.threads, 0);
        assert_eq!(config.kdf.argon2_time_cost, 3);
        assert_eq!(config.secrets.service, "cirrus");
    }

    #[test]
    fn test_parse_partial_config() {
        let config: CirrusConfig = toml::from_str("[cache]\npage_size = 25\n").unwrap();

        assert_eq!(config.cache.page_size, 25);
        assert_eq!(config.cache.decrypt_timeout_secs, 30);
        assert_eq!(config.client.log_format, "text");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CirrusConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.cache.page_size, 150);
    }

    #[test]
    fn test_load_rejects_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[cache\n").unwrap();
        assert!(matches!(CirrusConfig::load(&path), Err(DriveError::Config(_))));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = CirrusConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: CirrusConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.cache.page_size, parsed.cache.page_size);
        assert_eq!(config.secrets.service, parsed.secrets.service);
    }
}

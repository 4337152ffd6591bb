//! Device fingerprint reported at login.
//!
//! The hash is stable for one machine and app version and reveals nothing
//! about the machine by itself: SHA-256 over host and OS facts, base64.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentifier {
    pub hash: String,
    pub os_long_version: String,
    /// Display OS name plus app version, e.g. `macOS-0.3.0`
    pub os_name: String,
}

/// Raw facts the fingerprint is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFacts {
    pub hostname: String,
    pub os: String,
    pub os_version: String,
    pub distribution_id: String,
    pub arch: String,
    pub cores: usize,
    pub app_version: String,
}

impl DeviceFacts {
    pub fn collect(app_version: &str) -> Self {
        let release = std::fs::read_to_string(Path::new("/etc/os-release"))
            .map(|text| OsRelease::parse(&text))
            .unwrap_or_default();
        Self {
            hostname: default_device_name(),
            os: std::env::consts::OS.to_string(),
            os_version: release.pretty_name.unwrap_or_else(|| "unknown".into()),
            distribution_id: release.id.unwrap_or_default(),
            arch: std::env::consts::ARCH.to_string(),
            cores: std::thread::available_parallelism().map_or(0, |n| n.get()),
            app_version: app_version.to_string(),
        }
    }

    fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|cores:{}|app_version:{}",
            self.hostname,
            self.os,
            self.os_version,
            self.distribution_id,
            self.arch,
            self.cores,
            self.app_version
        )
    }
}

pub fn device_identifier(facts: &DeviceFacts) -> DeviceIdentifier {
    let digest = Sha256::digest(facts.fingerprint().as_bytes());
    let display = display_os_name(&facts.os, &facts.distribution_id);
    DeviceIdentifier {
        hash: BASE64.encode(digest),
        os_long_version: format!("{display} {}", facts.os_version),
        os_name: format!("{display}-{}", facts.app_version),
    }
}

/// `macOS`, `Windows`, the capitalized distribution id on Linux, else as-is.
pub fn display_os_name(os: &str, distribution_id: &str) -> String {
    match os.to_lowercase().as_str() {
        "macos" | "darwin" => "macOS".into(),
        "windows" => "Windows".into(),
        "linux" => {
            let mut chars = distribution_id.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => "Linux".into(),
            }
        }
        _ => os.to_string(),
    }
}

/// Hostname, or `unknown-device` when it cannot be read.
pub fn default_device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-device".into())
}

#[derive(Debug, Default)]
struct OsRelease {
    id: Option<String>,
    pretty_name: Option<String>,
}

impl OsRelease {
    fn parse(text: &str) -> Self {
        let mut out = Self::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            match key.trim() {
                "ID" => out.id = Some(value),
                "PRETTY_NAME" => out.pretty_name = Some(value),
                _ => {}
            }
        }
        out
    }
}

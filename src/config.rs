// src/config.rs

//! Loads and resolves the cluster manager's JSON configuration file
//! (spec §6). Missing or unparseable configuration is a fatal startup
//! error.

use crate::error::ScramblerError;
use crate::types::Policies;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Default path, overridable via `--config` (spec §6).
pub const DEFAULT_CONFIG_PATH: &str = "/usr/local/etc/scrambler/scrambler.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_group() -> String {
    "224.0.0.127".to_string()
}
fn default_port() -> u16 {
    4999
}
fn default_protocol() -> String {
    "epgm".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            port: default_port(),
            interface: None,
            protocol: default_protocol(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    pub cluster_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalConfig {
    #[serde(default = "default_announce")]
    pub announce: u64,
    #[serde(default = "default_update")]
    pub update: u64,
    #[serde(default = "default_schedule")]
    pub schedule: u64,
    #[serde(default = "default_zombie")]
    pub zombie: u64,
}

fn default_announce() -> u64 {
    1
}
fn default_update() -> u64 {
    5
}
// Not named explicitly in spec.md §4's default table; resolved in
// DESIGN.md's Open Questions as matching the update interval.
fn default_schedule() -> u64 {
    5
}
fn default_zombie() -> u64 {
    15
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            announce: default_announce(),
            update: default_update(),
            schedule: default_schedule(),
            zombie: default_zombie(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub interval: IntervalConfig,
    #[serde(default)]
    pub policies: Policies,
}

impl Config {
    /// Reads and parses the config file at `path`. Any failure here is
    /// fatal — the manager cannot run without a valid configuration
    /// (spec §7).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| ScramblerError::Config(format!("failed to read {path:?}: {e}")))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| ScramblerError::Config(format!("failed to parse {path:?} as JSON: {e}")))?;
        info!("loaded configuration from {path:?}");
        Ok(config)
    }

    /// Populates `hostname`/`address` from the platform when absent
    /// (spec §4.H step 2).
    pub async fn resolve_identity(&mut self) -> Result<()> {
        if self.hostname.is_none() {
            self.hostname = Some(platform_node_name().context("failed to determine platform hostname")?);
        }
        if self.address.is_none() {
            let fqdn = self.hostname.clone().unwrap_or_default();
            let resolved = tokio::net::lookup_host((fqdn.as_str(), 0))
                .await
                .ok()
                .and_then(|mut addrs| addrs.next())
                .map(|addr| addr.ip().to_string())
                .unwrap_or_else(|| "127.0.0.1".to_string());
            self.address = Some(resolved);
        }
        Ok(())
    }
}

/// `platform.node()`-equivalent: the kernel-reported hostname.
fn platform_node_name() -> Result<String> {
    let mut buf = vec![0u8; 256];
    // SAFETY: `buf` is a valid, appropriately sized byte buffer; `gethostname`
    // writes a NUL-terminated string into it and returns 0 on success.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        anyhow::bail!("gethostname(2) failed");
    }
    let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..nul]).into_owned())
}

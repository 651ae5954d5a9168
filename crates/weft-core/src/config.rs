//! Configuration system for weft.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $WEFT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/weft/config.toml
//!   3. ~/.config/weft/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ── Radio service identifiers ─────────────────────────────────────────────────

/// 128-bit service identifier handed to the radio driver. Opaque to the
/// mesh core. Debug builds advertise a separate identifier so test meshes
/// never join production ones.
#[cfg(debug_assertions)]
pub const SERVICE_UUID: &str = "7e4d1c0a-92b3-4f68-8c55-0d21aa7e03d1";
#[cfg(not(debug_assertions))]
pub const SERVICE_UUID: &str = "b90f5527-6430-4e34-9d51-f6b8c4a0e7b2";

/// 128-bit characteristic identifier for the data channel.
#[cfg(debug_assertions)]
pub const CHARACTERISTIC_UUID: &str = "d1aa33c8-40c5-4f92-a3b1-5e88e2f907c4";
#[cfg(not(debug_assertions))]
pub const CHARACTERISTIC_UUID: &str = "4c2296c7-8f4f-44d5-90cf-3a18cb3e5f21";

// ── Sections ──────────────────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub node: NodeConfig,
    pub radio: RadioConfig,
    pub relay: RelayConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Nickname announced to the mesh.
    pub nickname: String,
    /// Capacity of the host-facing event channel.
    pub event_capacity: usize,
    /// Seconds between presence re-announcements.
    pub announce_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Service identifier handed to the link driver.
    pub service_uuid: String,
    /// Characteristic identifier handed to the link driver.
    pub characteristic_uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Hop budget for locally originated packets.
    pub initial_ttl: u8,
    /// Relay jitter window, milliseconds.
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    /// Dedup cache capacity. Must hold at least 1024 recent fingerprints.
    pub dedup_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Fragment payload size for file transfers.
    pub file_chunk_bytes: usize,
    /// Fragment payload size for oversized encrypted payloads.
    pub tx_chunk_bytes: usize,
    /// Ciphertext above this size is chunked instead of sent whole.
    pub single_envelope_max: usize,
    /// Pause between successive fragments, milliseconds.
    pub pacing_ms: u64,
    /// Incomplete reassemblies older than this are evicted, seconds.
    pub assembly_timeout_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            radio: RadioConfig::default(),
            relay: RelayConfig::default(),
            transfer: TransferConfig::default(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            nickname: crate::identity::DEFAULT_NICKNAME.to_owned(),
            event_capacity: 256,
            announce_interval_secs: 10,
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            service_uuid: SERVICE_UUID.to_owned(),
            characteristic_uuid: CHARACTERISTIC_UUID.to_owned(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            initial_ttl: crate::wire::INITIAL_TTL,
            jitter_min_ms: 10,
            jitter_max_ms: 100,
            dedup_capacity: 2048,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            file_chunk_bytes: 180,
            tx_chunk_bytes: 400,
            single_envelope_max: 450,
            pacing_ms: 50,
            assembly_timeout_secs: 300,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_or_tmp().join(".config"))
        .join("weft")
}

fn home_or_tmp() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeshConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MeshConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("WEFT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply WEFT_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WEFT_NODE__NICKNAME") {
            self.node.nickname = v;
        }
        if let Ok(v) = std::env::var("WEFT_RELAY__INITIAL_TTL") {
            if let Ok(ttl) = v.parse() {
                self.relay.initial_ttl = ttl;
            }
        }
        if let Ok(v) = std::env::var("WEFT_RELAY__DEDUP_CAPACITY") {
            if let Ok(cap) = v.parse() {
                self.relay.dedup_capacity = cap;
            }
        }
        if let Ok(v) = std::env::var("WEFT_TRANSFER__PACING_MS") {
            if let Ok(ms) = v.parse() {
                self.transfer.pacing_ms = ms;
            }
        }
    }
}

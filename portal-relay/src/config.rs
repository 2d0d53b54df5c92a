//! Configuration loading for portal-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`).

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for portal-relay.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Expiry sweep configuration.
    #[serde(default)]
    pub sweep: SweepConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP server (default: 0.0.0.0:8701).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Shared endpoint-derivation seed. Generated and logged at startup
    /// when absent (operator copies it to clients).
    pub seed: Option<String>,
    /// Require an admission proof wrapped to the relay key on registration
    /// (default: false).
    #[serde(default)]
    pub admission_gated: bool,
    /// Allow re-registration of an existing name with a new key
    /// (default: false).
    #[serde(default)]
    pub allow_key_override: bool,
    /// Maximum live portal count (default: 500).
    #[serde(default = "default_max_portals")]
    pub max_portals: usize,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for per-recipient blob buckets (default: `relay-data`).
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Stored-item TTL in seconds (default: 3600 = 1 hour).
    #[serde(default = "default_item_ttl")]
    pub item_ttl_secs: u64,
    /// Maximum pending items reported per poll (default: 10).
    #[serde(default = "default_pending_limit")]
    pub pending_limit: usize,
}

/// Expiry sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Sweep interval in seconds (default: 10).
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
    /// Idle window in seconds before a silent portal is removed
    /// (default: 60).
    #[serde(default = "default_idle_window")]
    pub idle_window_secs: u64,
    /// Enable the sweep task (default: true).
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8701".to_string()
}

fn default_max_portals() -> usize {
    500
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("relay-data")
}

fn default_item_ttl() -> u64 {
    3600 // 1 hour
}

fn default_pending_limit() -> usize {
    10
}

fn default_sweep_interval() -> u64 {
    10
}

fn default_idle_window() -> u64 {
    60
}

fn default_sweep_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            seed: None,
            admission_gated: false,
            allow_key_override: false,
            max_portals: default_max_portals(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            item_ttl_secs: default_item_ttl(),
            pending_limit: default_pending_limit(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
            idle_window_secs: default_idle_window(),
            enabled: default_sweep_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8701");
        assert_eq!(config.server.max_portals, 500);
        assert!(!config.server.admission_gated);
        assert_eq!(config.storage.item_ttl_secs, 3600);
        assert_eq!(config.sweep.idle_window_secs, 60);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:9000"
seed = "deadbeef"
admission_gated = true
max_portals = 5

[storage]
root = "/data/buckets"
item_ttl_secs = 120

[sweep]
interval_secs = 2
idle_window_secs = 30
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
        assert_eq!(config.server.seed.as_deref(), Some("deadbeef"));
        assert!(config.server.admission_gated);
        assert_eq!(config.server.max_portals, 5);
        assert_eq!(config.storage.root, PathBuf::from("/data/buckets"));
        assert_eq!(config.storage.item_ttl_secs, 120);
        assert_eq!(config.sweep.idle_window_secs, 30);
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.storage.pending_limit, 10);
        assert!(config.sweep.enabled);
        assert!(config.server.seed.is_none());
    }
}

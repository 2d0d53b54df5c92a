//! Configuration loading for portal-client.
//!
//! Configuration is loaded from a TOML file (default: `portal.toml`).

use serde::Deserialize;
use std::path::PathBuf;

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// This portal's human-chosen name.
    pub portal_name: String,
    /// Base URL of the relay (e.g. `http://relay.example:8701`).
    pub relay_url: String,
    /// Shared endpoint-derivation seed (operator-supplied).
    pub seed: String,
    /// Home folder holding the outbox and inbox trees (default: `portal-home`).
    #[serde(default = "default_home")]
    pub home: PathBuf,
    /// Poll interval in seconds (default: 5).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// The relay's public key, base64. Only needed to build an admission
    /// proof when the relay runs admission-gated.
    pub relay_public_key: Option<String>,
    /// Use the native file-change backend instead of polling (default: true).
    #[serde(default = "default_native_watch")]
    pub native_watch: bool,
    /// Enable the sentinel lock-file batching protocol (default: true).
    #[serde(default = "default_lock_coordination")]
    pub lock_coordination: bool,
}

// Default value functions
fn default_home() -> PathBuf {
    PathBuf::from("portal-home")
}

fn default_poll_interval() -> u64 {
    5
}

fn default_native_watch() -> bool {
    true
}

fn default_lock_coordination() -> bool {
    true
}

impl ClientConfig {
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
    fn minimal_config_parses_with_defaults() {
        let toml = r#"
portal_name = "desk"
relay_url = "http://127.0.0.1:8701"
seed = "deadbeef"
"#;
        let config: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.portal_name, "desk");
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.home, PathBuf::from("portal-home"));
        assert!(config.native_watch);
        assert!(config.lock_coordination);
        assert!(config.relay_public_key.is_none());
    }

    #[test]
    fn full_config_parses() {
        let toml = r#"
portal_name = "laptop"
relay_url = "http://relay:8701"
seed = "cafe"
home = "/srv/portal"
poll_interval_secs = 2
relay_public_key = "AAAA"
native_watch = false
lock_coordination = false
"#;
        let config: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.home, PathBuf::from("/srv/portal"));
        assert_eq!(config.poll_interval_secs, 2);
        assert!(!config.native_watch);
        assert!(!config.lock_coordination);
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let result: std::result::Result<ClientConfig, _> = toml::from_str("portal_name = \"x\"");
        assert!(result.is_err());
    }
}

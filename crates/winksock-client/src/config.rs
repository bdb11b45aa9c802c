//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Port used when an address does not name one
pub const DEFAULT_PORT: u16 = 80;

/// Redirects followed during one handshake before giving up
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;

/// Settings shared by every connection created through one registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Ask the server for, and follow, handshake redirects
    pub follow_redirects: bool,

    /// Maximum number of redirects followed per handshake
    pub max_redirects: u32,

    /// Port assumed when the address omits one
    pub default_port: u16,

    /// Disable Nagle's algorithm on connection sockets
    pub tcp_nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            follow_redirects: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            default_port: DEFAULT_PORT,
            tcp_nodelay: true,
        }
    }
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("winksock")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.follow_redirects);
        assert_eq!(config.max_redirects, 5);
        assert_eq!(config.default_port, 80);
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ClientConfig = toml::from_str("follow_redirects = false\n").unwrap();
        assert!(!config.follow_redirects);
        assert_eq!(config.max_redirects, DEFAULT_MAX_REDIRECTS);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_redirects = 2\ndefault_port = 7010").unwrap();

        let config: ClientConfig = load_config(file.path()).unwrap();
        assert_eq!(config.max_redirects, 2);
        assert_eq!(config.default_port, 7010);
        assert!(config.follow_redirects);
    }

    #[test]
    fn test_load_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result: Result<ClientConfig, _> = load_config(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_config_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_redirects = \"many\"").unwrap();

        let result: Result<ClientConfig, _> = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("winksock/config.toml"));
    }
}

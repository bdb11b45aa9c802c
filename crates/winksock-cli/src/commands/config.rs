//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use winksock_client::config::{self, ClientConfig};

use crate::output::{print_error, print_info, print_success, print_warning};

/// Resolve the config file path from the `--config` flag
pub fn resolve_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path)
}

/// Load the client config, falling back to defaults when no file exists
///
/// An explicitly passed path must exist.
pub fn load(config_path: Option<&Path>) -> Result<ClientConfig> {
    let path = resolve_path(config_path);

    if config_path.is_none() && !path.exists() {
        tracing::debug!("No config file at {:?}, using defaults", path);
        return Ok(ClientConfig::default());
    }

    config::load_config(&path).with_context(|| format!("Failed to load config from {:?}", path))
}

/// Show current configuration
pub fn config_show(config_path: Option<&Path>) -> Result<()> {
    let path = resolve_path(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Defaults in effect:");
        println!("{}", toml::to_string_pretty(&ClientConfig::default())?);
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    let config = load(Some(path.as_path()))?;
    println!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}

/// Write a default configuration file
pub fn config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = resolve_path(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {:?}", dir))?;
        }
    }

    let content = toml::to_string_pretty(&ClientConfig::default())?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        config_init(Some(path.as_path()), false).unwrap();
        assert!(path.exists());

        let config = load(Some(path.as_path())).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(dir.path().join("missing.toml").as_path())).is_err());
    }

    #[test]
    fn test_init_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_redirects = 1\n").unwrap();

        config_init(Some(path.as_path()), false).unwrap();
        assert_eq!(load(Some(path.as_path())).unwrap().max_redirects, 1);

        config_init(Some(path.as_path()), true).unwrap();
        assert_eq!(load(Some(path.as_path())).unwrap().max_redirects, 5);
    }
}

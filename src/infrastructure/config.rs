//! Configuration file management.
//!
//! Handles loading and saving TOML configuration files.

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{AppConfig, AppError, Result};

/// Default configuration file content.
const DEFAULT_CONFIG: &str = r#"# chat-bridge configuration
# Auto-generated - edit as needed

[proxy]
# Minimum seconds between "interface changed" notices (default: 600 = 10 minutes)
notice_cooldown_secs = 600

[scan]
# Fixed wait after the DOM walk for late listing responses, in milliseconds
settle_delay_ms = 2000

[transport]
# Largest payload slice per frame, in bytes (default: 8 MiB)
frame_size_bytes = 8388608

# Hard ceiling of the messaging channel, in bytes (default: 64 MiB)
max_message_bytes = 67108864

[paths]
# Custom data directory (optional, defaults to ~/.chat-bridge)
# data_dir = "/custom/path"
"#;

/// Load configuration from file or fall back to defaults.
///
/// # Errors
/// Returns error if the file exists but cannot be read, parsed or validated.
pub fn load_config() -> Result<AppConfig> {
    let config_path = config_file_path();

    let config = if config_path.exists() {
        load_config_from_file(&config_path)?
    } else {
        AppConfig::default()
    };
    config.validate()?;
    Ok(config)
}

/// Load configuration from a specific file.
///
/// # Errors
/// Returns error if file cannot be read or parsed.
pub fn load_config_from_file(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("Failed to read config file: {}", path.display()), e))?;

    toml::from_str(&content).map_err(|e| AppError::Config {
        message: format!("Failed to parse config file: {e}"),
    })
}

/// Render configuration as TOML.
///
/// # Errors
/// Returns error if serialization fails.
pub fn render_config(config: &AppConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| AppError::Config {
        message: format!("Failed to serialize config: {e}"),
    })
}

/// Create the default configuration file if it doesn't exist.
///
/// Returns the path and whether a new file was written.
///
/// # Errors
/// Returns error if file cannot be created.
pub fn ensure_config_exists() -> Result<(PathBuf, bool)> {
    let config_path = config_file_path();
    let created = write_default_config(&config_path)?;
    Ok((config_path, created))
}

fn write_default_config(config_path: &Path) -> Result<bool> {
    if config_path.exists() {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io("Failed to create config directory", e))?;
    }

    fs::write(config_path, DEFAULT_CONFIG)
        .map_err(|e| AppError::io("Failed to create default config", e))?;

    tracing::info!(path = %config_path.display(), "Created default configuration");
    Ok(true)
}

/// Get the path to the configuration file.
#[must_use]
pub fn config_file_path() -> PathBuf {
    AppConfig::default_data_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_parses() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.proxy.notice_cooldown_secs, 600);
        assert_eq!(config.transport.frame_size_bytes, 8 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_render_and_load() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.scan.settle_delay_ms = 750;

        fs::write(&config_path, render_config(&config).unwrap()).unwrap();
        let loaded = load_config_from_file(&config_path).unwrap();

        assert_eq!(loaded.scan.settle_delay_ms, 750);
        assert_eq!(
            loaded.transport.max_message_bytes,
            config.transport.max_message_bytes
        );
    }

    #[test]
    fn test_write_default_only_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert!(write_default_config(&path).unwrap());
        assert!(!write_default_config(&path).unwrap());
        assert!(load_config_from_file(&path).is_ok());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[scan\n").unwrap();
        assert!(matches!(
            load_config_from_file(&path),
            Err(AppError::Config { .. })
        ));
    }
}

//! Application configuration models.
//!
//! Contains the tunables for interception notices, library scans and
//! the chunked transport, plus path resolution for the data directory.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{AppError, Result};

/// Configuration for the interception proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Minimum time between two "interface changed" notices, in seconds.
    #[serde(default = "default_notice_cooldown")]
    pub notice_cooldown_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            notice_cooldown_secs: default_notice_cooldown(),
        }
    }
}

const fn default_notice_cooldown() -> u64 {
    600 // 10 minutes
}

/// Configuration for library scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Fixed wait after the DOM walk finishes, in milliseconds.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay(),
        }
    }
}

const fn default_settle_delay() -> u64 {
    2000
}

/// Configuration for the chunked transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Largest payload slice carried by one frame, in bytes.
    #[serde(default = "default_frame_size")]
    pub frame_size_bytes: usize,

    /// Hard ceiling of the underlying messaging channel, in bytes.
    #[serde(default = "default_max_message")]
    pub max_message_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            frame_size_bytes: default_frame_size(),
            max_message_bytes: default_max_message(),
        }
    }
}

/// Bytes a frame line carries besides its base64 data: JSON keys, transfer id
/// and counters.
pub const FRAME_OVERHEAD_BYTES: usize = 256;

impl TransportConfig {
    /// Length of a frame line carrying `frame_size` payload bytes, worst case.
    #[must_use]
    pub const fn encoded_frame_len(frame_size: usize) -> usize {
        frame_size
            .div_ceil(3)
            .saturating_mul(4)
            .saturating_add(FRAME_OVERHEAD_BYTES)
    }

    /// Largest frame size whose encoded line stays below the ceiling.
    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_message_bytes
            .saturating_sub(FRAME_OVERHEAD_BYTES + 1)
            / 4
            * 3
    }

    /// Checks that frames of `frame_size` bytes fit the channel once encoded.
    ///
    /// # Errors
    /// Returns a config error if the size is zero or its encoded line would
    /// reach `max_message_bytes`.
    pub fn check_frame_size(&self, frame_size: usize) -> Result<()> {
        if frame_size == 0 {
            return Err(AppError::Config {
                message: "transport.frame_size_bytes must be greater than zero".into(),
            });
        }
        if Self::encoded_frame_len(frame_size) >= self.max_message_bytes {
            return Err(AppError::Config {
                message: format!(
                    "frame size {frame_size} encodes past max_message_bytes ({}); use at most {}",
                    self.max_message_bytes,
                    self.max_frame_size()
                ),
            });
        }
        Ok(())
    }
}

const fn default_frame_size() -> usize {
    8 * 1024 * 1024
}

const fn default_max_message() -> usize {
    64 * 1024 * 1024
}

/// Path configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathConfig {
    /// Base data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub paths: PathConfig,
}

impl AppConfig {
    /// Checks cross-field constraints that serde defaults cannot express.
    ///
    /// # Errors
    /// Returns a config error if the frame size is zero or its encoded form
    /// does not fit below the transport ceiling.
    pub fn validate(&self) -> Result<()> {
        self.transport
            .check_frame_size(self.transport.frame_size_bytes)
    }

    /// Get the data directory, using default if not configured.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.paths
            .data_dir
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".chat-bridge")
    }

    /// Get the store database path.
    #[must_use]
    pub fn store_db_path(&self) -> PathBuf {
        self.data_dir().join("library.db")
    }

    #[must_use]
    pub const fn notice_cooldown(&self) -> Duration {
        Duration::from_secs(self.proxy.notice_cooldown_secs)
    }

    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.scan.settle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.proxy.notice_cooldown_secs, 600);
        assert_eq!(config.scan.settle_delay_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_frame_at_ceiling() {
        let mut config = AppConfig::default();
        config.transport.frame_size_bytes = config.transport.max_message_bytes;
        assert!(matches!(config.validate(), Err(AppError::Config { .. })));

        config.transport.frame_size_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frame_size_accounts_for_encoding() {
        let mut config = AppConfig::default();
        config.transport.frame_size_bytes = 60 * 1024 * 1024;
        assert!(config.validate().is_err());

        config.transport.frame_size_bytes = 48 * 1024 * 1024;
        assert!(config.validate().is_err());

        config.transport.frame_size_bytes = 47 * 1024 * 1024;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_frame_size_is_the_boundary() {
        let transport = TransportConfig {
            frame_size_bytes: 1,
            max_message_bytes: 1024,
        };
        let max = transport.max_frame_size();
        assert_eq!(max, 573);
        assert!(transport.check_frame_size(max).is_ok());
        assert!(transport.check_frame_size(max + 1).is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str("[scan]\nsettle_delay_ms = 50\n").unwrap();
        assert_eq!(config.settle_delay(), Duration::from_millis(50));
        assert_eq!(config.transport.frame_size_bytes, 8 * 1024 * 1024);
    }
}

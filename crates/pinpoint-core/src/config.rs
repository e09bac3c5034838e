//! Application configuration management.
//!
//! Handles loading, saving, and validating pinpoint configuration:
//! - Which adapter to use and which service/characteristic identify a target
//! - Transport operation timeout and optional signal-strength floor
//! - HTTP bind address for the server shell

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::cycle::CycleSettings;
use crate::filter::DiscoveryFilter;

/// Service advertised by every candidate peripheral.
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0xD12F_953F_18ED_45F8_BC0B_6B78_DB90_B491);

/// Characteristic holding the peripheral's serial number.
pub const DEFAULT_IDENTITY_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xED8C_753F_C961_4861_A399_3B15_68C1_D23E);

/// Default per-operation timeout for connect, read and disconnect.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Environment variable overriding the configuration file path.
pub const CONFIG_PATH_ENV: &str = "PINPOINT_CONFIG";

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The configuration file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// File being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`Config`].
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be rendered as TOML.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A field holds an unusable value.
    #[error("invalid {field}: {message}")]
    Validation {
        /// Offending field, dotted path.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth search parameters.
    pub bluetooth: BluetoothConfig,

    /// HTTP server parameters.
    pub server: ServerConfig,
}

/// Bluetooth search parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Adapter name (e.g. `hci0`); the system default when absent.
    pub adapter: Option<String>,

    /// Service every candidate advertises.
    pub service_uuid: Uuid,

    /// Characteristic holding the serial number.
    pub identity_characteristic_uuid: Uuid,

    /// Timeout for each connect, read and disconnect. `0` disables it.
    pub operation_timeout_secs: u64,

    /// Ignore discoveries weaker than this many dBm.
    pub min_rssi: Option<i16>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            service_uuid: DEFAULT_SERVICE_UUID,
            identity_characteristic_uuid: DEFAULT_IDENTITY_CHARACTERISTIC_UUID,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            min_rssi: None,
        }
    }
}

impl BluetoothConfig {
    /// Operation timeout, `None` when disabled.
    #[must_use]
    pub const fn operation_timeout(&self) -> Option<Duration> {
        match self.operation_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Parameters for the verification cycle.
    #[must_use]
    pub fn cycle_settings(&self) -> CycleSettings {
        let mut settings = CycleSettings::new(self.service_uuid, self.identity_characteristic_uuid);
        if let Some(floor) = self.min_rssi {
            settings.filter = DiscoveryFilter::new().with_min_rssi(floor);
        }
        settings
    }
}

/// HTTP server parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
        }
    }
}

impl ServerConfig {
    /// Parsed bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the address does not parse.
    pub fn socket_addr(&self) -> ConfigResult<SocketAddr> {
        self.bind_address
            .parse()
            .map_err(|e| ConfigError::Validation {
                field: "server.bind_address",
                message: format!("'{}': {e}", self.bind_address),
            })
    }
}

impl Config {
    /// Load and validate configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, malformed, or
    /// fails validation.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`, falling back to defaults if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be used.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        match Self::load(path) {
            Err(ConfigError::NotFound(path)) => {
                tracing::info!(path = %path.display(), "No configuration file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Write configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized or written.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let write_error = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_error)
    }

    /// Check values that parse but cannot work.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Validation`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(adapter) = &self.bluetooth.adapter {
            if adapter.trim().is_empty() {
                return Err(ConfigError::Validation {
                    field: "bluetooth.adapter",
                    message: "adapter name cannot be empty".to_string(),
                });
            }
        }

        if self.bluetooth.service_uuid == self.bluetooth.identity_characteristic_uuid {
            return Err(ConfigError::Validation {
                field: "bluetooth.identity_characteristic_uuid",
                message: "must differ from bluetooth.service_uuid".to_string(),
            });
        }

        if let Some(floor) = self.bluetooth.min_rssi {
            if !(-127..=20).contains(&floor) {
                return Err(ConfigError::Validation {
                    field: "bluetooth.min_rssi",
                    message: format!("{floor} dBm is outside -127..=20"),
                });
            }
        }

        self.server.socket_addr()?;
        Ok(())
    }

    /// Configuration file path: `$PINPOINT_CONFIG` if set, otherwise the
    /// platform default.
    #[must_use]
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }
        // On Linux: /etc/pinpoint/config.toml
        // Elsewhere: the platform config directory
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/etc/pinpoint/config.toml")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "pinpoint").map_or_else(
                || PathBuf::from("pinpoint.toml"),
                |dirs| dirs.config_dir().join("config.toml"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bluetooth.service_uuid, DEFAULT_SERVICE_UUID);
        assert_eq!(
            config.bluetooth.operation_timeout(),
            Some(Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS))
        );
    }

    #[test]
    fn test_zero_timeout_disables() {
        let config = BluetoothConfig {
            operation_timeout_secs: 0,
            ..BluetoothConfig::default()
        };
        assert_eq!(config.operation_timeout(), None);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [bluetooth]
            adapter = "hci1"
            min_rssi = -80
            "#,
        )
        .unwrap();
        assert_eq!(config.bluetooth.adapter.as_deref(), Some("hci1"));
        assert_eq!(
            config.bluetooth.identity_characteristic_uuid,
            DEFAULT_IDENTITY_CHARACTERISTIC_UUID
        );
        assert_eq!(config.server.bind_address, DEFAULT_BIND_ADDRESS);
    }

    #[test]
    fn test_uuid_strings_parse() {
        let config: Config = toml::from_str(
            r#"
            [bluetooth]
            service_uuid = "D12F953F-18ED-45F8-BC0B-6B78DB90B491"
            identity_characteristic_uuid = "ED8C753F-C961-4861-A399-3B1568C1D23E"
            "#,
        )
        .unwrap();
        assert_eq!(config.bluetooth.service_uuid, DEFAULT_SERVICE_UUID);
    }

    #[test]
    fn test_rejects_same_service_and_characteristic() {
        let mut config = Config::default();
        config.bluetooth.identity_characteristic_uuid = config.bluetooth.service_uuid;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation {
                field: "bluetooth.identity_characteristic_uuid",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_bad_bind_address() {
        let mut config = Config::default();
        config.server.bind_address = "not an address".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation {
                field: "server.bind_address",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_blank_adapter() {
        let mut config = Config::default();
        config.bluetooth.adapter = Some("  ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cycle_settings_carry_rssi_floor() {
        let mut config = BluetoothConfig::default();
        config.min_rssi = Some(-75);
        let settings = config.cycle_settings();
        assert_eq!(settings.filter, DiscoveryFilter::new().with_min_rssi(-75));
        assert_eq!(settings.service, DEFAULT_SERVICE_UUID);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.bluetooth.adapter = Some("hci0".to_string());
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");

        assert!(matches!(Config::load(&path), Err(ConfigError::NotFound(_))));
        assert_eq!(Config::load_or_default(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bluetooth\nadapter = ").unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }
}

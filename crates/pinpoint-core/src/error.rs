//! Unified error types for the pinpoint core library.
//!
//! [`PinpointError`] covers every failure mode that can be returned from a
//! public API call. Module-specific errors ([`ConfigError`](crate::config::ConfigError),
//! [`TransportError`](crate::transport::TransportError)) convert into it.
//!
//! Note that terminal *session* failures (connect, read, disconnect, scan)
//! are not returned as errors: they are states, see
//! [`SessionState::Failed`](crate::types::SessionState::Failed).
//!
//! # Example
//!
//! ```rust
//! use pinpoint_core::error::{PinpointError, Result};
//!
//! fn require_serial(serial: &str) -> Result<()> {
//!     if serial.is_empty() {
//!         return Err(PinpointError::InvalidInput("serial number cannot be empty".into()));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all pinpoint operations.
#[derive(Debug, Error)]
pub enum PinpointError {
    // =========================================================================
    // INPUT ERRORS
    // =========================================================================
    /// The supplied target identity was empty or otherwise unusable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    BluetoothAdapterNotFound,

    /// The Bluetooth stack could not be reached or refused the request.
    #[error("Bluetooth unavailable: {0}")]
    BluetoothUnavailable(String),

    /// The session driver has shut down and no longer accepts requests.
    #[error("Session controller is no longer running")]
    SessionClosed,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // I/O ERRORS
    // =========================================================================
    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for pinpoint operations.
pub type Result<T> = std::result::Result<T, PinpointError>;

impl PinpointError {
    /// Returns `true` if this error is related to Bluetooth operations.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::BluetoothAdapterNotFound | Self::BluetoothUnavailable(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if the caller supplied bad input.
    #[inline]
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::ConfigNotFound(_) => 404,
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,
            Self::IoError(_) => 500,
            Self::BluetoothAdapterNotFound
            | Self::BluetoothUnavailable(_)
            | Self::SessionClosed => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::BluetoothAdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::BluetoothUnavailable(_) => "BLUETOOTH_UNAVAILABLE",
            Self::SessionClosed => "SESSION_CLOSED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for PinpointError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::Read { path, source } | ConfigError::Write { path, source } => {
                Self::IoError(std::io::Error::new(
                    source.kind(),
                    format!("{}: {source}", path.display()),
                ))
            }
            ConfigError::Parse(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Serialize(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Validation { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
        }
    }
}

impl From<crate::transport::TransportError> for PinpointError {
    fn from(err: crate::transport::TransportError) -> Self {
        use crate::transport::TransportError;
        match err {
            TransportError::AdapterNotFound => Self::BluetoothAdapterNotFound,
            TransportError::Unavailable(message) => Self::BluetoothUnavailable(message),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! Shared types for the pinpoint session.
//!
//! These are the values that flow between the discovery filter, the
//! verification cycle, the session controller and whatever shell renders
//! status. Most of them serialize so the HTTP layer can hand them out as-is.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{PinpointError, Result};

/// Transport-assigned identifier of a physical peripheral.
///
/// Opaque to the core: only compared for equality. The BlueZ transport uses
/// the device address, the mock transport whatever string the test chose.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "AA:BB:CC:DD:EE:FF")]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a transport identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One observation of an advertising peripheral during an active scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Identifier of the peripheral.
    pub id: DeviceId,

    /// Advertised local name, if broadcast.
    pub name: Option<String>,

    /// Signal strength in dBm at discovery time.
    pub rssi: Option<i16>,

    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
}

impl DiscoveredDevice {
    /// A discovery carrying only an identifier.
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            rssi: None,
            services: Vec::new(),
        }
    }

    /// Attach an advertised name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a signal strength reading.
    #[must_use]
    pub const fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Attach the advertised service set.
    #[must_use]
    pub fn with_services(mut self, services: Vec<Uuid>) -> Self {
        self.services = services;
        self
    }
}

/// The serial number the session is looking for.
///
/// Never empty; construct with [`TargetIdentity::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TargetIdentity(String);

impl TargetIdentity {
    /// Validate and wrap a user-supplied serial number.
    ///
    /// # Errors
    ///
    /// Returns [`PinpointError::InvalidInput`] if `serial` is empty.
    pub fn new(serial: impl Into<String>) -> Result<Self> {
        let serial = serial.into();
        if serial.is_empty() {
            return Err(PinpointError::InvalidInput(
                "serial number cannot be empty".to_string(),
            ));
        }
        Ok(Self(serial))
    }

    /// The serial number.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Category of a terminal session failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The target serial number was empty.
    InvalidInput,
    /// The transport reported a failed connect.
    ConnectionError,
    /// The transport failed to read the identity characteristic.
    ReadError,
    /// Disconnecting from a mismatched device failed.
    DisconnectError,
    /// The scan stopped with an error.
    ScanError,
}

impl ErrorKind {
    /// Human-readable label used as the prefix of status text.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::InvalidInput => "Invalid Input",
            Self::ConnectionError => "Connection Error",
            Self::ReadError => "Read Error",
            Self::DisconnectError => "Disconnect Error",
            Self::ScanError => "Scan Error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A terminal failure: what went wrong and the transport's explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Failure category.
    pub kind: ErrorKind,
    /// Transport-supplied message.
    pub message: String,
}

impl Failure {
    /// Build a failure of `kind`.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Externally visible state of the session.
///
/// Exactly one is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// No session running.
    #[default]
    Idle,
    /// Scanning for peripherals advertising the identity service.
    Searching,
    /// Connecting to a candidate.
    Connecting {
        /// Candidate being connected.
        device: DeviceId,
    },
    /// Reading and checking the candidate's serial number.
    Verifying {
        /// Candidate being verified.
        device: DeviceId,
    },
    /// Connected to the peripheral whose serial number matched.
    Connected {
        /// The matching peripheral.
        device: DeviceId,
    },
    /// The session ended with an error.
    Failed {
        /// What went wrong.
        failure: Failure,
    },
}

impl SessionState {
    /// Whether the session has reached `Connected` or `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Connected { .. } | Self::Failed { .. })
    }

    /// Device the state refers to, if any.
    #[must_use]
    pub const fn device(&self) -> Option<&DeviceId> {
        match self {
            Self::Connecting { device }
            | Self::Verifying { device }
            | Self::Connected { device } => {
                Some(device)
            }
            Self::Idle | Self::Searching | Self::Failed { .. } => None,
        }
    }

    /// Failure details when in `Failed`.
    #[must_use]
    pub const fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failed { failure } => Some(failure),
            _ => None,
        }
    }

    /// Short machine-readable name of the variant.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::Connecting { .. } => "connecting",
            Self::Verifying { .. } => "verifying",
            Self::Connected { .. } => "connected",
            Self::Failed { .. } => "failed",
        }
    }

    /// Status line for a UI label.
    #[must_use]
    pub fn status_text(&self) -> String {
        match self {
            Self::Idle => "Waiting".to_string(),
            Self::Searching => "Searching...".to_string(),
            Self::Connecting { device } => format!("Connecting to {device}"),
            Self::Verifying { device } => format!("Verifying {device}"),
            Self::Connected { .. } => "Connected".to_string(),
            Self::Failed { failure } => failure.to_string(),
        }
    }
}

/// Push notification emitted on every state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// State entered.
    #[serde(flatten)]
    pub state: SessionState,

    /// When the transition was applied.
    pub changed_at_utc: DateTime<Utc>,
}

impl StateChange {
    /// Stamp `state` with the current time.
    #[must_use]
    pub fn now(state: SessionState) -> Self {
        Self {
            state,
            changed_at_utc: Utc::now(),
        }
    }
}

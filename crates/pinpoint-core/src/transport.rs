//! The seam between the session and the BLE stack.
//!
//! The session never awaits the stack. It hands a [`Command`] to a
//! [`Transport`] together with an [`EventSink`]; the transport performs the
//! work wherever it likes and reports the outcome through the sink as a
//! [`TransportEvent`]. Each sink is stamped with the [`OperationToken`] that
//! was current when the command was issued, so the session can tell a stale
//! completion from a live one.
//!
//! Implementations:
//! - [`bluez`] - BlueZ via `bluer` (feature `bluetooth`)
//! - [`mock`] - simulated peripherals for tests and hardware-less runs

use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::{DeviceId, DiscoveredDevice};

#[cfg(feature = "bluetooth")]
pub mod bluez;
pub mod mock;

/// Errors raised while bringing a transport up.
///
/// Failures of individual operations are not errors here: they travel back
/// as [`TransportEvent`]s.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No usable adapter exists.
    #[error("no Bluetooth adapter found")]
    AdapterNotFound,

    /// The stack could not be reached.
    #[error("Bluetooth stack unavailable: {0}")]
    Unavailable(String),
}

/// Monotonic identifier of the operation a completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct OperationToken(u64);

impl OperationToken {
    /// The token following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Raw counter value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which events the stack should surface for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPreferences {
    /// Surface the connection being established.
    pub notify_on_connection: bool,
    /// Surface the peripheral dropping the connection.
    pub notify_on_disconnection: bool,
    /// Surface characteristic notifications.
    pub notify_on_notification: bool,
}

impl Default for ConnectionPreferences {
    fn default() -> Self {
        Self {
            notify_on_connection: false,
            notify_on_disconnection: true,
            notify_on_notification: false,
        }
    }
}

/// A request from the verification cycle to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Scan for peripherals advertising `service`, duplicates suppressed.
    StartScan {
        /// Required advertised service.
        service: Uuid,
    },
    /// Stop the active scan, if any.
    StopScan,
    /// Stop offering this device for the rest of the scan.
    RejectDevice(DeviceId),
    /// Connect to a discovered device.
    Connect {
        /// Device to connect to.
        device: DeviceId,
        /// Notification preferences for the connection.
        preferences: ConnectionPreferences,
    },
    /// Read the identity characteristic of a connected device.
    ReadIdentity {
        /// Connected device.
        device: DeviceId,
        /// Characteristic holding the serial number.
        characteristic: Uuid,
    },
    /// Disconnect from a device.
    Disconnect(DeviceId),
}

impl Command {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StartScan { .. } => "start_scan",
            Self::StopScan => "stop_scan",
            Self::RejectDevice(_) => "reject_device",
            Self::Connect { .. } => "connect",
            Self::ReadIdentity { .. } => "read_identity",
            Self::Disconnect(_) => "disconnect",
        }
    }
}

/// An asynchronous completion reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peripheral was seen during the scan.
    Discovered(DiscoveredDevice),
    /// The scan ended, optionally because of an error.
    ScanStopped(Option<String>),
    /// Outcome of a [`Command::Connect`].
    ConnectFinished(Result<(), String>),
    /// Outcome of a [`Command::ReadIdentity`], decoded as text.
    IdentityRead(Result<String, String>),
    /// Outcome of a [`Command::Disconnect`].
    DisconnectFinished(Result<(), String>),
}

/// A [`TransportEvent`] tagged with the token of the command that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Token current when the originating command was issued.
    pub token: OperationToken,
    /// The completion.
    pub event: TransportEvent,
}

/// Where a transport delivers the completions of one command.
#[derive(Debug, Clone)]
pub struct EventSink {
    token: OperationToken,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSink {
    /// A sink delivering into `tx`, stamped with `token`.
    #[must_use]
    pub const fn new(token: OperationToken, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { token, tx }
    }

    /// Token this sink stamps onto events.
    #[must_use]
    pub const fn token(&self) -> OperationToken {
        self.token
    }

    /// Deliver `event`.
    ///
    /// Returns `false` once the session has gone away; callers can use it
    /// to abandon long-running work such as a scan loop.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Envelope {
                token: self.token,
                event,
            })
            .is_ok()
    }

    /// Whether the receiving session has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A BLE central able to carry out [`Command`]s.
///
/// `execute` must not block: long-running work is spawned and its outcome
/// reported through `sink`. Commands arrive one at a time from a single
/// driver task.
pub trait Transport: Send + 'static {
    /// Carry out `command`, reporting completions to `sink`.
    fn execute(&mut self, command: Command, sink: EventSink);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn execute(&mut self, command: Command, sink: EventSink) {
        (**self).execute(command, sink);
    }
}

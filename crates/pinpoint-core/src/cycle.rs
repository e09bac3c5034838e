//! The connect / read / verify / retry state machine.
//!
//! [`Cycle::step`] is a pure transition: it consumes the current cycle and
//! one [`TransportEvent`] and returns the next cycle plus the [`Command`]s
//! the transport should carry out. Nothing here touches the transport or a
//! clock, so the whole search can be replayed from a scripted event list.
//!
//! ```text
//!             Discovered (not blacklisted)
//!  Searching ------------------------------> Connecting(d)
//!     ^                                          |  ConnectFinished(Ok)
//!     |                                          v
//!     |  DisconnectFinished(Ok)             Verifying(d)
//!     +------------------------ Rejecting(d) <---+  IdentityRead(Ok(other))
//!                                                |
//!                                                +--> Connected(d)  IdentityRead(Ok(target))
//!
//!  any transport failure on the active step --> Failed(kind)
//! ```

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::blacklist::Blacklist;
use crate::filter::{Decision, DiscoveryFilter};
use crate::identity;
use crate::transport::{Command, ConnectionPreferences, TransportEvent};
use crate::types::{DeviceId, ErrorKind, Failure, SessionState, TargetIdentity};

/// Fixed parameters of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSettings {
    /// Service every candidate must advertise.
    pub service: Uuid,
    /// Characteristic holding the serial number.
    pub identity_characteristic: Uuid,
    /// Preferences passed with every connect.
    pub preferences: ConnectionPreferences,
    /// Per-discovery policy.
    pub filter: DiscoveryFilter,
}

impl CycleSettings {
    /// Settings for the given service and characteristic with default
    /// preferences and filter.
    #[must_use]
    pub fn new(service: Uuid, identity_characteristic: Uuid) -> Self {
        Self {
            service,
            identity_characteristic,
            preferences: ConnectionPreferences::default(),
            filter: DiscoveryFilter::new(),
        }
    }
}

/// Internal phase of the cycle.
///
/// Finer-grained than [`SessionState`]: `Rejecting` (mismatch found,
/// waiting for the disconnect) is reported as `Verifying`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Scan running.
    Searching,
    /// Connect requested.
    Connecting(DeviceId),
    /// Identity read requested.
    Verifying(DeviceId),
    /// Wrong device, disconnect requested.
    Rejecting(DeviceId),
    /// Matching device connected.
    Connected(DeviceId),
    /// Terminal failure.
    Failed {
        /// What went wrong.
        failure: Failure,
        /// Device whose link may still be up, released on teardown.
        held: Option<DeviceId>,
    },
}

impl Phase {
    /// Whether no further transitions can happen.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Connected(_) | Self::Failed { .. })
    }

    /// Device currently held by the cycle, if any.
    #[must_use]
    pub const fn device(&self) -> Option<&DeviceId> {
        match self {
            Self::Connecting(d) | Self::Verifying(d) | Self::Rejecting(d) | Self::Connected(d) => {
                Some(d)
            }
            Self::Failed { held, .. } => held.as_ref(),
            Self::Searching => None,
        }
    }

    fn failed(kind: ErrorKind, message: impl Into<String>, held: Option<DeviceId>) -> Self {
        Self::Failed {
            failure: Failure::new(kind, message),
            held,
        }
    }
}

/// One search for the target peripheral.
#[derive(Debug, Clone)]
pub struct Cycle {
    target: TargetIdentity,
    settings: CycleSettings,
    blacklist: Blacklist,
    phase: Phase,
}

impl Cycle {
    /// Start searching for `target` with an empty blacklist.
    #[must_use]
    pub fn begin(target: TargetIdentity, settings: CycleSettings) -> (Self, Vec<Command>) {
        info!(target_serial = %target, service = %settings.service, "Searching for peripheral");
        let scan = Command::StartScan {
            service: settings.service,
        };
        let cycle = Self {
            target,
            settings,
            blacklist: Blacklist::new(),
            phase: Phase::Searching,
        };
        (cycle, vec![scan])
    }

    /// Apply one transport event.
    ///
    /// Events that do not belong to the current phase leave the cycle
    /// untouched and produce no commands.
    #[must_use]
    pub fn step(mut self, event: TransportEvent) -> (Self, Vec<Command>) {
        let phase = std::mem::replace(&mut self.phase, Phase::Searching);

        let (phase, commands) = match (phase, event) {
            (Phase::Searching, TransportEvent::Discovered(device)) => {
                match self.settings.filter.decide(&device, &self.blacklist) {
                    Decision::Connect => {
                        info!(
                            device = %device.id,
                            name = ?device.name,
                            rssi = ?device.rssi,
                            "Connecting to candidate"
                        );
                        let command = Command::Connect {
                            device: device.id.clone(),
                            preferences: self.settings.preferences,
                        };
                        (Phase::Connecting(device.id), vec![command])
                    }
                    Decision::RejectPermanently => {
                        debug!(device = %device.id, "Rejecting blacklisted device");
                        (Phase::Searching, vec![Command::RejectDevice(device.id)])
                    }
                    Decision::Ignore => {
                        debug!(device = %device.id, rssi = ?device.rssi, "Ignoring discovery");
                        (Phase::Searching, Vec::new())
                    }
                }
            }

            (Phase::Searching, TransportEvent::ScanStopped(Some(message))) => {
                error!(error = %message, "Scan stopped with error");
                (Phase::failed(ErrorKind::ScanError, message, None), Vec::new())
            }

            (Phase::Connecting(device), TransportEvent::ConnectFinished(Ok(()))) => {
                info!(device = %device, "Connected, reading serial number");
                let command = Command::ReadIdentity {
                    device: device.clone(),
                    characteristic: self.settings.identity_characteristic,
                };
                (Phase::Verifying(device), vec![command])
            }

            (Phase::Connecting(device), TransportEvent::ConnectFinished(Err(message))) => {
                error!(device = %device, error = %message, "Connection failed");
                (Phase::failed(ErrorKind::ConnectionError, message, None), Vec::new())
            }

            (Phase::Verifying(device), TransportEvent::IdentityRead(Ok(serial))) => {
                if identity::matches(&serial, &self.target) {
                    info!(device = %device, "Serial number matched");
                    (Phase::Connected(device), Vec::new())
                } else {
                    warn!(
                        device = %device,
                        serial = %serial,
                        "Serial number mismatch, blacklisting"
                    );
                    self.blacklist.add(device.clone());
                    (
                        Phase::Rejecting(device.clone()),
                        vec![Command::Disconnect(device)],
                    )
                }
            }

            (Phase::Verifying(device), TransportEvent::IdentityRead(Err(message))) => {
                // The link is still up after a failed read.
                error!(device = %device, error = %message, "Reading serial number failed");
                (Phase::failed(ErrorKind::ReadError, message, Some(device)), Vec::new())
            }

            (Phase::Rejecting(device), TransportEvent::DisconnectFinished(Ok(()))) => {
                info!(
                    device = %device,
                    rejected = self.blacklist.len(),
                    "Disconnected, resuming search"
                );
                let scan = Command::StartScan {
                    service: self.settings.service,
                };
                (Phase::Searching, vec![scan])
            }

            (Phase::Rejecting(device), TransportEvent::DisconnectFinished(Err(message))) => {
                error!(device = %device, error = %message, "Disconnect after mismatch failed");
                (Phase::failed(ErrorKind::DisconnectError, message, Some(device)), Vec::new())
            }

            (phase, TransportEvent::ScanStopped(None)) => {
                debug!(phase = ?phase, "Scan stopped");
                (phase, Vec::new())
            }

            (phase, event) => {
                debug!(phase = ?phase, event = ?event, "Dropping event not expected in this phase");
                (phase, Vec::new())
            }
        };

        self.phase = phase;
        (self, commands)
    }

    /// Commands that release whatever the cycle currently holds.
    ///
    /// Used when the session is stopped from outside. A failed cycle still
    /// releases a device whose link survived the failure.
    #[must_use]
    pub fn teardown(&self) -> Vec<Command> {
        match &self.phase {
            Phase::Searching => vec![Command::StopScan],
            phase => phase
                .device()
                .map(|d| vec![Command::Disconnect(d.clone())])
                .unwrap_or_default(),
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Externally visible state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match &self.phase {
            Phase::Searching => SessionState::Searching,
            Phase::Connecting(device) => SessionState::Connecting {
                device: device.clone(),
            },
            Phase::Verifying(device) | Phase::Rejecting(device) => SessionState::Verifying {
                device: device.clone(),
            },
            Phase::Connected(device) => SessionState::Connected {
                device: device.clone(),
            },
            Phase::Failed { failure, .. } => SessionState::Failed {
                failure: failure.clone(),
            },
        }
    }

    /// Serial number being searched for.
    #[must_use]
    pub const fn target(&self) -> &TargetIdentity {
        &self.target
    }

    /// Devices rejected so far.
    #[must_use]
    pub const fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }
}

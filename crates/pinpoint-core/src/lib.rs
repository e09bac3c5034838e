//! # pinpoint-core
//!
//! Core logic for connecting to one specific BLE peripheral among many that
//! advertise the same service, by reading and checking its serial number
//! after connecting.
//!
//! This crate provides:
//! - The discovery filter and session blacklist of proven-wrong devices
//! - The connect / read / verify / retry state machine
//! - A session controller that serializes every transition on one task
//! - A BlueZ transport, and a simulated one for development and tests
//!
//! ## Architecture
//!
//! - [`identity`] - Serial-number comparison
//! - [`blacklist`] - Session-scoped set of rejected devices
//! - [`filter`] - Per-discovery connect / reject / ignore decision
//! - [`cycle`] - Pure transition function of the verification cycle
//! - [`session`] - Session ownership, operation tokens, status channels
//! - [`transport`] - The command/event seam to the BLE stack
//! - [`config`] - Configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared data model
//!
//! ## Example
//!
//! ```rust,no_run
//! # async fn run() -> pinpoint_core::Result<()> {
//! use pinpoint_core::transport::mock::MockTransport;
//! use pinpoint_core::{Config, SessionController};
//!
//! let config = Config::default();
//! let transport = MockTransport::demo(config.bluetooth.service_uuid);
//! let controller = SessionController::spawn(transport, config.bluetooth.cycle_settings());
//!
//! controller.start("ASDF1234").await?;
//! let mut changes = controller.subscribe();
//! while let Ok(change) = changes.recv().await {
//!     println!("{}", change.state.status_text());
//!     if change.state.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod blacklist;
pub mod config;
pub mod cycle;
pub mod error;
pub mod filter;
pub mod identity;
pub mod session;
pub mod transport;
pub mod types;

// Re-export primary types for convenience
pub use blacklist::Blacklist;
pub use config::{BluetoothConfig, Config, ConfigError, ConfigResult, ServerConfig};
pub use cycle::{Cycle, CycleSettings, Phase};
pub use error::{PinpointError, Result};
pub use filter::{Decision, DiscoveryFilter};
pub use session::{Session, SessionController, SessionSnapshot};
#[cfg(feature = "bluetooth")]
pub use transport::bluez::BluezTransport;
pub use transport::mock::{MockPeripheral, MockTransport};
pub use transport::{Command, ConnectionPreferences, Transport, TransportError, TransportEvent};
pub use types::{
    DeviceId, DiscoveredDevice, ErrorKind, Failure, SessionState, StateChange, TargetIdentity,
};

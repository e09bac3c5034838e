//! Application state shared across handlers.

use std::sync::Arc;

use pinpoint_core::{BluetoothConfig, SessionController};
use tracing::{info, warn};

use crate::api::error::ApiError;

/// Shared application state handed to every handler.
pub type SharedState = Arc<AppState>;

/// Application state.
///
/// The session controller serializes its own work, so no lock is needed
/// around it.
#[derive(Debug)]
pub struct AppState {
    controller: Option<SessionController>,
}

impl AppState {
    /// Create application state around an already spawned controller.
    ///
    /// `None` means the Bluetooth stack could not be reached; session
    /// endpoints then answer 503.
    #[must_use]
    pub const fn new(controller: Option<SessionController>) -> Self {
        Self { controller }
    }

    /// Wrap the state for sharing with the router.
    #[must_use]
    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }

    /// Whether a transport came up at startup.
    #[must_use]
    pub const fn bluetooth_available(&self) -> bool {
        self.controller.is_some()
    }

    /// The session controller, or a 503 when Bluetooth is unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::ServiceUnavailable`] when no transport was opened.
    pub fn controller(&self) -> Result<&SessionController, ApiError> {
        self.controller
            .as_ref()
            .ok_or_else(|| ApiError::ServiceUnavailable {
                error_code: "bluetooth_unavailable".to_string(),
                message: "Bluetooth is not available on this host".to_string(),
                details: None,
            })
    }
}

/// Open the configured transport and spawn the session driver on it.
///
/// Returns `None` when no transport could be opened; the server still runs
/// so that `/health` can report the problem.
pub async fn spawn_controller(config: &BluetoothConfig) -> Option<SessionController> {
    let settings = config.cycle_settings();
    open_transport(config)
        .await
        .map(|transport| SessionController::spawn(transport, settings))
}

#[cfg(feature = "mock-bluetooth")]
#[allow(clippy::unused_async)]
async fn open_transport(config: &BluetoothConfig) -> Option<Box<dyn pinpoint_core::Transport>> {
    info!("Using simulated peripherals");
    Some(Box::new(pinpoint_core::MockTransport::demo(
        config.service_uuid,
    )))
}

#[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
async fn open_transport(config: &BluetoothConfig) -> Option<Box<dyn pinpoint_core::Transport>> {
    match pinpoint_core::BluezTransport::new(config).await {
        Ok(transport) => {
            info!(adapter = ?config.adapter, "Bluetooth transport ready");
            Some(Box::new(transport))
        }
        Err(e) => {
            let err = pinpoint_core::PinpointError::from(e);
            warn!(
                error = %err,
                error_code = err.error_code(),
                "Bluetooth unavailable, session endpoints disabled"
            );
            None
        }
    }
}

#[cfg(not(any(feature = "bluetooth", feature = "mock-bluetooth")))]
#[allow(clippy::unused_async)]
async fn open_transport(_config: &BluetoothConfig) -> Option<Box<dyn pinpoint_core::Transport>> {
    warn!("Built without Bluetooth support, session endpoints disabled");
    None
}

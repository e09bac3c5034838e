//! Session API endpoints.
//!
//! A client supplies the serial number of the peripheral it wants, then
//! follows the search either by polling `GET /api/session` or by holding
//! open the `GET /api/session/events` stream.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::{DateTime, Utc};
use futures::Stream;
use pinpoint_core::{ErrorKind, SessionSnapshot, SessionState, StateChange};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to start searching for a peripheral.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "serial_number": "ASDF1234"
}))]
pub struct StartSessionRequest {
    /// Serial number the peripheral must report. Must not be empty.
    #[schema(example = "ASDF1234")]
    pub serial_number: String,
}

/// Flattened view of a session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "state": "verifying",
    "status_text": "Verifying 00:11:22:33:44:03",
    "device_id": "00:11:22:33:44:03",
    "error_kind": null,
    "error_message": null
}))]
pub struct StateView {
    /// One of `idle`, `searching`, `connecting`, `verifying`, `connected`, `failed`.
    #[schema(example = "verifying")]
    pub state: String,

    /// Human-readable status line.
    #[schema(example = "Verifying 00:11:22:33:44:03")]
    pub status_text: String,

    /// Device the state refers to, if any.
    #[schema(example = "00:11:22:33:44:03", nullable)]
    pub device_id: Option<String>,

    /// Failure category when `state` is `failed`.
    #[schema(nullable)]
    pub error_kind: Option<ErrorKind>,

    /// Failure message when `state` is `failed`.
    #[schema(nullable)]
    pub error_message: Option<String>,
}

impl From<&SessionState> for StateView {
    fn from(state: &SessionState) -> Self {
        Self {
            state: state.name().to_string(),
            status_text: state.status_text(),
            device_id: state.device().map(ToString::to_string),
            error_kind: state.failure().map(|f| f.kind),
            error_message: state.failure().map(|f| f.message.clone()),
        }
    }
}

/// Current session status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "state": "searching",
    "status_text": "Searching...",
    "device_id": null,
    "error_kind": null,
    "error_message": null,
    "blacklisted": 2,
    "has_target": true
}))]
pub struct SessionStatusResponse {
    /// Current state.
    #[serde(flatten)]
    pub state: StateView,

    /// Devices proven wrong in this session.
    #[schema(example = 2)]
    pub blacklisted: usize,

    /// Whether a target serial number is set.
    #[schema(example = true)]
    pub has_target: bool,
}

impl From<SessionSnapshot> for SessionStatusResponse {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            state: StateView::from(&snapshot.state),
            blacklisted: snapshot.blacklisted,
            has_target: snapshot.has_target,
        }
    }
}

/// Payload of a `state` event on the session stream.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StateChangeEvent {
    /// State entered.
    #[serde(flatten)]
    pub state: StateView,

    /// When the transition was applied.
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub changed_at_utc: DateTime<Utc>,
}

impl From<&StateChange> for StateChangeEvent {
    fn from(change: &StateChange) -> Self {
        Self {
            state: StateView::from(&change.state),
            changed_at_utc: change.changed_at_utc,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the current session status.
#[utoipa::path(
    get,
    path = "/api/session",
    tag = "session",
    operation_id = "getSession",
    summary = "Get session status",
    description = "Returns the current state of the search together with the number \
        of devices already rejected in this session.",
    responses(
        (status = 200, description = "Current session status", body = SessionStatusResponse),
        (status = 503, description = "Bluetooth is not available", body = ErrorResponse)
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
) -> ApiResult<Json<SessionStatusResponse>> {
    let controller = state.controller()?;
    Ok(Json(controller.snapshot().into()))
}

/// Start searching for a peripheral by serial number.
#[utoipa::path(
    post,
    path = "/api/session",
    tag = "session",
    operation_id = "startSession",
    summary = "Start a search",
    description = "Starts scanning for the peripheral reporting `serial_number`. Any \
        search already in progress is stopped first and its blacklist discarded. \
        The search continues in the background; follow it via `GET /api/session` \
        or `GET /api/session/events`.",
    request_body = StartSessionRequest,
    responses(
        (status = 202, description = "Search started", body = SessionStatusResponse),
        (status = 400, description = "Serial number is empty", body = ErrorResponse),
        (status = 503, description = "Bluetooth is not available", body = ErrorResponse)
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionStatusResponse>)> {
    let controller = state.controller()?;
    controller.start(request.serial_number).await?;
    info!("Session started via API");

    Ok((StatusCode::ACCEPTED, Json(controller.snapshot().into())))
}

/// Stop the current search.
#[utoipa::path(
    delete,
    path = "/api/session",
    tag = "session",
    operation_id = "stopSession",
    summary = "Stop the search",
    description = "Cancels any pending scan or connection, clears the target and \
        blacklist, and returns to `idle`. Safe to call in any state.",
    responses(
        (status = 200, description = "Session stopped", body = SessionStatusResponse),
        (status = 503, description = "Bluetooth is not available", body = ErrorResponse)
    )
)]
pub async fn stop_session(
    State(state): State<SharedState>,
) -> ApiResult<Json<SessionStatusResponse>> {
    let controller = state.controller()?;
    controller.stop().await?;
    info!("Session stopped via API");

    Ok(Json(controller.snapshot().into()))
}

/// Stream every state transition as server-sent events.
#[utoipa::path(
    get,
    path = "/api/session/events",
    tag = "session",
    operation_id = "streamSessionEvents",
    summary = "Stream state changes",
    description = "Server-sent event stream. Each transition arrives as a `state` \
        event whose data is a `StateChangeEvent`. A client that falls behind skips \
        the missed transitions and keeps receiving new ones.",
    responses(
        (
            status = 200,
            description = "Event stream",
            content_type = "text/event-stream",
            body = StateChangeEvent
        ),
        (status = 503, description = "Bluetooth is not available", body = ErrorResponse)
    )
)]
pub async fn session_events(
    State(state): State<SharedState>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let receiver = state.controller()?.subscribe();

    let stream = futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(change) => {
                    let event = Event::default()
                        .event("state")
                        .json_data(StateChangeEvent::from(&change))
                        .unwrap_or_else(|e| {
                            warn!(error = %e, "Failed to encode state change");
                            Event::default().comment("encoding failed")
                        });
                    return Some((Ok(event), receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream client lagging");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

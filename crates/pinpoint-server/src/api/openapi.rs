//! OpenAPI specification generation for the pinpoint API.
//!
//! The generated document is served at `/api/openapi.json` and written to
//! the workspace root by the `gen-openapi` binary for client generation.

use axum::Json;
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::session::{SessionStatusResponse, StartSessionRequest, StateChangeEvent, StateView};

/// Serve the OpenAPI specification as JSON.
///
/// This endpoint is available at `/api/openapi.json` and returns the complete
/// OpenAPI 3.0 specification for the pinpoint API.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a pretty-printed string.
/// Used by the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> serde_json::Result<String> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for pinpoint.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "pinpoint API",
        version = "0.1.0",
        description = r#"
# pinpoint API

pinpoint connects to one specific Bluetooth LE peripheral among many that
advertise the same service, by reading its serial number after connecting.

## Overview

1. **Start** a search with `POST /api/session` and the serial number you want.
2. **Follow** it with `GET /api/session` or the `GET /api/session/events` stream.
3. **Stop** it at any time with `DELETE /api/session`.

## Search cycle

- Every advertiser of the configured service is a candidate.
- A candidate is connected, its identity characteristic is read and compared.
- A mismatch is disconnected and never tried again in this session.
- The first match ends the search in `connected`.
- Any connect, read, disconnect or scan error ends the search in `failed`.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local pinpoint server")
    ),
    tags(
        (
            name = "system",
            description = "Health checks and service status"
        ),
        (
            name = "session",
            description = "Start, stop and follow the search for a peripheral"
        )
    ),
    paths(
        // Health endpoints
        super::health::health_check,
        // Session endpoints
        super::session::get_session,
        super::session::start_session,
        super::session::stop_session,
        super::session::session_events,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            // Session types
            StartSessionRequest,
            StateView,
            SessionStatusResponse,
            StateChangeEvent,
            pinpoint_core::ErrorKind,
        )
    )
)]
pub struct ApiDoc;

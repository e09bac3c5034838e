//! # pinpoint-server
//!
//! HTTP server that finds one specific BLE peripheral by serial number.
//!
//! This binary provides:
//! - REST API to start, stop and inspect a search
//! - Server-sent events for every state change
//! - OpenAPI documentation at `/api/openapi.json`
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, with simulated peripherals
//! cargo run --package pinpoint-server --features mock-bluetooth
//!
//! # Production
//! PINPOINT_ENV=production ./pinpoint-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Context;
use pinpoint_core::Config;
use pinpoint_server::state::{spawn_controller, AppState};
use pinpoint_server::{api, logging};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::LogMode::from_env())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting pinpoint-server");

    let config_path = Config::default_path();
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    info!(path = %config_path.display(), "Configuration loaded");

    let addr = config.server.socket_addr()?;
    let controller = spawn_controller(&config.bluetooth).await;
    let state = AppState::new(controller).shared();

    let app = api::create_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Ok(controller) = state.controller() {
        controller.shutdown().await;
    }
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

//! Plain HTTP handlers: health check and viewer-channel discovery.

use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Public health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "gadka-gateway",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Where the viewer channel is currently bound
#[derive(Debug, Serialize)]
pub struct ViewerInfoResponse {
    /// WebSocket URL a viewer client can attach to
    pub url: String,
    /// Bound viewer port (may differ from the configured one when the
    /// listener had to hunt for a free port)
    pub port: u16,
}

/// Discovery endpoint: returns the currently bound viewer-channel address.
pub async fn viewer_info(State(state): State<Arc<AppState>>) -> Json<ViewerInfoResponse> {
    let port = state.viewer_addr.port();
    Json(ViewerInfoResponse {
        url: format!("ws://{}:{}/viewer", state.config.public_host(), port),
        port,
    })
}

//! Route configuration.
//!
//! Two connection classes, two routers: the session router carries the
//! conversational capture channel and the plain HTTP endpoints; the viewer
//! router serves the avatar frame stream on its own listener.

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{api, session_handler, viewer_handler};
use crate::state::AppState;

/// Create the main router: health check, viewer discovery, and the session
/// WebSocket endpoint.
///
/// # Endpoints
///
/// - `GET /` - health check
/// - `GET /viewer-info` - currently bound viewer-channel address
/// - `GET /session` - WebSocket upgrade for the capture channel
pub fn create_session_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/viewer-info", get(api::viewer_info))
        .route("/session", get(session_handler))
        .layer(TraceLayer::new_for_http())
}

/// Create the viewer router, served from the dedicated viewer listener.
///
/// # Endpoint
///
/// `GET /viewer` - WebSocket upgrade for the avatar frame stream
///
/// # Protocol
///
/// After the upgrade the server pushes frames at the configured cadence:
///
/// ```json
/// {"type": "avatar_frame", "animation_state": "talking", "payload": "..."}
/// ```
///
/// Viewers send nothing; closing the socket unregisters the viewer.
pub fn create_viewer_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/viewer", get(viewer_handler))
        .layer(TraceLayer::new_for_http())
}

//! HTTP routes for the relay.
//!
//! The signaling socket and the small meeting API share one listener.
//! Health and metrics live on a separate listener (see `main`).

use std::sync::Arc;

use axum::{routing::get, Router};
use signaling_protocol::TransportConfig;
use tower_http::trace::TraceLayer;

use crate::actors::{ActorMetrics, RelayActorHandle};
use crate::handlers;
use crate::transport;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: RelayActorHandle,
    pub metrics: Arc<ActorMetrics>,
    /// Served verbatim by `GET /api/transport-config`.
    pub transport: TransportConfig,
}

/// Build the public router:
///
/// - `GET /ws` - signaling WebSocket
/// - `GET /api/meetings/:meeting_id` - public meeting summary
/// - `GET /api/transport-config` - ICE servers for clients
/// - `GET /api/status` - relay counters
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(transport::ws_handler))
        .route("/api/meetings/:meeting_id", get(handlers::get_meeting))
        .route("/api/transport-config", get(handlers::get_transport_config))
        .route("/api/status", get(handlers::get_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

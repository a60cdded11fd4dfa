//! Axum router construction for the Observer API.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS middleware enabled for cross-origin dashboard access.

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::get;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router for the Observer server.
///
/// The router includes:
/// - `GET /` -- service status
/// - `GET /ws` -- `WebSocket` push channel
/// - `GET /api/events` -- all retained events
/// - `GET /api/events/{layer}` -- one layer
/// - `GET /api/risk` -- current risk snapshot
/// - `GET /api/layers` -- live counts
/// - `GET /api/data-freshness` -- last commit per layer
/// - `GET /api/hotspots` -- density hotspots
/// - `GET /api/cii` -- country instability index
/// - `GET /api/stream/{layer}` -- recent durable-log entries
///
/// CORS allows any origin unless `state.cors_origins` lists some.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allow_origin(&state.cors_origins))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Status
        .route("/", get(handlers::index))
        // WebSocket
        .route("/ws", get(ws::ws_events))
        // REST API
        .route("/api/events", get(handlers::list_events))
        .route("/api/events/{layer}", get(handlers::layer_events))
        .route("/api/risk", get(handlers::get_risk))
        .route("/api/layers", get(handlers::list_layers))
        .route("/api/data-freshness", get(handlers::data_freshness))
        .route("/api/hotspots", get(handlers::list_hotspots))
        .route("/api/cii", get(handlers::country_instability))
        .route("/api/stream/{layer}", get(handlers::layer_stream))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn allow_origin(origins: &[String]) -> AllowOrigin {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(origin = o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if parsed.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(parsed)
    }
}

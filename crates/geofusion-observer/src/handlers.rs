//! REST API endpoint handlers for the Observer server.
//!
//! All handlers read committed state from the shared [`EventStore`] via
//! [`AppState`]; none of them takes an ingest lock.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Service status and connected client count |
//! | `GET` | `/api/events` | All retained events plus risk |
//! | `GET` | `/api/events/{layer}` | Events of one layer |
//! | `GET` | `/api/risk` | Current risk snapshot |
//! | `GET` | `/api/layers` | Live count per layer |
//! | `GET` | `/api/data-freshness` | Count and last commit time per layer |
//! | `GET` | `/api/hotspots` | Current density hotspots |
//! | `GET` | `/api/stream/{layer}` | Recent durable-log entries (`?count=N`) |
//!
//! [`EventStore`]: geofusion_core::store::EventStore

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use geofusion_types::EventType;
use serde_json::json;

use crate::error::ObserverError;
use crate::state::AppState;

/// Entries returned by `/api/stream/{layer}` when `count` is absent.
const DEFAULT_STREAM_COUNT: usize = 50;

/// Upper bound on `count` for `/api/stream/{layer}`.
const MAX_STREAM_COUNT: usize = 1000;

// ---------------------------------------------------------------------------
// Query parameter structs
// ---------------------------------------------------------------------------

/// Query parameters for the `GET /api/stream/{layer}` endpoint.
#[derive(Debug, serde::Deserialize)]
pub struct StreamQuery {
    /// Number of entries to return (default 50, max 1000).
    pub count: Option<usize>,
}

// ---------------------------------------------------------------------------
// GET / -- service status
// ---------------------------------------------------------------------------

/// Service name, version, status and number of connected push clients.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "name": "Geofusion",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
        "ws_clients": state.store.observer_count().await,
        "started_at": state.started_at,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/events -- all events
// ---------------------------------------------------------------------------

/// Every retained event across all layers, with the risk of the same
/// commit.
pub async fn list_events(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.store.snapshot().await;
    let events = snapshot.all_events();
    Json(json!({
        "total": events.len(),
        "events": events,
        "risk": snapshot.risk,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/events/{layer} -- one layer
// ---------------------------------------------------------------------------

/// Every retained event of one layer.
pub async fn layer_events(
    State(state): State<Arc<AppState>>,
    Path(layer): Path<String>,
) -> Result<impl IntoResponse, ObserverError> {
    let layer = parse_layer(&layer)?;
    let events = state.store.query(layer).await;
    Ok(Json(json!({
        "layer": layer,
        "count": events.len(),
        "events": events,
    })))
}

// ---------------------------------------------------------------------------
// GET /api/risk -- risk snapshot
// ---------------------------------------------------------------------------

/// The current risk snapshot.
pub async fn get_risk(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.risk().await)
}

// ---------------------------------------------------------------------------
// GET /api/layers -- layer counts
// ---------------------------------------------------------------------------

/// Live count per layer, keyed by layer name.
pub async fn list_layers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let layers: BTreeMap<&str, serde_json::Value> = state
        .store
        .layers()
        .await
        .into_iter()
        .map(|s| {
            (
                s.layer.as_str(),
                json!({ "count": s.count, "active": s.active, "derived": s.derived }),
            )
        })
        .collect();
    Json(layers)
}

// ---------------------------------------------------------------------------
// GET /api/data-freshness -- last commit per layer
// ---------------------------------------------------------------------------

/// Count, last commit time and activity per layer.
pub async fn data_freshness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let layers: BTreeMap<&str, serde_json::Value> = state
        .store
        .layers()
        .await
        .into_iter()
        .map(|s| {
            (
                s.layer.as_str(),
                json!({
                    "count": s.count,
                    "last_updated": s.last_updated,
                    "active": s.active,
                }),
            )
        })
        .collect();
    Json(json!({
        "layers": layers,
        "timestamp": Utc::now(),
    }))
}

// ---------------------------------------------------------------------------
// GET /api/hotspots -- derived hotspots
// ---------------------------------------------------------------------------

/// The hotspot view of the latest commit.
pub async fn list_hotspots(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hotspots = state.store.hotspots().await;
    Json(json!({
        "count": hotspots.len(),
        "hotspots": hotspots,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/cii -- country instability index
// ---------------------------------------------------------------------------

/// Instability score of every monitored country, highest first.
pub async fn country_instability(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let countries = state.store.instability().await;
    Json(json!({
        "count": countries.len(),
        "countries": countries,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/stream/{layer} -- recent durable-log entries
// ---------------------------------------------------------------------------

/// The most recent entries appended to a layer's log, oldest first.
///
/// # Query Parameters
///
/// - `count`: entries to return (default 50, max 1000).
pub async fn layer_stream(
    State(state): State<Arc<AppState>>,
    Path(layer): Path<String>,
    Query(params): Query<StreamQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let layer = parse_layer(&layer)?;
    let count = params.count.unwrap_or(DEFAULT_STREAM_COUNT);
    if count > MAX_STREAM_COUNT {
        return Err(ObserverError::InvalidQuery(format!(
            "count must be at most {MAX_STREAM_COUNT}, got {count}"
        )));
    }
    let events = state.log.recent(layer, count).await;
    Ok(Json(json!({
        "layer": layer,
        "count": events.len(),
        "durable": state.log.is_durable(),
        "events": events,
    })))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a layer name from the request path.
fn parse_layer(s: &str) -> Result<EventType, ObserverError> {
    s.parse::<EventType>()
        .map_err(|e| ObserverError::UnknownLayer(e.0))
}

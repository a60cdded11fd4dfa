//! Shared application state for the Observer API server.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use geofusion_core::store::EventStore;
use geofusion_db::EventLog;

/// Default outbound queue per `WebSocket` client.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor. The store
/// owns the observer registry, so connecting a client is a store call.
#[derive(Clone)]
pub struct AppState {
    /// The event store served by every endpoint.
    pub store: Arc<EventStore>,
    /// Durable log behind `/api/stream/{layer}`.
    pub log: Arc<EventLog>,
    /// Messages buffered per `WebSocket` client before it is dropped.
    pub queue_capacity: usize,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
    /// Server start time.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// State over a store and its log, with default queue capacity and
    /// permissive CORS.
    pub fn new(store: Arc<EventStore>, log: Arc<EventLog>) -> Self {
        Self {
            store,
            log,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            cors_origins: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Override the per-client queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Restrict CORS to the given origins.
    #[must_use]
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }
}

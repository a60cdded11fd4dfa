//! Observer API server for the Geofusion engine.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws`) pushing `initial_state`,
//!   `event_batch` and `risk_update` messages from the event store's
//!   distributor
//! - **REST endpoints** for pulling the current state (all events, one
//!   layer, risk, layer summaries, data freshness, hotspots, and the recent
//!   durable-log stream)
//! - **Status root** (`GET /`) with the connected observer count
//!
//! # Architecture
//!
//! Every request reads committed state from the shared [`EventStore`];
//! reads never wait on a deduplication pass. Each `WebSocket` client owns
//! a bounded queue in the store's distributor. A client that stops
//! draining is dropped by the distributor and its socket is closed here.
//!
//! [`EventStore`]: geofusion_core::store::EventStore

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use startup::spawn_observer;
pub use state::AppState;

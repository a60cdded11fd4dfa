//! Error types for the event log.
//!
//! [`DbError`] never escapes [`EventLog`](crate::EventLog): the facade
//! logs it and falls back to memory. It is surfaced by the lower-level
//! [`DragonflyLog`](crate::DragonflyLog) API.

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during engine startup and shutdown.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: geofusion_core::config::ConfigError,
    },

    /// A collector could not be built or registered.
    #[error("collector error: {source}")]
    Collector {
        /// The underlying collector error.
        #[from]
        source: geofusion_core::collector::CollectorError,
    },

    /// Observer API server failed to start.
    #[error("observer error: {source}")]
    Observer {
        /// The underlying server error.
        #[from]
        source: geofusion_observer::ServerError,
    },

    /// An HTTP client could not be constructed.
    #[error("HTTP client error: {message}")]
    Http {
        /// Description of the client failure.
        message: String,
    },
}

//! Event log for the Geofusion engine (`Dragonfly` + in-memory fallback).
//!
//! Every batch the event store commits is appended to a per-layer log.
//! When a `Dragonfly` (Redis-compatible) instance is reachable the log is
//! durable; otherwise a bounded in-memory buffer serves the same read/write
//! contract. Callers cannot tell the two apart except through
//! [`EventLog::is_durable`].
//!
//! ```text
//! EventStore commit
//!     |
//!     +-- append(layer, events) --> EventLog
//!                                     |-- DragonflyLog  (capped list per layer)
//!                                     +-- MemoryLog     (always mirrored)
//! ```
//!
//! # Modules
//!
//! - [`dragonfly`] -- `Dragonfly` list operations
//! - [`memory`] -- bounded in-memory buffer
//! - [`log`] -- the [`EventLog`] facade with transparent fallback, and the
//!   [`DurableLog`] trait its durable backend implements
//! - [`error`] -- shared error types

pub mod dragonfly;
pub mod error;
pub mod log;
pub mod memory;

// Re-export primary types for convenience.
pub use dragonfly::DragonflyLog;
pub use error::DbError;
pub use log::{DurableLog, EventLog};
pub use memory::MemoryLog;

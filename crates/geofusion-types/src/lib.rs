//! Shared type definitions for the Geofusion engine.
//!
//! This crate is the single source of truth for the canonical event model
//! used across the workspace. Types that reach the dashboard are exported
//! to `TypeScript` via `ts-rs`.
//!
//! # Modules
//!
//! - [`enums`] -- Layer enumeration, source priority tiers, instability
//!   signals, rejection reasons
//! - [`ids`] -- Name-based (UUID v5) event identifiers
//! - [`structs`] -- `Event`, `Severity`, `RiskLevel`, `Hotspot`,
//!   `CountryInstability`, grid cells
//! - [`raw`] -- Loosely-typed records produced by collectors
//! - [`messages`] -- Push-channel envelopes sent to observers

pub mod enums;
pub mod ids;
pub mod messages;
pub mod raw;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{EventType, InstabilitySignal, RejectReason, SourcePriority, UnknownEventType};
pub use ids::EventId;
pub use messages::OutboundMessage;
pub use raw::RawRecord;
pub use structs::{
    CellKey, CountryInstability, Event, Hotspot, LayerSummary, RiskLevel, Severity,
};

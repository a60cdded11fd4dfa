//! Fusion and distribution engine for the Geofusion intelligence feed.
//!
//! Raw records from independent collectors flow through one pipeline:
//! normalization, deduplication, storage, derived analysis (hotspots,
//! convergence, risk), and fan-out to connected observers.
//!
//! # Modules
//!
//! - [`collector`] -- [`Collector`] trait, registry, and the polling loop
//!   that drives each collector on its interval.
//! - [`config`] -- Configuration loading from `geofusion-config.yaml` into
//!   strongly-typed structs.
//! - [`convergence`] -- Multi-domain convergence detection per grid cell.
//! - [`dedup`] -- Fingerprint deduplication with semantic tie-breaking.
//! - [`distribution`] -- Bounded per-observer queues and non-blocking
//!   broadcast.
//! - [`geocode`] -- Place-name resolution behind a cache and a timeout.
//! - [`hotspot`] -- Density hotspots over the one-degree grid.
//! - [`instability`] -- Country instability index.
//! - [`normalizer`] -- Raw record validation and canonicalization.
//! - [`pipeline`] -- Per-batch orchestration from raw records to commits.
//! - [`risk`] -- Global DEFCON-style risk level.
//! - [`spatial`] -- Grid index over retained events.
//! - [`store`] -- The [`EventStore`]: layers, derived views, publication.
//! - [`verify`] -- Duplicate verification with fail-open timeouts.
//!
//! [`Collector`]: collector::Collector
//! [`EventStore`]: store::EventStore

pub mod collector;
pub mod config;
pub mod convergence;
pub mod dedup;
pub mod distribution;
pub mod geocode;
pub mod hotspot;
pub mod instability;
pub mod normalizer;
pub mod pipeline;
pub mod risk;
pub mod spatial;
pub mod store;
pub mod verify;

//! Core entity structs: the canonical event, its severity, the global risk
//! snapshot, and the grid-cell views derived from retained events.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use ts_rs::TS;

use crate::enums::{EventType, InstabilitySignal};
use crate::ids::EventId;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Event severity on a 1-5 scale (1 = low, 5 = catastrophic).
///
/// The range is enforced by every constructor and by deserialization, so a
/// `Severity` value is always valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Severity(u8);

impl Severity {
    /// Lowest severity.
    pub const MIN: Self = Self(1);
    /// Highest severity.
    pub const MAX: Self = Self(5);

    /// Build a severity, returning `None` when `value` is outside 1..=5.
    pub const fn new(value: u8) -> Option<Self> {
        if value >= 1 && value <= 5 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Build a severity by clamping `value` into 1..=5.
    pub fn clamped(value: i64) -> Self {
        let v = value.clamp(1, 5);
        // Clamped into 1..=5 above, the conversion cannot fail.
        Self(u8::try_from(v).unwrap_or(1))
    }

    /// Map a metric onto the scale using ascending thresholds: the
    /// severity is one plus the number of thresholds the value reaches.
    ///
    /// `[2.5, 4.0, 5.0, 7.0]` maps magnitude 4.2 to severity 3.
    pub fn from_thresholds(value: f64, thresholds: &[f64]) -> Self {
        let reached = thresholds.iter().take(4).filter(|t| value >= **t).count();
        Self::clamped(i64::try_from(reached).unwrap_or(0).saturating_add(1))
    }

    /// The numeric value (1-5).
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::MIN
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        Self::new(raw).ok_or_else(|| {
            serde::de::Error::custom(format!("severity {raw} outside 1..=5"))
        })
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// The canonical unit of intelligence.
///
/// Created by the normalizer from one raw record and immutable afterwards.
/// A newer version of the same fact is a new `Event` with the same `id`,
/// which replaces the old one in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Event {
    /// Stable identifier derived from source and natural key.
    pub id: EventId,
    /// The layer this event belongs to.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Latitude in degrees, within -90..=90.
    pub latitude: f64,
    /// Longitude in degrees, within -180..=180.
    pub longitude: f64,
    /// Severity 1-5.
    pub severity: Severity,
    /// When the event occurred (not when it was ingested).
    pub timestamp: DateTime<Utc>,
    /// Provenance string (feed or agency name).
    pub source: String,
    /// Short human-readable summary.
    #[serde(default)]
    pub title: String,
    /// Longer human-readable description.
    #[serde(default)]
    pub description: String,
    /// Domain-specific fields (callsign, MMSI, magnitude, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Event {
    /// The 1x1 degree grid cell containing this event.
    pub fn cell(&self) -> CellKey {
        CellKey::of(self.latitude, self.longitude)
    }
}

// ---------------------------------------------------------------------------
// Grid cells and hotspots
// ---------------------------------------------------------------------------

/// Key of a 1x1 degree grid cell: `(floor(lat), floor(lon))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CellKey {
    /// `floor(latitude)`.
    pub lat: i32,
    /// `floor(longitude)`.
    pub lon: i32,
}

impl CellKey {
    /// Cell containing the given coordinates.
    #[allow(clippy::cast_possible_truncation)]
    pub fn of(latitude: f64, longitude: f64) -> Self {
        // Coordinates are validated to +-180, well inside i32.
        Self {
            lat: latitude.floor() as i32,
            lon: longitude.floor() as i32,
        }
    }
}

impl core::fmt::Display for CellKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

/// A grid cell whose event count reached the hotspot threshold.
///
/// Ephemeral: recomputed wholesale after every commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Hotspot {
    /// The grid cell.
    pub cell: CellKey,
    /// Mean latitude of the events in the cell.
    pub centroid_lat: f64,
    /// Mean longitude of the events in the cell.
    pub centroid_lon: f64,
    /// Exact number of retained events in the cell.
    pub count: u32,
    /// Distinct layers present in the cell.
    pub contributing_types: BTreeSet<EventType>,
}

// ---------------------------------------------------------------------------
// Risk
// ---------------------------------------------------------------------------

/// Global DEFCON-style risk snapshot.
///
/// Replaced wholesale on every recomputation; readers never observe a
/// partially updated value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RiskLevel {
    /// 1 = nominal, 5 = critical.
    pub level: u8,
    /// Label for the level (`NOMINAL` .. `CRITICAL`).
    pub label: String,
    /// Display color for the level.
    pub color: String,
    /// Event count per layer that fed the score.
    pub event_counts: BTreeMap<EventType, u64>,
    /// Weighted severity score.
    pub score: f64,
    /// When this snapshot was computed.
    pub updated_at: DateTime<Utc>,
}

impl RiskLevel {
    /// The snapshot reported before any event has been ingested.
    pub fn nominal() -> Self {
        Self {
            level: 1,
            label: String::from("NOMINAL"),
            color: String::from("#00ff88"),
            event_counts: BTreeMap::new(),
            score: 0.0,
            updated_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Country instability
// ---------------------------------------------------------------------------

/// Instability score (0-100) of one monitored country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CountryInstability {
    /// Display name.
    pub country: String,
    /// ISO 3166-1 alpha-2 code.
    pub iso2: String,
    /// Latitude of the country's reference point.
    pub lat: f64,
    /// Longitude of the country's reference point.
    pub lon: f64,
    /// Final score: the weighted signal score, raised to the country floor.
    pub score: f64,
    /// Weighted signal score before the floor.
    pub raw_score: f64,
    /// Whether the floor raised the score.
    pub floor_applied: bool,
    /// `LOW`, `MODERATE`, `ELEVATED`, `HIGH` or `CRITICAL`.
    pub label: String,
    /// Display color for the label.
    pub color: String,
    /// Sub-score (0-100) of every signal bucket.
    pub signals: BTreeMap<InstabilitySignal, f64>,
    /// When the index was computed.
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Layer summaries
// ---------------------------------------------------------------------------

/// Live status of one layer, served by the layer listing endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LayerSummary {
    /// The layer.
    pub layer: EventType,
    /// Number of events currently retained.
    pub count: usize,
    /// Commit time of the last ingestion, `None` while the layer is empty.
    pub last_updated: Option<DateTime<Utc>>,
    /// Whether the layer currently holds events.
    pub active: bool,
    /// Whether the layer is produced by the fusion step.
    pub derived: bool,
}

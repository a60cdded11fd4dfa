//! Enumeration types for the Geofusion engine.
//!
//! The layer enumeration is fixed at compile time: every event belongs to
//! exactly one [`EventType`], and the event store pre-allocates one layer
//! per variant.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

/// The domain (layer) an event belongs to.
///
/// Serialized in `snake_case` (`"military_aircraft"`, `"gdelt_conflict"`)
/// so that layer names on the wire match the dashboard's layer keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EventType {
    /// Seismic events (USGS-style feeds).
    Earthquake,
    /// Thermal anomalies / wildfires.
    Fire,
    /// Generic armed-conflict reports.
    Conflict,
    /// Civil aircraft positions.
    Aircraft,
    /// Aircraft identified as military.
    MilitaryAircraft,
    /// Civil vessel positions.
    Marine,
    /// Vessels identified as military.
    MilitaryMarine,
    /// Naval activity reports.
    Naval,
    /// Cyber attacks and threat-intel pulses.
    Cyber,
    /// Internet / power outages.
    Outage,
    /// Market and economic shocks.
    Economic,
    /// Ground military activity.
    Military,
    /// Satellite passes and launches.
    Satellite,
    /// Uppsala Conflict Data Program events.
    Ucdp,
    /// ACLED conflict events.
    Acled,
    /// Protests and civil unrest.
    Protest,
    /// GDELT-derived conflict mentions.
    GdeltConflict,
    /// Derived: dense grid cells (written only by the fusion step).
    IntelHotspot,
    /// Derived: multi-domain convergence alerts (written only by the fusion step).
    Convergence,
}

impl EventType {
    /// Every layer, in declaration order.
    pub const ALL: [Self; 19] = [
        Self::Earthquake,
        Self::Fire,
        Self::Conflict,
        Self::Aircraft,
        Self::MilitaryAircraft,
        Self::Marine,
        Self::MilitaryMarine,
        Self::Naval,
        Self::Cyber,
        Self::Outage,
        Self::Economic,
        Self::Military,
        Self::Satellite,
        Self::Ucdp,
        Self::Acled,
        Self::Protest,
        Self::GdeltConflict,
        Self::IntelHotspot,
        Self::Convergence,
    ];

    /// Wire name of the layer.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Earthquake => "earthquake",
            Self::Fire => "fire",
            Self::Conflict => "conflict",
            Self::Aircraft => "aircraft",
            Self::MilitaryAircraft => "military_aircraft",
            Self::Marine => "marine",
            Self::MilitaryMarine => "military_marine",
            Self::Naval => "naval",
            Self::Cyber => "cyber",
            Self::Outage => "outage",
            Self::Economic => "economic",
            Self::Military => "military",
            Self::Satellite => "satellite",
            Self::Ucdp => "ucdp",
            Self::Acled => "acled",
            Self::Protest => "protest",
            Self::GdeltConflict => "gdelt_conflict",
            Self::IntelHotspot => "intel_hotspot",
            Self::Convergence => "convergence",
        }
    }

    /// Whether this layer is produced by the fusion step rather than by
    /// collectors. Derived layers never accept external ingestion.
    pub const fn is_derived(self) -> bool {
        matches!(self, Self::IntelHotspot | Self::Convergence)
    }

    /// Iterate over the layers collectors may write to.
    pub fn observed() -> impl Iterator<Item = Self> {
        Self::ALL.into_iter().filter(|t| !t.is_derived())
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| UnknownEventType(s.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Source priority
// ---------------------------------------------------------------------------

/// Trust tier of an event's source, used to break ties between duplicates.
///
/// Ordered: `Osint < Curated < Official`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourcePriority {
    /// Scraped open-source reporting (RSS, social media, news mentions).
    #[default]
    Osint,
    /// Curated aggregators with editorial review.
    Curated,
    /// Official or instrument-backed feeds (USGS, UCDP, NASA).
    Official,
}

// ---------------------------------------------------------------------------
// Instability signals
// ---------------------------------------------------------------------------

/// Signal buckets that feed the country instability index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum InstabilitySignal {
    /// Armed conflict reporting (`conflict`, `ucdp`, `acled`, `gdelt_conflict`).
    Conflict,
    /// Military flights, vessels and movements.
    Military,
    /// Fires and earthquakes.
    Disaster,
    /// Protests.
    Protest,
    /// Cyber incidents.
    Cyber,
}

impl InstabilitySignal {
    /// Every signal, in display order.
    pub const ALL: [Self; 5] = [
        Self::Conflict,
        Self::Military,
        Self::Disaster,
        Self::Protest,
        Self::Cyber,
    ];

    /// The bucket a layer feeds, if any.
    pub const fn of(layer: EventType) -> Option<Self> {
        match layer {
            EventType::Conflict | EventType::Ucdp | EventType::Acled | EventType::GdeltConflict => {
                Some(Self::Conflict)
            }
            EventType::Military | EventType::MilitaryAircraft | EventType::MilitaryMarine => {
                Some(Self::Military)
            }
            EventType::Fire | EventType::Earthquake => Some(Self::Disaster),
            EventType::Protest => Some(Self::Protest),
            EventType::Cyber => Some(Self::Cyber),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Rejection reasons
// ---------------------------------------------------------------------------

/// Why the normalizer refused a raw record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// No coordinates and no geocodable place name.
    UnresolvableLocation,
    /// Latitude or longitude outside the valid range (or not finite).
    InvalidCoordinate,
    /// Timestamp absent or unparsable.
    MissingTimestamp,
    /// The record's type does not name a collector-writable layer.
    UnknownType,
}

impl RejectReason {
    /// Kebab-case label used in logs and reports.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnresolvableLocation => "unresolvable-location",
            Self::InvalidCoordinate => "invalid-coordinate",
            Self::MissingTimestamp => "missing-timestamp",
            Self::UnknownType => "unknown-type",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_through_str() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
        }
    }

    #[test]
    fn serde_name_matches_as_str() {
        for t in EventType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("Earthquake".parse::<EventType>().unwrap(), EventType::Earthquake);
        assert!("volcano".parse::<EventType>().is_err());
    }

    #[test]
    fn derived_layers_are_excluded_from_observed() {
        assert!(EventType::observed().all(|t| !t.is_derived()));
        assert_eq!(EventType::observed().count(), 17);
    }

    #[test]
    fn only_observed_layers_feed_instability_signals() {
        assert_eq!(InstabilitySignal::of(EventType::IntelHotspot), None);
        assert_eq!(InstabilitySignal::of(EventType::Convergence), None);
        assert_eq!(InstabilitySignal::of(EventType::Aircraft), None);
        assert_eq!(InstabilitySignal::of(EventType::Ucdp), Some(InstabilitySignal::Conflict));
        for signal in InstabilitySignal::ALL {
            assert!(EventType::observed().any(|t| InstabilitySignal::of(t) == Some(signal)));
        }
    }

    #[test]
    fn priority_ordering() {
        assert!(SourcePriority::Official > SourcePriority::Curated);
        assert!(SourcePriority::Curated > SourcePriority::Osint);
    }
}

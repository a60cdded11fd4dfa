//! Raw record validation and canonicalization.
//!
//! [`Normalizer::normalize`] turns one [`RawRecord`] into an [`Event`] or a
//! [`Rejection`]. It is deterministic for a given record: the id is derived
//! from provenance and natural key, severity from fixed per-layer rules.
//! The only external call is the geocoder, consulted when the record has no
//! coordinates, and it always goes through the caching, timeout-guarded
//! front so a stalled backend cannot block a batch.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use geofusion_types::{Event, EventId, EventType, RawRecord, RejectReason, Severity};
use serde_json::Value;
use tracing::debug;

use crate::config::SeverityRule;
use crate::geocode::{Coordinates, Geocoder};

const LATITUDE_KEYS: &[&str] = &["latitude", "lat"];
const LONGITUDE_KEYS: &[&str] = &["longitude", "lon", "lng"];
const PLACE_KEYS: &[&str] = &["place", "location", "place_name"];

/// Epoch numbers above this are milliseconds, not seconds.
const EPOCH_MILLIS_CUTOFF: f64 = 1e11;

/// Why a record was not turned into an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Machine-readable reason.
    pub reason: RejectReason,
    /// Human-readable detail for logs.
    pub detail: String,
}

impl Rejection {
    fn new(reason: RejectReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

impl core::fmt::Display for Rejection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)
    }
}

/// Validates raw records and builds canonical events.
pub struct Normalizer {
    rules: BTreeMap<EventType, SeverityRule>,
    geocoder: Arc<dyn Geocoder>,
}

impl Normalizer {
    /// Build a normalizer from per-layer severity rules and a geocoder.
    ///
    /// The geocoder should already be wrapped in a
    /// [`CachedGeocoder`](crate::geocode::CachedGeocoder).
    pub fn new(rules: BTreeMap<EventType, SeverityRule>, geocoder: Arc<dyn Geocoder>) -> Self {
        Self { rules, geocoder }
    }

    /// Normalize one raw record collected for `source_type`.
    ///
    /// The record's own `type` field wins over `source_type`.
    pub async fn normalize(
        &self,
        raw: &RawRecord,
        source_type: EventType,
    ) -> Result<Event, Rejection> {
        let event_type = resolve_type(raw, source_type)?;
        let timestamp = resolve_timestamp(raw)?;
        let Coordinates {
            latitude,
            longitude,
        } = self.resolve_location(raw).await?;

        let source = raw.str_field(&["source"]).unwrap_or("unknown").to_owned();
        let natural_key = match raw.get("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_owned(),
            Some(Value::Number(n)) => n.to_string(),
            _ => raw.canonical_json(),
        };

        Ok(Event {
            id: EventId::derive(&source, &natural_key),
            event_type,
            latitude,
            longitude,
            severity: self.severity(raw, event_type),
            timestamp,
            source,
            title: raw.str_field(&["title"]).unwrap_or_default().to_owned(),
            description: raw.str_field(&["description"]).unwrap_or_default().to_owned(),
            metadata: raw
                .metadata()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
        })
    }

    /// Severity from the layer rule, else the explicit field, else 1.
    fn severity(&self, raw: &RawRecord, event_type: EventType) -> Severity {
        let from_rule = self.rules.get(&event_type).and_then(|rule| {
            let metric = raw
                .get(&rule.field)
                .or_else(|| raw.metadata().and_then(|m| m.get(&rule.field)))
                .and_then(number)?;
            let metric = if rule.absolute { metric.abs() } else { metric };
            Some(Severity::from_thresholds(metric, &rule.thresholds))
        });
        from_rule
            .or_else(|| raw.get("severity").and_then(number).map(clamp_severity))
            .unwrap_or(Severity::MIN)
    }

    async fn resolve_location(&self, raw: &RawRecord) -> Result<Coordinates, Rejection> {
        let lat = raw.first_of(LATITUDE_KEYS);
        let lon = raw.first_of(LONGITUDE_KEYS);

        let coords = match (lat, lon) {
            (Some(lat), Some(lon)) => {
                let (Some(latitude), Some(longitude)) = (number(lat), number(lon)) else {
                    return Err(Rejection::new(
                        RejectReason::InvalidCoordinate,
                        format!("non-numeric coordinates ({lat}, {lon})"),
                    ));
                };
                Coordinates {
                    latitude,
                    longitude,
                }
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(Rejection::new(
                    RejectReason::InvalidCoordinate,
                    "only one of latitude/longitude present",
                ));
            }
            (None, None) => self.geocode(raw).await?,
        };

        validate_coordinates(coords)?;
        Ok(coords)
    }

    async fn geocode(&self, raw: &RawRecord) -> Result<Coordinates, Rejection> {
        let Some(place) = raw.str_field(PLACE_KEYS) else {
            return Err(Rejection::new(
                RejectReason::UnresolvableLocation,
                "no coordinates and no place name",
            ));
        };
        match self.geocoder.resolve(place).await {
            Ok(Some(coords)) => {
                debug!(place, lat = coords.latitude, lon = coords.longitude, "Geocoded place name");
                Ok(coords)
            }
            Ok(None) => Err(Rejection::new(
                RejectReason::UnresolvableLocation,
                format!("place not found: {place}"),
            )),
            Err(e) => Err(Rejection::new(
                RejectReason::UnresolvableLocation,
                format!("geocoding {place} failed: {e}"),
            )),
        }
    }
}

fn resolve_type(raw: &RawRecord, source_type: EventType) -> Result<EventType, Rejection> {
    let event_type = match raw.str_field(&["type"]) {
        Some(name) => name
            .parse::<EventType>()
            .map_err(|e| Rejection::new(RejectReason::UnknownType, e.to_string()))?,
        None => source_type,
    };
    if event_type.is_derived() {
        return Err(Rejection::new(
            RejectReason::UnknownType,
            format!("{event_type} is produced by the fusion step"),
        ));
    }
    Ok(event_type)
}

fn resolve_timestamp(raw: &RawRecord) -> Result<DateTime<Utc>, Rejection> {
    let value = raw
        .first_of(&["timestamp", "time"])
        .ok_or_else(|| Rejection::new(RejectReason::MissingTimestamp, "no timestamp"))?;
    parse_timestamp(value).ok_or_else(|| {
        Rejection::new(
            RejectReason::MissingTimestamp,
            format!("unparsable timestamp {value}"),
        )
    })
}

/// Parse an RFC 3339 string, a naive ISO datetime (taken as UTC) or an epoch
/// number (seconds, or milliseconds above 10^11).
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .or_else(|_naive| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                        .map(|naive| naive.and_utc())
                        .ok()
                })
                .or_else(|| s.parse::<f64>().ok().and_then(from_epoch))
        }
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let millis = if value > EPOCH_MILLIS_CUTOFF {
        value
    } else {
        value * 1000.0
    };
    // Finite and non-negative; out-of-range values saturate and are then
    // refused by chrono.
    DateTime::from_timestamp_millis(millis.round() as i64)
}

fn validate_coordinates(coords: Coordinates) -> Result<(), Rejection> {
    let Coordinates {
        latitude,
        longitude,
    } = coords;
    let valid = latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude);
    if valid {
        Ok(())
    } else {
        Err(Rejection::new(
            RejectReason::InvalidCoordinate,
            format!("({latitude}, {longitude}) out of range"),
        ))
    }
}

/// A JSON number, or a string holding one.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn clamp_severity(value: f64) -> Severity {
    if value.is_nan() {
        return Severity::MIN;
    }
    // `as` saturates, and `clamped` bounds the result to 1..=5.
    Severity::clamped(value.round() as i64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::FusionConfig;
    use crate::geocode::{CachedGeocoder, GazetteerGeocoder};

    fn normalizer() -> Normalizer {
        let config = FusionConfig::default();
        let table = BTreeMap::from([(String::from("Kyiv"), [50.45, 30.52])]);
        let geocoder = CachedGeocoder::new(
            Arc::new(GazetteerGeocoder::new(&table)),
            std::time::Duration::from_secs(1),
        );
        Normalizer::new(config.severity, Arc::new(geocoder))
    }

    fn raw(value: Value) -> RawRecord {
        RawRecord::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn normalizes_a_complete_record() {
        let record = raw(json!({
            "id": "us7000abcd",
            "latitude": 34.2,
            "longitude": -117.5,
            "magnitude": 5.4,
            "timestamp": "2026-03-01T12:00:00Z",
            "source": "USGS",
            "title": "M5.4 - Southern California",
            "metadata": {"depth_km": 8.1}
        }));
        let event = normalizer().normalize(&record, EventType::Earthquake).await.unwrap();
        assert_eq!(event.event_type, EventType::Earthquake);
        assert_eq!(event.severity.get(), 4);
        assert_eq!(event.source, "USGS");
        assert_eq!(event.id, EventId::derive("USGS", "us7000abcd"));
        assert_eq!(event.metadata.get("depth_km"), Some(&json!(8.1)));
    }

    #[tokio::test]
    async fn identical_records_get_identical_ids() {
        let n = normalizer();
        let record = raw(json!({"lat": 1.0, "lon": 2.0, "timestamp": 1_700_000_000}));
        let a = n.normalize(&record, EventType::Cyber).await.unwrap();
        let b = n.normalize(&record.clone(), EventType::Cyber).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn record_type_overrides_source_type() {
        let record = raw(json!({"type": "military_aircraft", "lat": 1, "lng": 2, "time": 1_700_000_000_000_i64}));
        let event = normalizer().normalize(&record, EventType::Aircraft).await.unwrap();
        assert_eq!(event.event_type, EventType::MilitaryAircraft);
        assert_eq!(event.timestamp.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn rejects_unknown_and_derived_types() {
        let n = normalizer();
        let unknown = raw(json!({"type": "volcano", "lat": 1, "lon": 2, "timestamp": 1}));
        let derived = raw(json!({"type": "convergence", "lat": 1, "lon": 2, "timestamp": 1}));
        for record in [unknown, derived] {
            let rejection = n.normalize(&record, EventType::Fire).await.unwrap_err();
            assert_eq!(rejection.reason, RejectReason::UnknownType);
        }
    }

    #[tokio::test]
    async fn rejects_out_of_range_coordinates() {
        let n = normalizer();
        for (lat, lon) in [(91.0, 0.0), (0.0, -180.5), (f64::MAX, 0.0)] {
            let record = raw(json!({"lat": lat, "lon": lon, "timestamp": 1}));
            let rejection = n.normalize(&record, EventType::Fire).await.unwrap_err();
            assert_eq!(rejection.reason, RejectReason::InvalidCoordinate);
        }
        let record = raw(json!({"lat": "north", "lon": 3, "timestamp": 1}));
        let rejection = n.normalize(&record, EventType::Fire).await.unwrap_err();
        assert_eq!(rejection.reason, RejectReason::InvalidCoordinate);
    }

    #[tokio::test]
    async fn geocodes_place_names_when_coordinates_are_absent() {
        let n = normalizer();
        let record = raw(json!({"place": "kyiv", "timestamp": "2026-03-01T12:00:00Z"}));
        let event = n.normalize(&record, EventType::Conflict).await.unwrap();
        assert!((event.latitude - 50.45).abs() < 1e-9);

        let record = raw(json!({"place": "Atlantis", "timestamp": "2026-03-01T12:00:00Z"}));
        let rejection = n.normalize(&record, EventType::Conflict).await.unwrap_err();
        assert_eq!(rejection.reason, RejectReason::UnresolvableLocation);

        let record = raw(json!({"timestamp": "2026-03-01T12:00:00Z"}));
        let rejection = n.normalize(&record, EventType::Conflict).await.unwrap_err();
        assert_eq!(rejection.reason, RejectReason::UnresolvableLocation);
    }

    #[tokio::test]
    async fn rejects_missing_or_garbage_timestamps() {
        let n = normalizer();
        for record in [
            raw(json!({"lat": 1, "lon": 1})),
            raw(json!({"lat": 1, "lon": 1, "timestamp": "yesterday"})),
        ] {
            let rejection = n.normalize(&record, EventType::Fire).await.unwrap_err();
            assert_eq!(rejection.reason, RejectReason::MissingTimestamp);
        }
    }

    #[tokio::test]
    async fn severity_falls_back_to_explicit_then_minimum() {
        let n = normalizer();
        let explicit = raw(json!({"lat": 1, "lon": 1, "timestamp": 1, "severity": 9}));
        let event = n.normalize(&explicit, EventType::Cyber).await.unwrap();
        assert_eq!(event.severity, Severity::MAX);

        let bare = raw(json!({"lat": 1, "lon": 1, "timestamp": 1}));
        let event = n.normalize(&bare, EventType::Cyber).await.unwrap();
        assert_eq!(event.severity, Severity::MIN);

        // Rule metrics may live in metadata and are compared by magnitude
        // when the rule says so.
        let market = raw(json!({"lat": 1, "lon": 1, "timestamp": 1, "metadata": {"change_percent": "-2.4"}}));
        let event = n.normalize(&market, EventType::Economic).await.unwrap();
        assert_eq!(event.severity.get(), 4);
    }

    #[test]
    fn parses_timestamp_formats() {
        let expected = 1_767_268_800;
        for value in [
            json!("2026-01-01T12:00:00Z"),
            json!("2026-01-01T14:00:00+02:00"),
            json!("2026-01-01 12:00:00"),
            json!(expected),
            json!(1_767_268_800_000_i64),
            json!("1767268800"),
        ] {
            assert_eq!(parse_timestamp(&value).unwrap().timestamp(), expected, "{value}");
        }
        assert!(parse_timestamp(&json!(-5)).is_none());
        assert!(parse_timestamp(&json!(true)).is_none());
    }
}

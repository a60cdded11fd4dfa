//! Density hotspots.
//!
//! A hotspot is a grid cell holding at least `threshold` retained events of
//! the considered layers. The set is recomputed wholesale from a
//! [`SpatialIndex`] on every commit. Each hotspot is also materialised as
//! an `intel_hotspot` event so it can travel the same channels as
//! collected events.

use std::collections::BTreeSet;

use geofusion_types::{CellKey, Event, EventId, EventType, Hotspot, Severity};
use serde_json::{Value, json};

use crate::spatial::{Cell, SpatialIndex};

/// Contributing events listed in a hotspot event's metadata.
const MAX_CONTRIBUTING: usize = 10;

/// Source string of synthesized hotspot events.
pub const HOTSPOT_SOURCE: &str = "geofusion:hotspot";

/// Cells of `index` whose count reaches `threshold`, in cell order.
pub fn compute_hotspots(index: &SpatialIndex<'_>, threshold: u32) -> Vec<Hotspot> {
    index
        .cells()
        .filter_map(|(key, cell)| {
            let count = u32::try_from(cell.count()).unwrap_or(u32::MAX);
            if count < threshold {
                return None;
            }
            let (centroid_lat, centroid_lon) = cell.centroid()?;
            Some(Hotspot {
                cell: key,
                centroid_lat,
                centroid_lon,
                count,
                contributing_types: cell.types(),
            })
        })
        .collect()
}

/// Severity of a hotspot: type diversity first, then density.
pub fn hotspot_severity(n_types: usize, count: u32) -> Severity {
    let level = match (n_types, count) {
        (4.., _) => 5,
        (3, _) | (_, 10..) => 4,
        (_, 5..) => 3,
        _ => 2,
    };
    Severity::clamped(level)
}

/// Build the `intel_hotspot` event describing `hotspot`.
///
/// The id depends only on the cell, so a persisting hotspot keeps its id
/// from one cycle to the next. The timestamp is that of the newest member.
pub fn hotspot_event(hotspot: &Hotspot, cell: &Cell<'_>) -> Option<Event> {
    let timestamp = cell.events().iter().map(|e| e.timestamp).max()?;
    let n_types = hotspot.contributing_types.len();
    let breakdown = cell.type_breakdown();
    let types: Vec<&str> = hotspot.contributing_types.iter().map(|t| t.as_str()).collect();

    let description = breakdown
        .iter()
        .map(|(t, n)| format!("{t}: {n}"))
        .collect::<Vec<_>>()
        .join(", ");

    let contributing: Vec<Value> = cell
        .events()
        .iter()
        .take(MAX_CONTRIBUTING)
        .map(|e| {
            json!({
                "id": e.id,
                "type": e.event_type,
                "title": e.title,
                "source": e.source,
                "severity": e.severity,
            })
        })
        .collect();

    let metadata = [
        ("source_types", json!(types)),
        ("source_type_count", json!(n_types)),
        ("total_events", json!(hotspot.count)),
        ("type_breakdown", json!(breakdown)),
        ("contributing_events", Value::Array(contributing)),
        ("grid_lat", json!(hotspot.cell.lat)),
        ("grid_lon", json!(hotspot.cell.lon)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v))
    .collect();

    Some(Event {
        id: hotspot_id(hotspot.cell),
        event_type: EventType::IntelHotspot,
        latitude: hotspot.centroid_lat,
        longitude: hotspot.centroid_lon,
        severity: hotspot_severity(n_types, hotspot.count),
        timestamp,
        source: HOTSPOT_SOURCE.to_owned(),
        title: format!("Intel hotspot: {} events across {n_types} layers", hotspot.count),
        description: format!("{} events from {}: {description}", hotspot.count, types.join(", ")),
        metadata,
    })
}

/// Stable id of the hotspot event for `cell`.
pub fn hotspot_id(cell: CellKey) -> EventId {
    EventId::for_cell(EventType::IntelHotspot, cell, &BTreeSet::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::spatial::tests::at;

    #[test]
    fn threshold_is_inclusive() {
        let mut events: Vec<Event> = (0..5)
            .map(|i| at(EventType::Fire, &format!("in-{i}"), 34.5, -117.5, 0))
            .collect();
        events.extend((0..4).map(|i| at(EventType::Fire, &format!("out-{i}"), 10.5, 10.5, 0)));

        let index = SpatialIndex::build(&events);
        let hotspots = compute_hotspots(&index, 5);
        assert_eq!(hotspots.len(), 1);
        let hs = hotspots.first().unwrap();
        assert_eq!(hs.cell, CellKey { lat: 34, lon: -118 });
        assert_eq!(hs.count, 5);
    }

    #[test]
    fn counts_are_exact_when_every_cell_qualifies() {
        let events: Vec<Event> = (0..23)
            .map(|i| {
                let lat = f64::from(i % 3) + 0.5;
                at(EventType::Outage, &i.to_string(), lat, 0.5, 0)
            })
            .collect();
        let index = SpatialIndex::build(&events);
        let hotspots = compute_hotspots(&index, 1);
        let sum: u32 = hotspots.iter().map(|h| h.count).sum();
        assert_eq!(usize::try_from(sum).unwrap(), events.len());
    }

    #[test]
    fn severity_bands() {
        assert_eq!(hotspot_severity(4, 5).get(), 5);
        assert_eq!(hotspot_severity(3, 5).get(), 4);
        assert_eq!(hotspot_severity(1, 10).get(), 4);
        assert_eq!(hotspot_severity(2, 6).get(), 3);
        assert_eq!(hotspot_severity(1, 1).get(), 2);
    }

    #[test]
    fn hotspot_event_is_stable_per_cell() {
        let events: Vec<Event> = (0..6)
            .map(|i| at(EventType::Earthquake, &i.to_string(), 34.5, -117.5, i))
            .collect();
        let index = SpatialIndex::build(&events);
        let hs = compute_hotspots(&index, 5).pop().unwrap();
        let cell = index.cell(hs.cell).unwrap();
        let event = hotspot_event(&hs, cell).unwrap();

        assert_eq!(event.id, hotspot_id(hs.cell));
        assert_eq!(event.event_type, EventType::IntelHotspot);
        assert_eq!(event.severity.get(), 3);
        assert_eq!(event.metadata.get("total_events"), Some(&json!(6)));
        assert_eq!(event.metadata.get("grid_lon"), Some(&json!(-118)));
        assert_eq!(event.timestamp, events.last().unwrap().timestamp);
    }
}

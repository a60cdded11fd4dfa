//! Multi-domain convergence detection.
//!
//! A cell converges when events of at least `min_types` distinct layers
//! fall inside it within one time window. Any window over the cell's
//! retained events counts: a later report of some other layer does not
//! hide an earlier convergence, which holds until its members are evicted
//! from the store. The alert describes the window with the most distinct
//! layers, the latest such window on a tie.
//!
//! The alert id is derived from the cell and the contributing type set:
//! while the same condition holds, every cycle produces the same id and
//! the alert is refreshed in place rather than re-raised.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use geofusion_types::{CellKey, Event, EventId, EventType, Severity};
use serde_json::json;

use crate::spatial::SpatialIndex;

/// Source string of synthesized convergence events.
pub const CONVERGENCE_SOURCE: &str = "geofusion:convergence";

/// Convergence detection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceRule {
    /// Distinct layers required in one cell.
    pub min_types: usize,
    /// Members must lie within this span of each other.
    pub window: chrono::Duration,
}

/// `min(100, n_types * 25 + min(n_events * 2, 50))`.
pub fn convergence_score(n_types: usize, n_events: usize) -> u32 {
    let types = n_types.saturating_mul(25);
    let density = n_events.saturating_mul(2).min(50);
    u32::try_from(types.saturating_add(density).min(100)).unwrap_or(100)
}

/// Severity bands of the convergence score.
pub fn convergence_severity(score: u32) -> Severity {
    let level = match score {
        90.. => 5,
        70..=89 => 4,
        50..=69 => 3,
        30..=49 => 2,
        _ => 1,
    };
    Severity::clamped(level)
}

/// Every convergence alert present in `index`, in cell order.
///
/// `index` must only contain events of the layers under consideration.
pub fn detect(index: &SpatialIndex<'_>, rule: ConvergenceRule) -> Vec<Event> {
    index
        .cells()
        .filter_map(|(key, cell)| {
            let members = densest_window(cell.events(), rule.window)?;
            let types: BTreeSet<EventType> = members.iter().map(|e| e.event_type).collect();
            if types.len() < rule.min_types {
                return None;
            }
            let newest = members.iter().map(|e| e.timestamp).max()?;
            Some(alert(key, &members, &types, newest))
        })
        .collect()
}

/// Members of the `window`-long span holding the most distinct layers,
/// preferring the latest span on a tie. `None` for an empty cell.
fn densest_window<'a>(events: &[&'a Event], window: chrono::Duration) -> Option<Vec<&'a Event>> {
    let mut sorted = events.to_vec();
    sorted.sort_by_key(|e| (e.timestamp, e.id));

    let mut counts = BTreeMap::<EventType, usize>::new();
    let mut left = 0_usize;
    // (distinct layers, first index, last index)
    let mut best: Option<(usize, usize, usize)> = None;

    for (right, event) in sorted.iter().enumerate() {
        let n = counts.entry(event.event_type).or_default();
        *n = n.saturating_add(1);

        while let Some(oldest) = sorted.get(left) {
            if event.timestamp.signed_duration_since(oldest.timestamp) <= window {
                break;
            }
            let remaining = counts.get_mut(&oldest.event_type).map(|n| {
                *n = n.saturating_sub(1);
                *n
            });
            if remaining == Some(0) {
                counts.remove(&oldest.event_type);
            }
            left = left.saturating_add(1);
        }

        let n_types = counts.len();
        if best.is_none_or(|(most, _, _)| n_types >= most) {
            best = Some((n_types, left, right));
        }
    }

    let (_, first, last) = best?;
    sorted.get(first..=last).map(<[&Event]>::to_vec)
}

#[allow(clippy::cast_precision_loss)]
fn alert(
    key: CellKey,
    members: &[&Event],
    types: &BTreeSet<EventType>,
    newest: DateTime<Utc>,
) -> Event {
    let n_events = members.len();
    let n_types = types.len();
    let score = convergence_score(n_types, n_events);

    // Member counts are bounded far below 2^52.
    let n = n_events.max(1) as f64;
    let lat = members.iter().map(|e| e.latitude).sum::<f64>() / n;
    let lon = members.iter().map(|e| e.longitude).sum::<f64>() / n;

    let mut breakdown = BTreeMap::<EventType, usize>::new();
    for e in members {
        let n = breakdown.entry(e.event_type).or_default();
        *n = n.saturating_add(1);
    }
    let breakdown_text = breakdown
        .iter()
        .map(|(t, n)| format!("{t}:{n}"))
        .collect::<Vec<_>>()
        .join(", ");

    let region = members
        .iter()
        .find_map(|e| {
            ["country_code", "country", "region"].iter().find_map(|k| {
                e.metadata
                    .get(*k)
                    .and_then(serde_json::Value::as_str)
                    .filter(|s| !s.is_empty())
            })
        })
        .map_or_else(|| format!("{lat:.1}, {lon:.1}"), str::to_owned);

    let type_names: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
    let member_ids: Vec<EventId> = members.iter().map(|e| e.id).collect();

    let metadata = [
        ("contributing_types", json!(type_names)),
        ("member_event_ids", json!(member_ids)),
        ("score", json!(score)),
        ("n_types", json!(n_types)),
        ("n_events", json!(n_events)),
        ("type_breakdown", json!(breakdown)),
        ("grid_lat", json!(key.lat)),
        ("grid_lon", json!(key.lon)),
        ("region_label", json!(region)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v))
    .collect();

    Event {
        id: EventId::for_cell(EventType::Convergence, key, types),
        event_type: EventType::Convergence,
        latitude: lat,
        longitude: lon,
        severity: convergence_severity(score),
        timestamp: newest,
        source: CONVERGENCE_SOURCE.to_owned(),
        title: format!("Multi-domain convergence: {n_types} signal types"),
        description: format!(
            "{n_events} events ({breakdown_text}) converging near {region}. Convergence score: {score}/100"
        ),
        metadata,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::spatial::tests::at;

    fn rule() -> ConvergenceRule {
        ConvergenceRule {
            min_types: 3,
            window: chrono::Duration::minutes(15),
        }
    }

    #[test]
    fn two_types_do_not_alert_three_do() {
        let mut events = vec![
            at(EventType::Cyber, "c", 34.5, -117.5, 0),
            at(EventType::Conflict, "k", 34.6, -117.6, 1),
        ];
        assert!(detect(&SpatialIndex::build(&events), rule()).is_empty());

        events.push(at(EventType::Aircraft, "a", 34.4, -117.4, 2));
        let alerts = detect(&SpatialIndex::build(&events), rule());
        assert_eq!(alerts.len(), 1);
        let alert = alerts.first().unwrap();
        assert_eq!(
            alert.metadata.get("contributing_types"),
            Some(&json!(["conflict", "aircraft", "cyber"]))
        );
        let members = alert.metadata.get("member_event_ids").and_then(|v| v.as_array());
        assert_eq!(members.map(Vec::len), Some(3));

        // Back to two types: the alert is gone.
        events.pop();
        assert!(detect(&SpatialIndex::build(&events), rule()).is_empty());
    }

    #[test]
    fn alert_id_is_stable_for_the_same_condition() {
        let events = vec![
            at(EventType::Cyber, "c", 34.5, -117.5, 0),
            at(EventType::Conflict, "k", 34.6, -117.6, 1),
            at(EventType::Fire, "f", 34.4, -117.4, 2),
        ];
        let first = detect(&SpatialIndex::build(&events), rule());
        let mut more = events.clone();
        more.push(at(EventType::Fire, "f2", 34.3, -117.3, 3));
        let second = detect(&SpatialIndex::build(&more), rule());
        assert_eq!(first.first().map(|e| e.id), second.first().map(|e| e.id));
    }

    #[test]
    fn stale_members_fall_out_of_the_window() {
        let events = vec![
            at(EventType::Cyber, "c", 34.5, -117.5, 0),
            at(EventType::Conflict, "k", 34.6, -117.6, 30),
            at(EventType::Fire, "f", 34.4, -117.4, 31),
        ];
        assert!(detect(&SpatialIndex::build(&events), rule()).is_empty());
    }

    #[test]
    fn later_report_of_another_layer_does_not_hide_convergence() {
        let mut events = vec![
            at(EventType::Cyber, "c", 34.5, -117.5, 0),
            at(EventType::Conflict, "k", 34.6, -117.6, 1),
            at(EventType::Fire, "f", 34.4, -117.4, 2),
        ];
        let before = detect(&SpatialIndex::build(&events), rule());
        assert_eq!(before.len(), 1);

        events.push(at(EventType::Aircraft, "a", 34.3, -117.3, 60));
        let after = detect(&SpatialIndex::build(&events), rule());
        assert_eq!(after.len(), 1);
        let alert = after.first().unwrap();
        assert_eq!(alert.id, before.first().unwrap().id);
        assert_eq!(
            alert.metadata.get("contributing_types"),
            Some(&json!(["fire", "conflict", "cyber"]))
        );
        assert_eq!(alert.metadata.get("n_events"), Some(&json!(3)));
    }

    #[test]
    fn widest_window_wins_and_latest_breaks_ties() {
        let events = vec![
            // Early window: three layers.
            at(EventType::Cyber, "c1", 34.5, -117.5, 0),
            at(EventType::Conflict, "k1", 34.5, -117.5, 1),
            at(EventType::Fire, "f1", 34.5, -117.5, 2),
            // Later window: four layers.
            at(EventType::Cyber, "c2", 34.5, -117.5, 100),
            at(EventType::Conflict, "k2", 34.5, -117.5, 101),
            at(EventType::Fire, "f2", 34.5, -117.5, 102),
            at(EventType::Outage, "o2", 34.5, -117.5, 103),
        ];
        let alert = detect(&SpatialIndex::build(&events), rule()).pop().unwrap();
        assert_eq!(alert.metadata.get("n_types"), Some(&json!(4)));

        let tied = vec![
            at(EventType::Cyber, "c1", 34.5, -117.5, 0),
            at(EventType::Conflict, "k1", 34.5, -117.5, 1),
            at(EventType::Fire, "f1", 34.5, -117.5, 2),
            at(EventType::Cyber, "c2", 34.5, -117.5, 100),
            at(EventType::Conflict, "k2", 34.5, -117.5, 101),
            at(EventType::Fire, "f2", 34.5, -117.5, 102),
        ];
        let alert = detect(&SpatialIndex::build(&tied), rule()).pop().unwrap();
        assert_eq!(alert.timestamp, tied.last().unwrap().timestamp);
    }

    #[test]
    fn score_and_severity() {
        assert_eq!(convergence_score(3, 3), 81);
        assert_eq!(convergence_score(4, 40), 100);
        assert_eq!(convergence_severity(81).get(), 4);
        assert_eq!(convergence_severity(90).get(), 5);
        assert_eq!(convergence_severity(29).get(), 1);
    }

    #[test]
    fn region_label_prefers_metadata() {
        let mut tagged = at(EventType::Cyber, "c", 34.5, -117.5, 0);
        tagged.metadata.insert(String::from("country"), json!("US"));
        let events = vec![
            at(EventType::Conflict, "k", 34.6, -117.6, 1),
            tagged,
            at(EventType::Fire, "f", 34.4, -117.4, 2),
        ];
        let alert = detect(&SpatialIndex::build(&events), rule()).pop().unwrap();
        assert_eq!(alert.metadata.get("region_label"), Some(&json!("US")));
    }
}

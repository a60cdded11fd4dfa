//! Country instability index (CII).
//!
//! Each monitored country gets a 0-100 score built from the retained events
//! near its reference point. Events are grouped into five signal buckets;
//! each bucket scores `ln(1 + n) / ln(1 + 30) * 100` for its `n` nearby
//! events (capped at 30), scaled by the bucket's mean severity, and the
//! buckets are combined with fixed weights. Historically volatile countries
//! have a floor so a quiet feed does not read as stability.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use geofusion_types::{CountryInstability, Event, InstabilitySignal};

/// A monitored country: `(name, iso2, lat, lon)`.
pub type Country = (&'static str, &'static str, f64, f64);

/// Countries scored on every recomputation.
pub const MONITORED_COUNTRIES: [Country; 22] = [
    ("Ukraine", "UA", 49.0, 31.0),
    ("Russia", "RU", 61.0, 105.0),
    ("China", "CN", 35.0, 105.0),
    ("USA", "US", 38.0, -97.0),
    ("Israel", "IL", 31.5, 34.8),
    ("Gaza", "PS", 31.4, 34.3),
    ("Iran", "IR", 32.0, 53.0),
    ("Syria", "SY", 35.0, 38.0),
    ("Yemen", "YE", 15.5, 48.0),
    ("Sudan", "SD", 15.0, 30.0),
    ("Myanmar", "MM", 21.0, 96.0),
    ("DRC", "CD", -2.0, 25.0),
    ("Somalia", "SO", 6.0, 46.0),
    ("Ethiopia", "ET", 9.0, 40.0),
    ("Mali", "ML", 17.0, -4.0),
    ("Nigeria", "NG", 10.0, 8.0),
    ("Venezuela", "VE", 8.0, -66.0),
    ("North Korea", "KP", 40.0, 127.0),
    ("Pakistan", "PK", 30.0, 70.0),
    ("Afghanistan", "AF", 33.0, 66.0),
    ("Haiti", "HT", 19.0, -72.0),
    ("Libya", "LY", 27.0, 17.0),
];

/// Minimum score of historically volatile countries.
const FLOORS: [(&str, f64); 10] = [
    ("Ukraine", 55.0),
    ("Gaza", 60.0),
    ("Syria", 50.0),
    ("Yemen", 45.0),
    ("Sudan", 45.0),
    ("Somalia", 40.0),
    ("DRC", 40.0),
    ("Afghanistan", 40.0),
    ("Myanmar", 35.0),
    ("North Korea", 30.0),
];

/// Events within this many degrees of a reference point count toward it.
pub const EVENT_RADIUS_DEG: f64 = 5.0;

/// Bucket sizes beyond this saturate the count term.
const COUNT_CAP: u32 = 30;

/// `(lower bound, label, color)`, highest first.
const LABELS: [(f64, &str, &str); 5] = [
    (75.0, "CRITICAL", "#ff2244"),
    (50.0, "HIGH", "#ff8800"),
    (30.0, "ELEVATED", "#ffcc00"),
    (15.0, "MODERATE", "#88cc00"),
    (0.0, "LOW", "#00cc88"),
];

/// Weight of a signal in the composite score. The weights sum to 1.
pub const fn weight(signal: InstabilitySignal) -> f64 {
    match signal {
        InstabilitySignal::Conflict => 0.30,
        InstabilitySignal::Military | InstabilitySignal::Protest => 0.20,
        InstabilitySignal::Disaster | InstabilitySignal::Cyber => 0.15,
    }
}

/// The floor of a country, 0 when it has none.
pub fn floor(country: &str) -> f64 {
    FLOORS
        .iter()
        .find(|(name, _)| *name == country)
        .map_or(0.0, |(_, floor)| *floor)
}

/// Label and display color of a score.
pub fn label_for(score: f64) -> (&'static str, &'static str) {
    LABELS
        .iter()
        .find(|(bound, _, _)| score >= *bound)
        .map_or(("LOW", "#00cc88"), |(_, label, color)| (*label, *color))
}

/// Sub-score (0-100) of one bucket's nearby events.
pub fn signal_score(events: &[&Event]) -> f64 {
    if events.is_empty() {
        return 0.0;
    }
    let n = u32::try_from(events.len()).unwrap_or(COUNT_CAP).min(COUNT_CAP);
    let count_term = f64::from(n).ln_1p() / f64::from(COUNT_CAP).ln_1p() * 100.0;

    let total: u32 = events
        .iter()
        .map(|e| u32::from(e.severity.get()))
        .fold(0, u32::saturating_add);
    let members = u32::try_from(events.len()).unwrap_or(u32::MAX);
    let mean_severity = f64::from(total) / f64::from(members);
    // Severity 1..5 maps to a factor of 0.76..1.4.
    let severity_factor = (mean_severity / 5.0).mul_add(0.8, 0.6);
    (count_term * severity_factor).min(100.0)
}

fn within_radius(event: &Event, lat: f64, lon: f64) -> bool {
    (event.latitude - lat).hypot(event.longitude - lon) <= EVENT_RADIUS_DEG
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Score every monitored country, highest score first.
///
/// Derived layers and layers outside the signal buckets are ignored.
pub fn compute<'a>(
    events: impl IntoIterator<Item = &'a Event>,
    now: DateTime<Utc>,
) -> Vec<CountryInstability> {
    let mut buckets: BTreeMap<InstabilitySignal, Vec<&Event>> = BTreeMap::new();
    for event in events {
        if let Some(signal) = InstabilitySignal::of(event.event_type) {
            buckets.entry(signal).or_default().push(event);
        }
    }

    let mut scores: Vec<CountryInstability> = MONITORED_COUNTRIES
        .iter()
        .map(|&(country, iso2, lat, lon)| {
            let signals: BTreeMap<InstabilitySignal, f64> = InstabilitySignal::ALL
                .into_iter()
                .map(|signal| {
                    let nearby: Vec<&Event> = buckets
                        .get(&signal)
                        .into_iter()
                        .flatten()
                        .copied()
                        .filter(|e| within_radius(e, lat, lon))
                        .collect();
                    (signal, signal_score(&nearby))
                })
                .collect();

            let raw_score = round1(signals.iter().map(|(s, v)| weight(*s) * v).sum());
            let score = raw_score.max(floor(country)).min(100.0);
            let (label, color) = label_for(score);
            CountryInstability {
                country: country.to_owned(),
                iso2: iso2.to_owned(),
                lat,
                lon,
                score,
                raw_score,
                floor_applied: score > raw_score,
                label: label.to_owned(),
                color: color.to_owned(),
                signals: signals.into_iter().map(|(s, v)| (s, round1(v))).collect(),
                updated_at: now,
            }
        })
        .collect();

    scores.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.country.cmp(&b.country)));
    scores
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use geofusion_types::{EventType, Severity};

    use super::*;
    use crate::spatial::tests::at;

    fn near_kyiv(event_type: EventType, n: usize, severity: u8) -> Vec<Event> {
        (0..n)
            .map(|i| {
                let mut e = at(event_type, &format!("{event_type}-{i}"), 49.5, 31.5, 0);
                e.severity = Severity::new(severity).unwrap();
                e
            })
            .collect()
    }

    fn find<'a>(scores: &'a [CountryInstability], country: &str) -> &'a CountryInstability {
        scores.iter().find(|c| c.country == country).unwrap()
    }

    #[test]
    fn quiet_world_reports_floors_only() {
        let scores = compute(&Vec::<Event>::new(), Utc::now());
        assert_eq!(scores.len(), MONITORED_COUNTRIES.len());

        let gaza = find(&scores, "Gaza");
        assert!((gaza.score - 60.0).abs() < 1e-9);
        assert!(gaza.floor_applied);
        assert_eq!(gaza.label, "HIGH");
        assert_eq!(scores.first().map(|c| c.country.as_str()), Some("Gaza"));

        let usa = find(&scores, "USA");
        assert!(usa.score.abs() < 1e-9);
        assert!(!usa.floor_applied);
        assert_eq!(usa.label, "LOW");
        assert_eq!(usa.signals.len(), InstabilitySignal::ALL.len());
    }

    #[test]
    fn saturated_bucket_at_top_severity_scores_its_weight() {
        let events = near_kyiv(EventType::Acled, 40, 5);
        let scores = compute(&events, Utc::now());
        let ukraine = find(&scores, "Ukraine");
        assert!((ukraine.signals[&InstabilitySignal::Conflict] - 100.0).abs() < 1e-9);
        assert!((ukraine.raw_score - 30.0).abs() < 1e-9);
        // The floor still dominates a single saturated bucket.
        assert!((ukraine.score - 55.0).abs() < 1e-9);
        assert!(ukraine.floor_applied);
    }

    #[test]
    fn signals_combine_above_the_floor() {
        let events: Vec<Event> = [
            EventType::Conflict,
            EventType::MilitaryAircraft,
            EventType::Fire,
            EventType::Protest,
            EventType::Cyber,
        ]
        .into_iter()
        .flat_map(|t| near_kyiv(t, 30, 5))
        .collect();
        let scores = compute(&events, Utc::now());
        let ukraine = find(&scores, "Ukraine");
        assert!((ukraine.score - 100.0).abs() < 1e-9);
        assert!(!ukraine.floor_applied);
        assert_eq!(ukraine.label, "CRITICAL");
        assert_eq!(scores.first().map(|c| c.country.as_str()), Some("Ukraine"));
    }

    #[test]
    fn events_outside_the_radius_and_unbucketed_layers_are_ignored() {
        let mut far = near_kyiv(EventType::Cyber, 5, 3);
        for e in &mut far {
            e.latitude = 49.0 + 5.5;
        }
        let mut events = far;
        events.extend(near_kyiv(EventType::Aircraft, 5, 3));
        events.extend(near_kyiv(EventType::IntelHotspot, 5, 3));
        let scores = compute(&events, Utc::now());
        let ukraine = find(&scores, "Ukraine");
        assert!(ukraine.raw_score.abs() < 1e-9);
        assert!(ukraine.signals.values().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn signal_score_grows_with_count_and_severity() {
        let one = near_kyiv(EventType::Fire, 1, 1);
        let ten = near_kyiv(EventType::Fire, 10, 1);
        let ten_severe = near_kyiv(EventType::Fire, 10, 5);
        fn refs(v: &[Event]) -> Vec<&Event> {
            v.iter().collect()
        }
        let (a, b, c) = (
            signal_score(&refs(&one)),
            signal_score(&refs(&ten)),
            signal_score(&refs(&ten_severe)),
        );
        assert!(0.0 < a && a < b && b < c);
        assert!(signal_score(&[]).abs() < 1e-9);
    }

    #[test]
    fn weights_sum_to_one() {
        let total: f64 = InstabilitySignal::ALL.into_iter().map(weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn label_boundaries() {
        assert_eq!(label_for(75.0).0, "CRITICAL");
        assert_eq!(label_for(74.9).0, "HIGH");
        assert_eq!(label_for(30.0).0, "ELEVATED");
        assert_eq!(label_for(15.0).0, "MODERATE");
        assert_eq!(label_for(0.0).0, "LOW");
    }
}

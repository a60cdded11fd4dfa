//! Global DEFCON-style risk level.
//!
//! The score is a weighted sum of severities over every retained event of
//! the collector-written layers: `sum(weight(type) * severity)`, which is
//! the same as `sum(weight * count * mean severity)` per layer. Weights are
//! non-negative, so adding an event or raising a severity can only raise
//! the score, and the level is a step function of the score. Derived
//! layers (hotspots, convergence) restate the same events and are left out
//! to avoid counting them twice.

use std::collections::BTreeMap;

use chrono::Utc;
use geofusion_types::{Event, EventType, RiskLevel};

use crate::config::RiskConfig;

/// `(label, color)` for each level, 1 through 5.
const LEVELS: [(&str, &str); 5] = [
    ("NOMINAL", "#00ff88"),
    ("GUARDED", "#44ccff"),
    ("ELEVATED", "#ffcc00"),
    ("HIGH", "#ff6600"),
    ("CRITICAL", "#ff0033"),
];

/// Label and display color of a level. Out-of-range levels are clamped.
pub fn level_style(level: u8) -> (&'static str, &'static str) {
    let idx = usize::from(level.clamp(1, 5).saturating_sub(1));
    LEVELS.get(idx).copied().unwrap_or(("NOMINAL", "#00ff88"))
}

/// Computes [`RiskLevel`] snapshots.
#[derive(Debug, Clone)]
pub struct RiskCalculator {
    config: RiskConfig,
}

impl RiskCalculator {
    /// Build from risk weights and breakpoints.
    pub const fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Level (1-5) for a score: one plus the number of breakpoints reached.
    pub fn level_for(&self, score: f64) -> u8 {
        let reached = self.config.breakpoints.iter().filter(|b| score >= **b).count();
        u8::try_from(reached.saturating_add(1)).unwrap_or(5).min(5)
    }

    /// Weighted severity score of the given events.
    pub fn score<'a>(&self, events: impl IntoIterator<Item = &'a Event>) -> f64 {
        events
            .into_iter()
            .filter(|e| !e.event_type.is_derived())
            .map(|e| self.config.weight(e.event_type) * f64::from(e.severity.get()))
            .sum()
    }

    /// Snapshot over the retained events of every layer.
    pub fn compute<'a>(&self, events: impl IntoIterator<Item = &'a Event> + Clone) -> RiskLevel {
        let mut event_counts: BTreeMap<EventType, u64> = BTreeMap::new();
        for e in events.clone() {
            if e.event_type.is_derived() {
                continue;
            }
            let n = event_counts.entry(e.event_type).or_default();
            *n = n.saturating_add(1);
        }

        let score = self.score(events);
        let level = self.level_for(score);
        let (label, color) = level_style(level);
        RiskLevel {
            level,
            label: label.to_owned(),
            color: color.to_owned(),
            event_counts,
            score: (score * 100.0).round() / 100.0,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use geofusion_types::Severity;

    use super::*;
    use crate::spatial::tests::at;

    fn calculator() -> RiskCalculator {
        RiskCalculator::new(RiskConfig::default())
    }

    fn quakes(n: usize, severity: u8) -> Vec<Event> {
        (0..n)
            .map(|i| {
                let mut e = at(EventType::Earthquake, &i.to_string(), 10.0, 10.0, 0);
                e.severity = Severity::new(severity).unwrap();
                e
            })
            .collect()
    }

    #[test]
    fn empty_store_is_nominal() {
        let risk = calculator().compute(&Vec::<Event>::new());
        assert_eq!(risk.level, 1);
        assert_eq!(risk.label, "NOMINAL");
        assert!(risk.event_counts.is_empty());
    }

    #[test]
    fn level_lookup_is_fixed() {
        assert_eq!(level_style(3), ("ELEVATED", "#ffcc00"));
        assert_eq!(level_style(9), ("CRITICAL", "#ff0033"));
        assert_eq!(level_style(0), ("NOMINAL", "#00ff88"));
    }

    #[test]
    fn breakpoints_are_inclusive() {
        let c = calculator();
        assert_eq!(c.level_for(24.99), 1);
        assert_eq!(c.level_for(25.0), 2);
        assert_eq!(c.level_for(300.0), 5);
        assert_eq!(c.level_for(1e9), 5);
    }

    #[test]
    fn counts_and_score() {
        let events = quakes(4, 5);
        let risk = calculator().compute(&events);
        assert_eq!(risk.event_counts.get(&EventType::Earthquake), Some(&4));
        assert!((risk.score - 30.0).abs() < 1e-9);
        assert_eq!(risk.level, 2);
    }

    #[test]
    fn risk_is_monotonic_in_count_and_severity() {
        let c = calculator();
        let mut previous = 0;
        for n in 0..80 {
            let level = c.compute(&quakes(n, 3)).level;
            assert!(level >= previous, "count {n} lowered the level");
            previous = level;
        }

        let mut previous = 0;
        for severity in 1..=5 {
            let level = c.compute(&quakes(30, severity)).level;
            assert!(level >= previous, "severity {severity} lowered the level");
            previous = level;
        }
    }

    #[test]
    fn adding_any_layer_never_lowers_risk() {
        let c = calculator();
        let base = quakes(20, 4);
        let before = c.compute(&base);
        for layer in EventType::observed() {
            let mut more = base.clone();
            more.push(at(layer, "extra", 0.0, 0.0, 0));
            let after = c.compute(&more);
            assert!(after.score >= before.score, "{layer}");
            assert!(after.level >= before.level, "{layer}");
        }
    }

    #[test]
    fn derived_layers_are_not_counted() {
        let mut events = quakes(2, 3);
        events.push(at(EventType::IntelHotspot, "h", 10.0, 10.0, 0));
        let risk = calculator().compute(&events);
        assert!(!risk.event_counts.contains_key(&EventType::IntelHotspot));
        assert!((risk.score - 9.0).abs() < 1e-9);
    }
}

//! Near-duplicate detection.
//!
//! Independent feeds often report the same occurrence. Two events of one
//! layer are *candidate duplicates* when their fingerprints match: both
//! coordinates within `coordinate_precision` degrees and timestamps within
//! the dedup window. Among candidates the more trusted source wins, then
//! the newer report.
//!
//! When a candidate's title and description share too few words with the
//! new event, the match is *ambiguous* and the pair's [`Verdict`] decides.
//! Verdicts are gathered ahead of time (see [`crate::verify`]), so
//! [`Deduplicator::dedupe`] is a pure, synchronous function that is cheap
//! enough to run inside the store's critical section.

use std::collections::{BTreeMap, HashSet};

use geofusion_types::{Event, EventId, SourcePriority};

use crate::config::FusionPolicy;
use crate::verify::{Verdict, Verdicts};

/// Slack added to coordinate comparisons so that `34.0` and `34.1` are
/// within `0.1` despite binary rounding.
const COORD_EPSILON: f64 = 1e-9;

/// What to do with a new event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    /// No duplicate retained: store it.
    Accept,
    /// Replace the retained event with this id.
    Supersede(EventId),
    /// A better or identical report is already retained.
    Discard,
}

/// Fingerprint matcher with source-priority tie-breaking.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    window: chrono::Duration,
    precision: f64,
    similarity_threshold: f64,
    priorities: BTreeMap<String, SourcePriority>,
}

impl Deduplicator {
    /// Build from the fusion policy.
    pub fn new(policy: &FusionPolicy) -> Self {
        Self {
            window: policy.dedup_window(),
            precision: policy.coordinate_precision,
            similarity_threshold: policy.similarity_threshold,
            priorities: policy
                .source_priorities
                .iter()
                .map(|(name, p)| (name.to_lowercase(), *p))
                .collect(),
        }
    }

    /// Trust tier of an event's source.
    pub fn priority(&self, source: &str) -> SourcePriority {
        self.priorities
            .get(&source.to_lowercase())
            .copied()
            .unwrap_or_default()
    }

    /// Whether two distinct events share a fingerprint.
    pub fn is_candidate(&self, a: &Event, b: &Event) -> bool {
        a.id != b.id
            && a.event_type == b.event_type
            && (a.latitude - b.latitude).abs() <= self.precision + COORD_EPSILON
            && (a.longitude - b.longitude).abs() <= self.precision + COORD_EPSILON
            && a.timestamp.signed_duration_since(b.timestamp).abs() <= self.window
    }

    /// Whether a fingerprint match needs a semantic verdict.
    pub fn is_ambiguous(&self, a: &Event, b: &Event) -> bool {
        self.is_candidate(a, b) && similarity(a, b) < self.similarity_threshold
    }

    /// Pairs `(new, retained)` that must be verified before `new` can be
    /// deduplicated against `existing`.
    pub fn ambiguous_pairs(&self, new: &Event, existing: &[Event]) -> Vec<(Event, Event)> {
        if existing.iter().any(|e| e.id == new.id) {
            return Vec::new();
        }
        existing
            .iter()
            .filter(|e| self.is_ambiguous(new, e))
            .map(|e| (new.clone(), e.clone()))
            .collect()
    }

    /// Decide what to do with `new` given the layer's retained events.
    pub fn dedupe(&self, new: &Event, existing: &[Event], verdicts: &Verdicts) -> DedupDecision {
        if let Some(same) = existing.iter().find(|e| e.id == new.id) {
            return if same == new {
                DedupDecision::Discard
            } else {
                DedupDecision::Supersede(same.id)
            };
        }

        let best = existing
            .iter()
            .filter(|e| self.is_candidate(new, e))
            .filter(|e| {
                // Distinct verdicts veto ambiguous matches; anything else
                // falls back to the fingerprint.
                !(similarity(new, e) < self.similarity_threshold
                    && verdicts.get(new.id, e.id) == Some(Verdict::Distinct))
            })
            .max_by(|a, b| {
                self.priority(&a.source)
                    .cmp(&self.priority(&b.source))
                    .then(a.timestamp.cmp(&b.timestamp))
            });

        let Some(best) = best else {
            return DedupDecision::Accept;
        };

        let new_priority = self.priority(&new.source);
        let best_priority = self.priority(&best.source);
        if new_priority > best_priority
            || (new_priority == best_priority && new.timestamp > best.timestamp)
        {
            DedupDecision::Supersede(best.id)
        } else {
            DedupDecision::Discard
        }
    }
}

/// Jaccard similarity of the lowercase word sets of title and description.
///
/// Two events with no text at all are treated as identical.
pub fn similarity(a: &Event, b: &Event) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let shared = ta.intersection(&tb).count();
    let total = ta.union(&tb).count();
    ratio(shared, total)
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    // Token counts are far below 2^52.
    part as f64 / whole as f64
}

fn tokens(event: &Event) -> HashSet<String> {
    event
        .title
        .split(|c: char| !c.is_alphanumeric())
        .chain(event.description.split(|c: char| !c.is_alphanumeric()))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

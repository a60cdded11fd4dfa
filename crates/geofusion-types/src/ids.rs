//! Name-based event identifiers.
//!
//! Event ids are UUID v5 digests of provenance plus a natural key, never
//! random. Re-ingesting the same real-world fact therefore yields the same
//! id, which is what makes ingestion idempotent and lets a newer version of
//! a fact replace the older one in the store.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::enums::EventType;
use crate::structs::CellKey;

/// Namespace under which all event ids are derived.
const EVENT_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_0c2e_52d4_4a8e_9f3b_7d01_c4a6_e2f5);

/// Separator between the components hashed into an id. A unit separator
/// cannot appear in sane source names, so `("a", "bc")` and `("ab", "c")`
/// never collide.
const SEP: char = '\u{1f}';

/// Stable identifier of an [`Event`](crate::Event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EventId(pub Uuid);

impl EventId {
    /// Derive the id of a collected event from its source and natural key.
    pub fn derive(source: &str, natural_key: &str) -> Self {
        let name = format!("{source}{SEP}{natural_key}");
        Self(Uuid::new_v5(&EVENT_NAMESPACE, name.as_bytes()))
    }

    /// Derive the id of a synthesized event from the grid cell it describes
    /// and the set of layers that contributed to it.
    ///
    /// The same cell with the same contributing set always produces the
    /// same id, so a persisting condition refreshes its alert instead of
    /// raising a new one every cycle.
    pub fn for_cell(kind: EventType, cell: CellKey, contributing: &BTreeSet<EventType>) -> Self {
        let mut name = format!("{kind}{SEP}{}{SEP}{}", cell.lat, cell.lon);
        for t in contributing {
            name.push(SEP);
            name.push_str(t.as_str());
        }
        Self(Uuid::new_v5(&EVENT_NAMESPACE, name.as_bytes()))
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl core::fmt::Display for EventId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        assert_eq!(EventId::derive("USGS", "us7000abcd"), EventId::derive("USGS", "us7000abcd"));
    }

    #[test]
    fn derive_separates_components() {
        assert_ne!(EventId::derive("ab", "c"), EventId::derive("a", "bc"));
        assert_ne!(EventId::derive("USGS", "x"), EventId::derive("EMSC", "x"));
    }

    #[test]
    fn cell_ids_depend_on_contributing_set() {
        let cell = CellKey { lat: 34, lon: -118 };
        let two: BTreeSet<_> = [EventType::Cyber, EventType::Conflict].into_iter().collect();
        let three: BTreeSet<_> = [EventType::Cyber, EventType::Conflict, EventType::Aircraft]
            .into_iter()
            .collect();
        let a = EventId::for_cell(EventType::Convergence, cell, &two);
        let b = EventId::for_cell(EventType::Convergence, cell, &three);
        assert_ne!(a, b);
        assert_eq!(a, EventId::for_cell(EventType::Convergence, cell, &two));
        assert_ne!(a, EventId::for_cell(EventType::IntelHotspot, cell, &two));
    }
}

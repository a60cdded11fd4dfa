//! 1x1 degree grid binning.
//!
//! The index is rebuilt from scratch on every commit from the events the
//! store currently retains. It borrows the events; nothing outlives the
//! recomputation that built it.

use std::collections::{BTreeMap, BTreeSet};

use geofusion_types::{CellKey, Event, EventType};

/// Events of one grid cell.
#[derive(Debug, Default)]
pub struct Cell<'a> {
    events: Vec<&'a Event>,
}

impl<'a> Cell<'a> {
    /// Events binned into this cell, in insertion order.
    pub fn events(&self) -> &[&'a Event] {
        &self.events
    }

    /// Exact number of events in the cell.
    pub fn count(&self) -> usize {
        self.events.len()
    }

    /// Distinct layers present.
    pub fn types(&self) -> BTreeSet<EventType> {
        self.events.iter().map(|e| e.event_type).collect()
    }

    /// Event count per layer.
    pub fn type_breakdown(&self) -> BTreeMap<EventType, usize> {
        let mut counts: BTreeMap<EventType, usize> = BTreeMap::new();
        for e in &self.events {
            let n = counts.entry(e.event_type).or_default();
            *n = n.saturating_add(1);
        }
        counts
    }

    /// Mean position of the cell's events, `None` for an empty cell.
    #[allow(clippy::cast_precision_loss)]
    pub fn centroid(&self) -> Option<(f64, f64)> {
        if self.events.is_empty() {
            return None;
        }
        // Retained event counts are bounded far below 2^52.
        let n = self.events.len() as f64;
        let lat = self.events.iter().map(|e| e.latitude).sum::<f64>() / n;
        let lon = self.events.iter().map(|e| e.longitude).sum::<f64>() / n;
        Some((lat, lon))
    }
}

/// Grid of cells keyed by `(floor(lat), floor(lon))`.
#[derive(Debug, Default)]
pub struct SpatialIndex<'a> {
    cells: BTreeMap<CellKey, Cell<'a>>,
}

impl<'a> SpatialIndex<'a> {
    /// Bin every event yielded by `events`.
    pub fn build(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut cells: BTreeMap<CellKey, Cell<'a>> = BTreeMap::new();
        for event in events {
            cells.entry(event.cell()).or_default().events.push(event);
        }
        Self { cells }
    }

    /// Iterate over non-empty cells in key order.
    pub fn cells(&self) -> impl Iterator<Item = (CellKey, &Cell<'a>)> {
        self.cells.iter().map(|(k, c)| (*k, c))
    }

    /// The cell at `key`, if it holds any event.
    pub fn cell(&self, key: CellKey) -> Option<&Cell<'a>> {
        self.cells.get(&key)
    }

    /// Number of events binned.
    pub fn total(&self) -> usize {
        self.cells.values().map(Cell::count).sum()
    }

    /// Number of non-empty cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether nothing was binned.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

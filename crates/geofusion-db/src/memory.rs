//! Bounded in-memory event log.
//!
//! Serves the same contract as the `Dragonfly` list: append in order,
//! keep the newest `max_len` entries per layer, read the newest `count`
//! oldest-first.

use std::collections::{BTreeMap, VecDeque};

use geofusion_types::{Event, EventType};
use tokio::sync::RwLock;

/// Per-layer ring buffers.
#[derive(Debug)]
pub struct MemoryLog {
    layers: RwLock<BTreeMap<EventType, VecDeque<Event>>>,
    max_len: usize,
}

impl MemoryLog {
    /// Create an empty log keeping at most `max_len` events per layer.
    pub fn new(max_len: usize) -> Self {
        Self {
            layers: RwLock::new(BTreeMap::new()),
            max_len,
        }
    }

    /// Append events to the layer, evicting the oldest beyond `max_len`.
    pub async fn append(&self, layer: EventType, events: &[Event]) {
        if events.is_empty() {
            return;
        }
        let mut layers = self.layers.write().await;
        let buf = layers.entry(layer).or_default();
        buf.extend(events.iter().cloned());
        let excess = buf.len().saturating_sub(self.max_len);
        buf.drain(..excess);
    }

    /// The most recent `count` events of the layer, oldest first.
    pub async fn recent(&self, layer: EventType, count: usize) -> Vec<Event> {
        let layers = self.layers.read().await;
        layers.get(&layer).map_or_else(Vec::new, |buf| {
            let skip = buf.len().saturating_sub(count);
            buf.iter().skip(skip).cloned().collect()
        })
    }

    /// Number of events held for the layer.
    pub async fn len(&self, layer: EventType) -> usize {
        self.layers.read().await.get(&layer).map_or(0, VecDeque::len)
    }
}

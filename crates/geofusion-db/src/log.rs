//! The [`EventLog`] facade: durable when possible, in-memory otherwise.
//!
//! Writes always land in the in-memory mirror; when a durable store is
//! configured they are also written there. Durable-store outages are a
//! degraded-durability mode, never an error surfaced to callers.
//!
//! A layer whose durable write failed has *diverged*: its durable list is
//! missing a batch the mirror holds. Reads of a diverged layer are served
//! from the mirror, and the next append rewrites the durable list from the
//! mirror. Either way a reader sees every batch that was appended.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geofusion_types::{Event, EventType};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::dragonfly::DragonflyLog;
use crate::error::DbError;
use crate::memory::MemoryLog;

/// How long to wait for the initial `Dragonfly` handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A durable per-layer list store behind [`EventLog`].
#[async_trait]
pub trait DurableLog: Send + Sync {
    /// Append events to the layer's list, keeping the newest entries.
    async fn append(&self, layer: EventType, events: &[Event]) -> Result<(), DbError>;

    /// The most recent `count` events of the layer, oldest first.
    async fn recent(&self, layer: EventType, count: usize) -> Result<Vec<Event>, DbError>;

    /// Overwrite the layer's list with `events`.
    async fn replace(&self, layer: EventType, events: &[Event]) -> Result<(), DbError>;
}

/// Append-only event log keyed by layer.
pub struct EventLog {
    durable: Option<Arc<dyn DurableLog>>,
    memory: MemoryLog,
    /// Layers whose durable list missed a write. Also serializes appends,
    /// so the mirror and the durable list see batches in the same order.
    diverged: Mutex<BTreeSet<EventType>>,
    max_len: usize,
}

impl EventLog {
    /// A log backed only by memory.
    pub fn in_memory(max_len: usize) -> Self {
        Self {
            durable: None,
            memory: MemoryLog::new(max_len),
            diverged: Mutex::new(BTreeSet::new()),
            max_len,
        }
    }

    /// Connect to `Dragonfly`, falling back to memory if it is unreachable.
    pub async fn connect(url: &str, prefix: &str, max_len: usize) -> Self {
        let attempt =
            tokio::time::timeout(CONNECT_TIMEOUT, DragonflyLog::connect(url, prefix, max_len))
                .await;
        match attempt {
            Ok(Ok(durable)) => Self::with_durable(durable, max_len),
            Ok(Err(e)) => {
                warn!(error = %e, "Dragonfly unavailable, falling back to in-memory event log");
                Self::in_memory(max_len)
            }
            Err(_elapsed) => {
                warn!(
                    timeout_secs = CONNECT_TIMEOUT.as_secs(),
                    "Dragonfly connect timed out, falling back to in-memory event log"
                );
                Self::in_memory(max_len)
            }
        }
    }

    /// Build a log from an already connected `Dragonfly` handle.
    pub fn with_durable(durable: DragonflyLog, max_len: usize) -> Self {
        Self::with_backend(Arc::new(durable), max_len)
    }

    /// Build a log over any durable backend.
    pub fn with_backend(durable: Arc<dyn DurableLog>, max_len: usize) -> Self {
        Self {
            durable: Some(durable),
            ..Self::in_memory(max_len)
        }
    }

    /// Whether writes are configured to reach a durable store.
    pub const fn is_durable(&self) -> bool {
        self.durable.is_some()
    }

    /// Append a committed batch to the layer's log.
    pub async fn append(&self, layer: EventType, events: &[Event]) {
        let mut diverged = self.diverged.lock().await;
        self.memory.append(layer, events).await;
        let Some(durable) = &self.durable else {
            return;
        };

        let result = if diverged.contains(&layer) {
            // The mirror already holds this batch.
            let mirror = self.memory.recent(layer, self.max_len).await;
            durable.replace(layer, &mirror).await
        } else {
            durable.append(layer, events).await
        };

        match result {
            Ok(()) => {
                if diverged.remove(&layer) {
                    info!(%layer, "Durable log resynchronized from memory");
                }
            }
            Err(e) => {
                warn!(%layer, error = %e, "Durable append failed, serving layer from memory");
                diverged.insert(layer);
            }
        }
    }

    /// The most recent `count` events appended to the layer, oldest first.
    pub async fn recent(&self, layer: EventType, count: usize) -> Vec<Event> {
        let diverged = self.diverged.lock().await;
        let durable = self.durable.as_ref().filter(|_| !diverged.contains(&layer));
        if let Some(durable) = durable {
            match durable.recent(layer, count).await {
                Ok(events) => return events,
                Err(e) => {
                    warn!(%layer, error = %e, "Durable read failed, serving from memory");
                }
            }
        }
        self.memory.recent(layer, count).await
    }

    /// Log which backend is active.
    pub fn log_mode(&self) {
        if self.is_durable() {
            info!("Event log: Dragonfly (durable) with in-memory mirror");
        } else {
            info!("Event log: in-memory only");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::Utc;
    use geofusion_types::{EventId, Severity};

    use super::*;

    fn event(n: u32) -> Event {
        Event {
            id: EventId::derive("test", &n.to_string()),
            event_type: EventType::Outage,
            latitude: 10.0,
            longitude: 10.0,
            severity: Severity::MIN,
            timestamp: Utc::now(),
            source: String::from("test"),
            title: format!("outage {n}"),
            description: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    fn titles(events: &[Event]) -> Vec<&str> {
        events.iter().map(|e| e.title.as_str()).collect()
    }

    /// In-process durable store whose every call can be made to fail.
    #[derive(Default)]
    struct Flaky {
        down: AtomicBool,
        lists: Mutex<BTreeMap<EventType, Vec<Event>>>,
    }

    impl Flaky {
        fn check(&self) -> Result<(), DbError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(DbError::Dragonfly(fred::error::Error::new(
                    fred::error::ErrorKind::IO,
                    "connection reset",
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DurableLog for Flaky {
        async fn append(&self, layer: EventType, events: &[Event]) -> Result<(), DbError> {
            self.check()?;
            self.lists
                .lock()
                .await
                .entry(layer)
                .or_default()
                .extend(events.iter().cloned());
            Ok(())
        }

        async fn recent(&self, layer: EventType, count: usize) -> Result<Vec<Event>, DbError> {
            self.check()?;
            let lists = self.lists.lock().await;
            let list = lists.get(&layer).cloned().unwrap_or_default();
            let skip = list.len().saturating_sub(count);
            Ok(list.into_iter().skip(skip).collect())
        }

        async fn replace(&self, layer: EventType, events: &[Event]) -> Result<(), DbError> {
            self.check()?;
            self.lists.lock().await.insert(layer, events.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn in_memory_log_round_trip() {
        let log = EventLog::in_memory(10);
        assert!(!log.is_durable());
        log.append(EventType::Outage, &[event(1), event(2)]).await;
        let recent = log.recent(EventType::Outage, 5).await;
        assert_eq!(titles(&recent), ["outage 1", "outage 2"]);
    }

    #[tokio::test]
    async fn unreachable_dragonfly_falls_back_to_memory() {
        // Port 1 is never a Redis server; connect fails fast.
        let log = EventLog::connect("redis://127.0.0.1:1", "test", 10).await;
        assert!(!log.is_durable());
        log.append(EventType::Outage, &[event(7)]).await;
        assert_eq!(titles(&log.recent(EventType::Outage, 1).await), ["outage 7"]);
    }

    #[tokio::test]
    async fn batch_missed_by_durable_store_is_still_read_back() {
        let flaky = Arc::new(Flaky::default());
        let log = EventLog::with_backend(Arc::clone(&flaky) as Arc<dyn DurableLog>, 10);
        let reference = EventLog::in_memory(10);

        let batches = [vec![event(1), event(2)], vec![event(3)], vec![event(4)]];
        let [first, missed, after] = &batches;

        log.append(EventType::Outage, first).await;
        reference.append(EventType::Outage, first).await;

        flaky.down.store(true, Ordering::SeqCst);
        log.append(EventType::Outage, missed).await;
        reference.append(EventType::Outage, missed).await;
        flaky.down.store(false, Ordering::SeqCst);

        // The store answers again but its list lacks the missed batch.
        for count in [1, 2, 10] {
            assert_eq!(
                log.recent(EventType::Outage, count).await,
                reference.recent(EventType::Outage, count).await,
                "count = {count}"
            );
        }

        // The next append rewrites the durable list from the mirror.
        log.append(EventType::Outage, after).await;
        reference.append(EventType::Outage, after).await;
        let durable = flaky.lists.lock().await.get(&EventType::Outage).cloned().unwrap();
        assert_eq!(titles(&durable), ["outage 1", "outage 2", "outage 3", "outage 4"]);
        assert_eq!(
            log.recent(EventType::Outage, 10).await,
            reference.recent(EventType::Outage, 10).await
        );
    }

    #[tokio::test]
    async fn failed_reads_are_served_from_memory() {
        let flaky = Arc::new(Flaky::default());
        let log = EventLog::with_backend(Arc::clone(&flaky) as Arc<dyn DurableLog>, 10);
        log.append(EventType::Outage, &[event(1)]).await;

        flaky.down.store(true, Ordering::SeqCst);
        assert_eq!(titles(&log.recent(EventType::Outage, 5).await), ["outage 1"]);
        assert!(log.recent(EventType::Fire, 5).await.is_empty());
    }
}

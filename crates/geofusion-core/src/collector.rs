//! Collectors and their polling loop.
//!
//! A [`Collector`] knows how to fetch one external feed and return its raw
//! records; it knows nothing about normalization or storage. Collectors are
//! registered by name in a [`CollectorRegistry`] at startup, and each runs
//! in its own task via [`run_collector`], so one slow or failing feed never
//! delays another.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geofusion_types::{EventType, RawRecord};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pipeline::Pipeline;
use crate::store::IngestMode;

/// Errors from a collector or from registering one.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// Transport failure talking to the feed.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The feed answered with something that is not a record list.
    #[error("unexpected payload: {0}")]
    Payload(String),

    /// `collect()` exceeded its timeout and was abandoned.
    #[error("collect timed out after {0:?}")]
    Timeout(Duration),

    /// A collector with this name is already registered.
    #[error("collector {0} is already registered")]
    Duplicate(String),
}

/// One external feed.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Unique name, used in logs and as the batch source.
    fn name(&self) -> &str;

    /// Layer the records belong to unless they carry their own `type`.
    fn layer(&self) -> EventType;

    /// How batches combine with the layer's retained events.
    fn mode(&self) -> IngestMode {
        IngestMode::Merge
    }

    /// Time between polls.
    fn interval(&self) -> Duration;

    /// Time after which a poll is abandoned.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Fetch the current batch of raw records.
    async fn collect(&self) -> Result<Vec<RawRecord>, CollectorError>;
}

/// Collectors keyed by name.
#[derive(Default)]
pub struct CollectorRegistry {
    collectors: BTreeMap<String, Arc<dyn Collector>>,
}

impl CollectorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collector. Names must be unique.
    pub fn register(&mut self, collector: Arc<dyn Collector>) -> Result<(), CollectorError> {
        let name = collector.name().to_owned();
        if self.collectors.contains_key(&name) {
            return Err(CollectorError::Duplicate(name));
        }
        info!(
            collector = name,
            layer = %collector.layer(),
            interval_secs = collector.interval().as_secs(),
            "Collector registered"
        );
        self.collectors.insert(name, collector);
        Ok(())
    }

    /// Look up a collector by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Collector>> {
        self.collectors.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.collectors.keys().map(String::as_str).collect()
    }

    /// Number of registered collectors.
    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    /// Whether no collector is registered.
    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Spawn one polling task per collector.
    pub fn spawn_all(
        &self,
        pipeline: &Arc<Pipeline>,
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        self.collectors
            .values()
            .map(|c| {
                tokio::spawn(run_collector(
                    Arc::clone(c),
                    Arc::clone(pipeline),
                    shutdown.clone(),
                ))
            })
            .collect()
    }
}

/// Poll one collector until `shutdown` flips to `true`.
///
/// The first poll happens immediately. A poll that fails or exceeds the
/// collector's timeout is logged and skipped; nothing of it reaches the
/// pipeline. Missed ticks are not replayed.
pub async fn run_collector(
    collector: Arc<dyn Collector>,
    pipeline: Arc<Pipeline>,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = collector.name().to_owned();
    let mut ticker = tokio::time::interval(collector.interval().max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(collector = name, "Collector task started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match poll_once(collector.as_ref()).await {
                    Ok(records) => {
                        debug!(collector = name, records = records.len(), "Collected batch");
                        pipeline
                            .process(&name, collector.layer(), collector.mode(), records)
                            .await;
                    }
                    Err(e) => {
                        warn!(collector = name, error = %e, "Collection failed, skipping cycle");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(collector = name, "Collector task stopped");
}

/// One `collect()` call bounded by the collector's timeout.
pub async fn poll_once(collector: &dyn Collector) -> Result<Vec<RawRecord>, CollectorError> {
    let timeout = collector.timeout();
    tokio::time::timeout(timeout, collector.collect())
        .await
        .map_err(|_elapsed| CollectorError::Timeout(timeout))?
}

//! The event store: per-layer collections, derived views, and publication.
//!
//! # Locking
//!
//! Every layer has an ingest mutex, so two batches for the same layer never
//! interleave while batches for different layers deduplicate in parallel.
//! Committed state lives behind `RwLock<Arc<..>>`: readers clone the `Arc`
//! and never wait for a deduplication pass.
//!
//! The commit itself happens under a single fusion lock, held while the
//! layer's new contents are swapped in, the derived views (hotspots,
//! convergence alerts, country instability, risk) are recomputed, and the resulting messages
//! are published. Broadcast order therefore equals commit order, and a
//! newly connected observer (which subscribes under the same lock) sees
//! either all of a commit or none of it. Lock order is always layer lock
//! first, then fusion lock.
//!
//! # Failure isolation
//!
//! Each derived view is computed in isolation. If one of them panics the
//! previous value of that view is kept, the error is logged, and the
//! layer's own commit and broadcast still go out.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use geofusion_types::{
    CountryInstability, Event, EventId, EventType, Hotspot, LayerSummary, OutboundMessage,
    RiskLevel,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::config::{FusionConfig, RetentionConfig};
use crate::convergence::{self, ConvergenceRule};
use crate::dedup::{DedupDecision, Deduplicator};
use crate::distribution::{Distributor, Subscription};
use crate::hotspot;
use crate::instability;
use crate::risk::RiskCalculator;
use crate::spatial::SpatialIndex;
use crate::verify::Verdicts;

/// How a batch is combined with a layer's retained events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Deduplicate against retained events and add to them (incremental
    /// feeds).
    #[default]
    Merge,
    /// The batch, deduplicated within itself, becomes the layer (snapshot
    /// feeds such as live aircraft positions).
    Replace,
}

/// Errors returned by [`EventStore::ingest`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    /// Derived layers are written by the fusion step only.
    #[error("layer {0} is derived and cannot be ingested")]
    DerivedLayer(EventType),

    /// The batch holds an event of another layer.
    #[error("event {event} has type {found}, expected layer {layer}")]
    LayerMismatch {
        /// The layer being ingested.
        layer: EventType,
        /// The offending event.
        event: EventId,
        /// Its actual type.
        found: EventType,
    },
}

/// Outcome of one ingest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    /// The layer ingested.
    pub layer: EventType,
    /// Events added without displacing anything.
    pub accepted: usize,
    /// Events that replaced a retained duplicate.
    pub superseded: usize,
    /// Events dropped as duplicates.
    pub discarded: usize,
    /// Events evicted by retention during this commit.
    pub evicted: usize,
    /// Events retained in the layer after the commit.
    pub retained: usize,
    /// Batch events that made it into the committed layer.
    #[serde(skip)]
    pub stored: Vec<Event>,
}

/// Point-in-time view of the whole store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    /// Retained events per layer, derived layers included.
    pub layers: BTreeMap<EventType, Vec<Event>>,
    /// Risk snapshot of the same commit.
    pub risk: RiskLevel,
}

impl StoreSnapshot {
    /// Every event across all layers, in layer order.
    pub fn all_events(&self) -> Vec<Event> {
        self.layers.values().flatten().cloned().collect()
    }

    /// The `initial_state` message for a late-joining observer.
    pub fn initial_state(&self) -> OutboundMessage {
        OutboundMessage::InitialState {
            data: self.all_events(),
            risk: self.risk.clone(),
            layers: EventType::ALL.to_vec(),
        }
    }
}

/// Committed contents of one layer.
#[derive(Debug, Default)]
struct LayerData {
    events: Vec<Event>,
    last_updated: Option<DateTime<Utc>>,
}

struct Layer {
    ingest: Mutex<()>,
    committed: RwLock<Arc<LayerData>>,
}

impl Layer {
    fn new() -> Self {
        Self {
            ingest: Mutex::new(()),
            committed: RwLock::new(Arc::new(LayerData::default())),
        }
    }
}

/// Density computation behind the hotspot view.
type HotspotFn = fn(&SpatialIndex<'_>, u32) -> Vec<Hotspot>;

/// Fixed policy the store applies on every commit.
struct Policy {
    dedup: Deduplicator,
    retention: RetentionConfig,
    hotspots: HotspotFn,
    hotspot_threshold: u32,
    hotspot_layers: Vec<EventType>,
    convergence_layers: Vec<EventType>,
    convergence: ConvergenceRule,
    risk: RiskCalculator,
}

/// Owner of all retained events and of the derived views built on them.
pub struct EventStore {
    layers: BTreeMap<EventType, Layer>,
    hotspots: RwLock<Arc<Vec<Hotspot>>>,
    instability: RwLock<Arc<Vec<CountryInstability>>>,
    risk: RwLock<Arc<RiskLevel>>,
    fusion: Mutex<()>,
    policy: Policy,
    distributor: Distributor,
}

impl EventStore {
    /// An empty store configured from `config`.
    pub fn new(config: &FusionConfig) -> Self {
        let fusion = &config.fusion;
        Self {
            layers: EventType::ALL.into_iter().map(|t| (t, Layer::new())).collect(),
            hotspots: RwLock::new(Arc::new(Vec::new())),
            instability: RwLock::new(Arc::new(instability::compute(
                std::iter::empty(),
                Utc::now(),
            ))),
            risk: RwLock::new(Arc::new(RiskLevel::nominal())),
            fusion: Mutex::new(()),
            policy: Policy {
                dedup: Deduplicator::new(fusion),
                retention: config.retention.clone(),
                hotspots: hotspot::compute_hotspots,
                hotspot_threshold: fusion.hotspot_threshold,
                hotspot_layers: fusion.hotspot_layers(),
                convergence_layers: fusion.convergence_layers(),
                convergence: ConvergenceRule {
                    min_types: fusion.convergence_min_types,
                    window: fusion.convergence_window(),
                },
                risk: RiskCalculator::new(config.risk.clone()),
            },
            distributor: Distributor::new(),
        }
    }

    /// The deduplicator used on commit, for callers that gather verdicts
    /// ahead of time.
    pub const fn deduplicator(&self) -> &Deduplicator {
        &self.policy.dedup
    }

    /// The observer registry.
    pub const fn distributor(&self) -> &Distributor {
        &self.distributor
    }

    /// Merge `events` into `layer` without semantic verdicts.
    pub async fn ingest(
        &self,
        layer: EventType,
        events: Vec<Event>,
    ) -> Result<IngestReport, IngestError> {
        self.ingest_with(layer, events, IngestMode::Merge, &Verdicts::new())
            .await
    }

    /// Ingest a batch into one layer, recompute derived views and publish.
    ///
    /// `verdicts` answers ambiguous duplicate pairs; pairs without an
    /// answer fall back to fingerprint-only resolution.
    pub async fn ingest_with(
        &self,
        layer: EventType,
        events: Vec<Event>,
        mode: IngestMode,
        verdicts: &Verdicts,
    ) -> Result<IngestReport, IngestError> {
        if layer.is_derived() {
            return Err(IngestError::DerivedLayer(layer));
        }
        if let Some(bad) = events.iter().find(|e| e.event_type != layer) {
            return Err(IngestError::LayerMismatch {
                layer,
                event: bad.id,
                found: bad.event_type,
            });
        }
        let Some(slot) = self.layers.get(&layer) else {
            return Err(IngestError::DerivedLayer(layer));
        };

        let _layer_guard = slot.ingest.lock().await;
        let current = Arc::clone(&*slot.committed.read().await);

        let mut working = match mode {
            IngestMode::Merge => current.events.clone(),
            IngestMode::Replace => Vec::with_capacity(events.len()),
        };
        let mut report = IngestReport {
            layer,
            accepted: 0,
            superseded: 0,
            discarded: 0,
            evicted: 0,
            retained: 0,
            stored: Vec::new(),
        };
        let mut incoming: Vec<EventId> = Vec::new();

        for event in events {
            match self.policy.dedup.dedupe(&event, &working, verdicts) {
                DedupDecision::Accept => {
                    incoming.push(event.id);
                    working.push(event);
                    report.accepted = report.accepted.saturating_add(1);
                }
                DedupDecision::Supersede(old) => {
                    working.retain(|e| e.id != old);
                    incoming.push(event.id);
                    working.push(event);
                    report.superseded = report.superseded.saturating_add(1);
                }
                DedupDecision::Discard => {
                    report.discarded = report.discarded.saturating_add(1);
                }
            }
        }

        let now = Utc::now();
        report.evicted = apply_retention(&mut working, &self.policy.retention, now);
        report.retained = working.len();
        report.stored = working
            .iter()
            .filter(|e| incoming.contains(&e.id))
            .cloned()
            .collect();

        let _fusion_guard = self.fusion.lock().await;
        *slot.committed.write().await = Arc::new(LayerData {
            events: working,
            last_updated: Some(now),
        });
        self.recompute_and_publish(layer, now).await;

        info!(
            layer = %layer,
            mode = ?mode,
            accepted = report.accepted,
            superseded = report.superseded,
            discarded = report.discarded,
            evicted = report.evicted,
            retained = report.retained,
            "Layer committed"
        );
        Ok(report)
    }

    /// Recompute hotspots, convergence and risk from committed state and
    /// publish the commit. Caller holds the fusion lock.
    async fn recompute_and_publish(&self, layer: EventType, now: DateTime<Utc>) {
        let committed = self.committed_layers().await;
        let observed = || {
            committed
                .iter()
                .filter(|(t, _)| !t.is_derived())
                .flat_map(|(_, data)| data.events.iter())
        };
        let of_layers = |layers: &[EventType]| {
            layers
                .iter()
                .filter_map(|t| committed.get(t))
                .flat_map(|data| data.events.iter())
                .collect::<Vec<&Event>>()
        };

        let mut changed = vec![layer];

        let hotspot_members = of_layers(&self.policy.hotspot_layers);
        let threshold = self.policy.hotspot_threshold;
        let compute_hotspots = self.policy.hotspots;
        let hotspots = isolate("hotspots", || {
            let index = SpatialIndex::build(hotspot_members.iter().copied());
            let hotspots = compute_hotspots(&index, threshold);
            let events: Vec<Event> = hotspots
                .iter()
                .filter_map(|h| index.cell(h.cell).and_then(|cell| hotspot::hotspot_event(h, cell)))
                .collect();
            (hotspots, events)
        });
        if let Some((views, events)) = hotspots {
            *self.hotspots.write().await = Arc::new(views);
            if self.replace_derived(EventType::IntelHotspot, events, now).await {
                changed.push(EventType::IntelHotspot);
            }
        }

        let convergence_members = of_layers(&self.policy.convergence_layers);
        let rule = self.policy.convergence;
        let alerts = isolate("convergence", || {
            convergence::detect(&SpatialIndex::build(convergence_members.iter().copied()), rule)
        });
        if let Some(alerts) = alerts {
            let replaced = self.replace_derived(EventType::Convergence, alerts, now).await;
            if replaced {
                changed.push(EventType::Convergence);
            }
        }

        let countries = isolate("instability", || instability::compute(observed(), now));
        if let Some(countries) = countries {
            *self.instability.write().await = Arc::new(countries);
        }

        let risk = match isolate("risk", || self.policy.risk.compute(observed())) {
            Some(risk) => {
                let risk = Arc::new(risk);
                *self.risk.write().await = Arc::clone(&risk);
                risk
            }
            None => Arc::clone(&*self.risk.read().await),
        };

        for changed_layer in changed {
            let data = self.query(changed_layer).await;
            let message = OutboundMessage::EventBatch {
                layer: changed_layer,
                data,
                risk: (*risk).clone(),
            };
            self.distributor.publish(Arc::new(message)).await;
        }
        self.distributor
            .publish(Arc::new(OutboundMessage::RiskUpdate {
                risk: (*risk).clone(),
            }))
            .await;
    }

    /// Swap in new contents for a derived layer. Returns whether they
    /// differ from what was there.
    async fn replace_derived(
        &self,
        layer: EventType,
        events: Vec<Event>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(slot) = self.layers.get(&layer) else {
            return false;
        };
        let mut committed = slot.committed.write().await;
        if committed.events == events {
            return false;
        }
        debug!(layer = %layer, count = events.len(), "Derived layer changed");
        *committed = Arc::new(LayerData {
            events,
            last_updated: Some(now),
        });
        true
    }

    async fn committed_layers(&self) -> BTreeMap<EventType, Arc<LayerData>> {
        let mut out = BTreeMap::new();
        for (t, layer) in &self.layers {
            out.insert(*t, Arc::clone(&*layer.committed.read().await));
        }
        out
    }

    /// Every retained event of one layer.
    pub async fn query(&self, layer: EventType) -> Vec<Event> {
        match self.layers.get(&layer) {
            Some(slot) => slot.committed.read().await.events.clone(),
            None => Vec::new(),
        }
    }

    /// Every retained event across all layers, in layer order.
    pub async fn query_all(&self) -> Vec<Event> {
        let committed = self.committed_layers().await;
        committed.values().flat_map(|d| d.events.iter().cloned()).collect()
    }

    /// The current risk snapshot.
    pub async fn risk(&self) -> RiskLevel {
        (**self.risk.read().await).clone()
    }

    /// The current hotspot views.
    pub async fn hotspots(&self) -> Vec<Hotspot> {
        (**self.hotspots.read().await).clone()
    }

    /// The current country instability index, highest score first.
    pub async fn instability(&self) -> Vec<CountryInstability> {
        (**self.instability.read().await).clone()
    }

    /// Count and freshness of every layer.
    pub async fn layers(&self) -> Vec<LayerSummary> {
        let committed = self.committed_layers().await;
        committed
            .iter()
            .map(|(t, data)| LayerSummary {
                layer: *t,
                count: data.events.len(),
                last_updated: data.last_updated,
                active: !data.events.is_empty(),
                derived: t.is_derived(),
            })
            .collect()
    }

    /// A consistent view of every layer plus the risk of the same commit.
    pub async fn snapshot(&self) -> StoreSnapshot {
        let _fusion_guard = self.fusion.lock().await;
        self.snapshot_locked().await
    }

    async fn snapshot_locked(&self) -> StoreSnapshot {
        let committed = self.committed_layers().await;
        StoreSnapshot {
            layers: committed
                .iter()
                .map(|(t, d)| (*t, d.events.clone()))
                .collect(),
            risk: self.risk().await,
        }
    }

    /// Register an observer and queue its `initial_state`.
    ///
    /// Subscription and snapshot happen under the fusion lock, so the
    /// observer receives every later commit exactly once and none twice.
    pub async fn connect_observer(&self, capacity: usize) -> Subscription {
        let _fusion_guard = self.fusion.lock().await;
        let initial = self.snapshot_locked().await.initial_state();
        self.distributor
            .register_with(capacity, Some(Arc::new(initial)))
            .await
    }

    /// Number of connected observers.
    pub async fn observer_count(&self) -> usize {
        self.distributor.observer_count().await
    }
}

/// Evict events older than the age bound, then all but the newest
/// `max_events_per_layer`. Keeps the layer ordered oldest first.
fn apply_retention(
    events: &mut Vec<Event>,
    retention: &RetentionConfig,
    now: DateTime<Utc>,
) -> usize {
    let before = events.len();
    if let Some(cutoff) = retention.max_age().and_then(|age| now.checked_sub_signed(age)) {
        events.retain(|e| e.timestamp >= cutoff);
    }
    events.sort_by_key(|e| e.timestamp);
    let excess = events.len().saturating_sub(retention.max_events_per_layer);
    if excess > 0 {
        events.drain(..excess);
    }
    before.saturating_sub(events.len())
}

/// Run one derived computation, turning a panic into `None`.
fn isolate<T>(view: &'static str, compute: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(compute)) {
        Ok(value) => Some(value),
        Err(_panic) => {
            error!(view, "Derived view computation failed, keeping previous state");
            None
        }
    }
}

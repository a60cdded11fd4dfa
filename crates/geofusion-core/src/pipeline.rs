//! Per-batch orchestration from raw records to committed layers.
//!
//! Everything that may wait on the outside world happens here, before any
//! store lock is taken: normalization (which may geocode) and semantic
//! verification of ambiguous duplicate pairs. The store then only runs
//! the short, deterministic commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt as _;
use geofusion_db::EventLog;
use geofusion_types::{Event, EventType, RawRecord, RejectReason};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::normalizer::Normalizer;
use crate::store::{EventStore, IngestMode, IngestReport};
use crate::verify::{GuardedVerifier, Verdicts};

/// Records normalized concurrently within one batch.
const NORMALIZE_CONCURRENCY: usize = 8;

/// Outcome of one [`Pipeline::process`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    /// Collector that produced the batch.
    pub source: String,
    /// Raw records received.
    pub received: usize,
    /// Rejected records per reason.
    pub rejected: BTreeMap<RejectReason, usize>,
    /// One report per committed layer.
    pub layers: Vec<IngestReport>,
    /// Layers whose ingest was refused, with the reason.
    pub failed: Vec<(EventType, String)>,
}

impl BatchReport {
    /// Total rejected records.
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }

    /// Events that entered a layer, new or superseding.
    pub fn stored_total(&self) -> usize {
        self.layers.iter().map(|l| l.stored.len()).sum()
    }

    /// The report for one layer, if it was committed.
    pub fn layer(&self, layer: EventType) -> Option<&IngestReport> {
        self.layers.iter().find(|l| l.layer == layer)
    }
}

/// Normalizes, verifies and ingests collector batches.
pub struct Pipeline {
    store: Arc<EventStore>,
    normalizer: Normalizer,
    verifier: GuardedVerifier,
    log: Arc<EventLog>,
}

impl Pipeline {
    /// Wire a pipeline around a store and its durable log.
    pub fn new(
        store: Arc<EventStore>,
        normalizer: Normalizer,
        verifier: GuardedVerifier,
        log: Arc<EventLog>,
    ) -> Self {
        Self {
            store,
            normalizer,
            verifier,
            log,
        }
    }

    /// The store batches are committed to.
    pub const fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// The durable log accepted events are appended to.
    pub const fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Process one collector batch.
    ///
    /// Malformed records are rejected and counted; the rest of the batch
    /// goes through. Events are grouped by their resolved layer, so a
    /// collector may emit several layers in one batch. In replace mode the
    /// collector's own layer is always committed, even when the batch is
    /// empty, so a feed that stops reporting clears its layer.
    pub async fn process(
        &self,
        source_name: &str,
        source_type: EventType,
        mode: IngestMode,
        records: Vec<RawRecord>,
    ) -> BatchReport {
        let received = records.len();
        let normalizer = &self.normalizer;
        let outcomes: Vec<_> = futures::stream::iter(records)
            .map(|raw| async move { normalizer.normalize(&raw, source_type).await })
            .buffered(NORMALIZE_CONCURRENCY)
            .collect()
            .await;

        let mut rejected: BTreeMap<RejectReason, usize> = BTreeMap::new();
        let mut grouped: BTreeMap<EventType, Vec<Event>> = BTreeMap::new();
        if mode == IngestMode::Replace {
            grouped.entry(source_type).or_default();
        }
        for outcome in outcomes {
            match outcome {
                Ok(event) => grouped.entry(event.event_type).or_default().push(event),
                Err(rejection) => {
                    warn!(
                        source = source_name,
                        reason = %rejection.reason,
                        detail = rejection.detail,
                        "Record rejected"
                    );
                    let n = rejected.entry(rejection.reason).or_default();
                    *n = n.saturating_add(1);
                }
            }
        }

        let mut report = BatchReport {
            source: source_name.to_owned(),
            received,
            rejected,
            layers: Vec::new(),
            failed: Vec::new(),
        };

        for (layer, events) in grouped {
            let verdicts = self.verdicts_for(layer, &events, mode).await;
            match self.store.ingest_with(layer, events, mode, &verdicts).await {
                Ok(ingest) => {
                    if !ingest.stored.is_empty() {
                        self.log.append(layer, &ingest.stored).await;
                    }
                    report.layers.push(ingest);
                }
                Err(e) => {
                    error!(source = source_name, layer = %layer, error = %e, "Ingest refused");
                    report.failed.push((layer, e.to_string()));
                }
            }
        }

        info!(
            source = source_name,
            received,
            rejected = report.rejected_total(),
            stored = report.stored_total(),
            layers = report.layers.len(),
            "Batch processed"
        );
        report
    }

    /// Ask the verifier about every ambiguous pair the commit will meet:
    /// batch events against the layer's retained events (merge mode) and
    /// against earlier events of the same batch.
    async fn verdicts_for(&self, layer: EventType, batch: &[Event], mode: IngestMode) -> Verdicts {
        let retained = match mode {
            IngestMode::Merge => self.store.query(layer).await,
            IngestMode::Replace => Vec::new(),
        };
        let dedup = self.store.deduplicator();

        let mut pairs = Vec::new();
        for (i, new) in batch.iter().enumerate() {
            pairs.extend(dedup.ambiguous_pairs(new, &retained));
            pairs.extend(dedup.ambiguous_pairs(new, batch.get(..i).unwrap_or_default()));
        }
        if pairs.is_empty() {
            return Verdicts::new();
        }

        debug!(layer = %layer, pairs = pairs.len(), "Verifying ambiguous pairs");
        self.verifier.judge_all(pairs).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use geofusion_types::{CellKey, OutboundMessage};
    use serde_json::json;

    use super::*;
    use crate::config::FusionConfig;
    use crate::geocode::NullGeocoder;
    use crate::verify::{Verdict, Verifier, VerifyError};

    fn raw(kind: &str, id: &str, lat: f64, lon: f64, minute: u32) -> RawRecord {
        RawRecord::from_value(json!({
            "type": kind,
            "id": id,
            "source": "test-feed",
            "latitude": lat,
            "longitude": lon,
            "timestamp": format!("2026-03-01T12:{minute:02}:00Z"),
            "title": id,
        }))
        .unwrap()
    }

    fn pipeline_with(verifier: GuardedVerifier) -> Pipeline {
        let config = FusionConfig::default();
        let store = Arc::new(EventStore::new(&config));
        let normalizer = Normalizer::new(config.severity, Arc::new(NullGeocoder));
        Pipeline::new(store, normalizer, verifier, Arc::new(EventLog::in_memory(100)))
    }

    fn pipeline() -> Pipeline {
        pipeline_with(GuardedVerifier::disabled())
    }

    fn quakes(n: u32) -> Vec<RawRecord> {
        (0..n)
            .map(|i| {
                let offset = 0.15 * f64::from(i);
                raw("earthquake", &format!("q{i}"), 34.05 + offset, -117.95 + offset, i)
            })
            .collect()
    }

    #[tokio::test]
    async fn hotspot_then_convergence() {
        let p = pipeline();
        p.process("usgs", EventType::Earthquake, IngestMode::Merge, quakes(6))
            .await;

        let hotspots = p.store().hotspots().await;
        assert_eq!(hotspots.len(), 1);
        let hs = hotspots.first().unwrap();
        assert_eq!(hs.cell, CellKey { lat: 34, lon: -118 });
        assert_eq!(hs.count, 6);
        assert!(p.store().query(EventType::Convergence).await.is_empty());

        p.process("otx", EventType::Cyber, IngestMode::Merge, vec![raw("cyber", "c1", 34.5, -117.5, 6)])
            .await;
        p.process(
            "acled",
            EventType::Conflict,
            IngestMode::Merge,
            vec![raw("conflict", "k1", 34.6, -117.6, 7)],
        )
        .await;

        let alerts = p.store().query(EventType::Convergence).await;
        assert_eq!(alerts.len(), 1);
        let types = alerts
            .first()
            .and_then(|a| a.metadata.get("contributing_types"))
            .cloned();
        assert_eq!(types, Some(json!(["earthquake", "conflict", "cyber"])));
    }

    #[tokio::test]
    async fn malformed_records_are_counted_and_skipped() {
        let p = pipeline();
        let mut records = quakes(2);
        records.push(RawRecord::from_value(json!({"type": "earthquake", "latitude": 1.0, "longitude": 1.0})).unwrap());
        records.push(RawRecord::from_value(json!({"type": "earthquake", "latitude": 91.0, "longitude": 1.0, "time": 1_772_366_400})).unwrap());
        records.push(RawRecord::from_value(json!({"type": "earthquake", "place": "Atlantis", "time": 1_772_366_400})).unwrap());

        let report = p
            .process("usgs", EventType::Earthquake, IngestMode::Merge, records)
            .await;
        assert_eq!(report.received, 5);
        assert_eq!(report.rejected_total(), 3);
        assert_eq!(report.rejected.get(&RejectReason::MissingTimestamp), Some(&1));
        assert_eq!(report.rejected.get(&RejectReason::InvalidCoordinate), Some(&1));
        assert_eq!(report.rejected.get(&RejectReason::UnresolvableLocation), Some(&1));
        assert_eq!(p.store().query(EventType::Earthquake).await.len(), 2);
    }

    #[tokio::test]
    async fn accepted_events_reach_the_log_once() {
        let p = pipeline();
        p.process("usgs", EventType::Earthquake, IngestMode::Merge, quakes(3))
            .await;
        let again = p
            .process("usgs", EventType::Earthquake, IngestMode::Merge, quakes(3))
            .await;
        assert_eq!(again.stored_total(), 0);
        assert_eq!(again.layer(EventType::Earthquake).unwrap().discarded, 3);
        assert_eq!(p.log().recent(EventType::Earthquake, 10).await.len(), 3);
    }

    #[tokio::test]
    async fn mixed_batches_split_by_layer() {
        let p = pipeline();
        let records = vec![
            raw("aircraft", "a1", 10.0, 10.0, 0),
            raw("military_aircraft", "m1", 11.0, 11.0, 0),
        ];
        let report = p
            .process("opensky", EventType::Aircraft, IngestMode::Merge, records)
            .await;
        assert_eq!(report.layers.len(), 2);
        assert_eq!(p.store().query(EventType::MilitaryAircraft).await.len(), 1);
    }

    #[tokio::test]
    async fn replace_with_empty_batch_clears_layer() {
        let p = pipeline();
        p.process(
            "opensky",
            EventType::Aircraft,
            IngestMode::Replace,
            vec![raw("aircraft", "a1", 10.0, 10.0, 0)],
        )
        .await;
        assert_eq!(p.store().query(EventType::Aircraft).await.len(), 1);

        p.process("opensky", EventType::Aircraft, IngestMode::Replace, Vec::new())
            .await;
        assert!(p.store().query(EventType::Aircraft).await.is_empty());
    }

    struct AlwaysDistinct;

    #[async_trait]
    impl Verifier for AlwaysDistinct {
        async fn judge(&self, _a: &Event, _b: &Event) -> Result<Verdict, VerifyError> {
            Ok(Verdict::Distinct)
        }
    }

    fn titled(id: &str, title: &str) -> RawRecord {
        RawRecord::from_value(json!({
            "type": "conflict",
            "id": id,
            "source": "test-feed",
            "latitude": 48.5,
            "longitude": 35.0,
            "timestamp": "2026-03-01T12:00:00Z",
            "title": title,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn verifier_distinct_keeps_both_events() {
        let p = pipeline_with(GuardedVerifier::new(Arc::new(AlwaysDistinct), Duration::from_secs(1)));
        p.process(
            "acled",
            EventType::Conflict,
            IngestMode::Merge,
            vec![titled("x1", "Artillery shelling reported near river crossing")],
        )
        .await;
        p.process(
            "gdelt",
            EventType::Conflict,
            IngestMode::Merge,
            vec![titled("x2", "Drone strike hits fuel depot overnight")],
        )
        .await;
        assert_eq!(p.store().query(EventType::Conflict).await.len(), 2);
    }

    #[tokio::test]
    async fn without_verifier_ambiguous_pair_collapses() {
        let p = pipeline();
        p.process(
            "acled",
            EventType::Conflict,
            IngestMode::Merge,
            vec![titled("x1", "Artillery shelling reported near river crossing")],
        )
        .await;
        p.process(
            "gdelt",
            EventType::Conflict,
            IngestMode::Merge,
            vec![titled("x2", "Drone strike hits fuel depot overnight")],
        )
        .await;
        assert_eq!(p.store().query(EventType::Conflict).await.len(), 1);
    }

    #[tokio::test]
    async fn observers_see_each_layer_commit() {
        let p = pipeline();
        let mut sub = p.store().connect_observer(32).await;
        p.process("usgs", EventType::Earthquake, IngestMode::Merge, quakes(1))
            .await;

        let first = sub.rx.recv().await.unwrap();
        assert!(matches!(&*first, OutboundMessage::InitialState { .. }));
        let batch = sub.rx.recv().await.unwrap();
        assert!(matches!(
            &*batch,
            OutboundMessage::EventBatch { layer: EventType::Earthquake, data, .. } if data.len() == 1
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn batches_can_be_processed_on_spawned_tasks() {
        let p = Arc::new(pipeline());
        let handles: Vec<_> = ["earthquake", "cyber"]
            .into_iter()
            .map(|kind| {
                let p = Arc::clone(&p);
                let layer: EventType = kind.parse().unwrap();
                tokio::spawn(async move {
                    let records = vec![raw(kind, kind, 20.0, 20.0, 0), raw(kind, "other", 40.0, 40.0, 1)];
                    p.process("spawned", layer, IngestMode::Merge, records).await
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().stored_total(), 2);
        }
        assert_eq!(p.store().query_all().await.len(), 4);
    }
}

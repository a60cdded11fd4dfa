//! Integration tests for the `geofusion-db` event log.
//!
//! These tests require a live `Dragonfly` (or Redis) instance. Run with:
//!
//! ```bash
//! docker run -d -p 6379:6379 docker.dragonflydb.io/dragonflydb/dragonfly
//! cargo test -p geofusion-db -- --ignored
//! ```
//!
//! All tests are marked `#[ignore]` so they are skipped during normal
//! `cargo test` runs.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]

use std::collections::BTreeMap;

use chrono::Utc;
use geofusion_db::{DragonflyLog, EventLog};
use geofusion_types::{Event, EventId, EventType, Severity};

/// Dragonfly connection URL for the local Docker instance.
const DRAGONFLY_URL: &str = "redis://localhost:6379";

fn event(n: u32) -> Event {
    Event {
        id: EventId::derive("it", &n.to_string()),
        event_type: EventType::Fire,
        latitude: 37.5,
        longitude: -120.5,
        severity: Severity::new(3).unwrap(),
        timestamp: Utc::now(),
        source: String::from("it"),
        title: format!("fire {n}"),
        description: String::new(),
        metadata: BTreeMap::new(),
    }
}

#[tokio::test]
#[ignore = "requires a live Dragonfly instance"]
async fn dragonfly_list_is_capped() {
    let durable = DragonflyLog::connect(DRAGONFLY_URL, "geofusion-it-cap", 3)
        .await
        .expect("Failed to connect to Dragonfly -- is Docker running?");
    durable.clear(EventType::Fire).await.unwrap();

    let events: Vec<Event> = (0..5).map(event).collect();
    durable.append(EventType::Fire, &events).await.unwrap();

    let recent = durable.recent(EventType::Fire, 10).await.unwrap();
    let titles: Vec<&str> = recent.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, ["fire 2", "fire 3", "fire 4"]);
    durable.clear(EventType::Fire).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live Dragonfly instance"]
async fn durable_and_memory_logs_agree() {
    let durable = DragonflyLog::connect(DRAGONFLY_URL, "geofusion-it-eq", 4)
        .await
        .expect("Failed to connect to Dragonfly -- is Docker running?");
    durable.clear(EventType::Fire).await.unwrap();

    let with_dragonfly = EventLog::with_durable(durable.clone(), 4);
    let memory_only = EventLog::in_memory(4);
    assert!(with_dragonfly.is_durable());

    for batch in [vec![event(1), event(2)], vec![event(3)], vec![event(4), event(5)]] {
        with_dragonfly.append(EventType::Fire, &batch).await;
        memory_only.append(EventType::Fire, &batch).await;
    }

    for count in [0, 1, 3, 10] {
        assert_eq!(
            with_dragonfly.recent(EventType::Fire, count).await,
            memory_only.recent(EventType::Fire, count).await,
            "count = {count}"
        );
    }
    durable.clear(EventType::Fire).await.unwrap();
}

//! `Dragonfly` (Redis-compatible) event log.
//!
//! Each layer is an append-only capped list of JSON-encoded events.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `{prefix}:{layer}` | List | Events in append order, capped at `max_len` |

use async_trait::async_trait;
use fred::prelude::*;
use geofusion_types::{Event, EventType};

use crate::error::DbError;
use crate::log::DurableLog;

/// Connection handle to a `Dragonfly` instance holding the event log.
#[derive(Clone)]
pub struct DragonflyLog {
    client: Client,
    prefix: String,
    max_len: usize,
}

impl DragonflyLog {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL follows the Redis URL scheme: `redis://host:port[/db]`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str, prefix: &str, max_len: usize) -> Result<Self, DbError> {
        let config = Config::from_url(url)
            .map_err(|e| DbError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!(prefix, max_len, "Connected to Dragonfly event log");
        Ok(Self {
            client,
            prefix: prefix.to_owned(),
            max_len,
        })
    }

    /// Key of the list holding `layer`.
    pub fn key(&self, layer: EventType) -> String {
        format!("{}:{layer}", self.prefix)
    }

    /// Append events to the layer's list and trim it to `max_len`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if an event cannot be encoded.
    /// Returns [`DbError::Dragonfly`] if the write fails.
    pub async fn append(&self, layer: EventType, events: &[Event]) -> Result<(), DbError> {
        if events.is_empty() {
            return Ok(());
        }
        let key = self.key(layer);
        let mut values = Vec::with_capacity(events.len());
        for event in events {
            values.push(serde_json::to_string(event)?);
        }
        let _: u64 = self.client.rpush(&key, values).await?;

        let keep = i64::try_from(self.max_len).unwrap_or(i64::MAX);
        let _: () = self
            .client
            .ltrim(&key, keep.saturating_neg(), -1)
            .await?;
        Ok(())
    }

    /// The most recent `count` events of the layer, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if a stored entry cannot be decoded.
    /// Returns [`DbError::Dragonfly`] if the read fails.
    pub async fn recent(&self, layer: EventType, count: usize) -> Result<Vec<Event>, DbError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let key = self.key(layer);
        let start = i64::try_from(count).unwrap_or(i64::MAX).saturating_neg();
        let values: Vec<String> = self.client.lrange(&key, start, -1).await?;
        let mut events = Vec::with_capacity(values.len());
        for v in &values {
            events.push(serde_json::from_str(v)?);
        }
        Ok(events)
    }

    /// Overwrite the layer's list with `events`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the delete or the write fails.
    pub async fn replace(&self, layer: EventType, events: &[Event]) -> Result<(), DbError> {
        self.clear(layer).await?;
        self.append(layer, events).await
    }

    /// Delete the layer's list.
    ///
    /// **WARNING:** This deletes data. Only use for testing.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the delete fails.
    pub async fn clear(&self, layer: EventType) -> Result<(), DbError> {
        let key = self.key(layer);
        let _: u32 = self.client.del(&key).await?;
        Ok(())
    }
}

#[async_trait]
impl DurableLog for DragonflyLog {
    async fn append(&self, layer: EventType, events: &[Event]) -> Result<(), DbError> {
        Self::append(self, layer, events).await
    }

    async fn recent(&self, layer: EventType, count: usize) -> Result<Vec<Event>, DbError> {
        Self::recent(self, layer, count).await
    }

    async fn replace(&self, layer: EventType, events: &[Event]) -> Result<(), DbError> {
        Self::replace(self, layer, events).await
    }
}

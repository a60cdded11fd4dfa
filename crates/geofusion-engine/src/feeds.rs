//! Generic HTTP JSON feed collector.
//!
//! One [`HttpFeedCollector`] per entry of the `sources` config list. Each
//! poll GETs the feed URL, picks the record array (the whole document, or
//! the value at `records_pointer`), and hands the elements on as raw
//! records. GeoJSON features are flattened so their properties and point
//! coordinates sit at the top level where the normalizer looks for them.

use std::time::Duration;

use async_trait::async_trait;
use geofusion_core::collector::{Collector, CollectorError};
use geofusion_core::config::SourceConfig;
use geofusion_core::store::IngestMode;
use geofusion_types::{EventType, RawRecord};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::EngineError;

/// User agent sent with every feed request.
pub const USER_AGENT: &str = concat!("geofusion/", env!("CARGO_PKG_VERSION"));

/// Collector for one configured JSON feed.
pub struct HttpFeedCollector {
    config: SourceConfig,
    client: reqwest::Client,
}

impl HttpFeedCollector {
    /// Build a collector for `config`.
    pub fn new(config: SourceConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()
            .map_err(|e| EngineError::Http {
                message: format!("feed client for {}: {e}", config.name),
            })?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Collector for HttpFeedCollector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn layer(&self) -> EventType {
        self.config.layer
    }

    fn mode(&self) -> IngestMode {
        self.config.mode
    }

    fn interval(&self) -> Duration {
        self.config.interval()
    }

    fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    async fn collect(&self) -> Result<Vec<RawRecord>, CollectorError> {
        let response = self
            .client
            .get(&self.config.url)
            .send()
            .await
            .map_err(|e| CollectorError::Fetch(format!("{}: {e}", self.config.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::Fetch(format!(
                "{} returned {status}",
                self.config.url
            )));
        }

        let document: Value = response
            .json()
            .await
            .map_err(|e| CollectorError::Payload(format!("not JSON: {e}")))?;

        let records = extract_records(
            document,
            self.config.records_pointer.as_deref(),
            &self.config.name,
        )?;
        debug!(collector = self.config.name, records = records.len(), "Feed fetched");
        Ok(records)
    }
}

/// Pull the record array out of a feed document.
///
/// Non-object elements are skipped. Records without a `source` get
/// `default_source`.
pub fn extract_records(
    document: Value,
    pointer: Option<&str>,
    default_source: &str,
) -> Result<Vec<RawRecord>, CollectorError> {
    let selected = match pointer {
        Some(p) => document
            .pointer(p)
            .cloned()
            .ok_or_else(|| CollectorError::Payload(format!("no value at {p}")))?,
        None => document,
    };
    let Value::Array(items) = selected else {
        return Err(CollectorError::Payload(String::from(
            "expected an array of records",
        )));
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(fields) => Some(fields),
            _ => None,
        })
        .map(|fields| {
            let mut fields = flatten_feature(fields);
            fields
                .entry("source")
                .or_insert_with(|| Value::String(default_source.to_owned()));
            RawRecord::new(fields)
        })
        .collect())
}

/// Lift a GeoJSON point feature's properties and coordinates to the top
/// level. Anything else is returned unchanged.
fn flatten_feature(mut fields: Map<String, Value>) -> Map<String, Value> {
    let Some(Value::Object(properties)) = fields.remove("properties") else {
        return fields;
    };
    let geometry = fields.remove("geometry");

    let mut flat = properties;
    if let Some(id) = fields.remove("id") {
        flat.entry("id").or_insert(id);
    }
    let coordinates = geometry
        .as_ref()
        .and_then(|g| g.get("coordinates"))
        .and_then(Value::as_array);
    if let Some(coordinates) = coordinates {
        // GeoJSON order is [lon, lat, depth].
        let mut it = coordinates.iter();
        if let (Some(lon), Some(lat)) = (it.next(), it.next()) {
            flat.insert(String::from("longitude"), lon.clone());
            flat.insert(String::from("latitude"), lat.clone());
        }
        if let Some(depth) = it.next() {
            flat.entry("depth_km").or_insert_with(|| depth.clone());
        }
    }
    flat
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn geojson_features_are_flattened() {
        let document = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "id": "ci40123456",
                "properties": {"mag": 4.2, "time": 1_772_366_400_000_u64, "place": "10km N of Ridgecrest"},
                "geometry": {"type": "Point", "coordinates": [-117.6, 35.7, 8.1]}
            }]
        });
        let records = extract_records(document, Some("/features"), "USGS").unwrap();
        assert_eq!(records.len(), 1);
        let r = records.first().unwrap();
        assert_eq!(r.get("id"), Some(&json!("ci40123456")));
        assert_eq!(r.get("latitude"), Some(&json!(35.7)));
        assert_eq!(r.get("longitude"), Some(&json!(-117.6)));
        assert_eq!(r.get("depth_km"), Some(&json!(8.1)));
        assert_eq!(r.get("source"), Some(&json!("USGS")));
        assert!(r.get("properties").is_none());
    }

    #[test]
    fn plain_records_keep_their_source() {
        let document = json!([
            {"id": "a", "source": "ACLED", "lat": 1.0, "lon": 2.0},
            "not a record",
            {"id": "b", "lat": 3.0, "lon": 4.0}
        ]);
        let records = extract_records(document, None, "fallback").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records.first().unwrap().get("source"), Some(&json!("ACLED")));
        assert_eq!(records.last().unwrap().get("source"), Some(&json!("fallback")));
    }

    #[test]
    fn missing_pointer_is_a_payload_error() {
        let err = extract_records(json!({"data": []}), Some("/features"), "x").unwrap_err();
        assert!(matches!(err, CollectorError::Payload(_)));
        let err = extract_records(json!({"data": []}), None, "x").unwrap_err();
        assert!(matches!(err, CollectorError::Payload(_)));
    }
}

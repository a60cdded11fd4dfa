//! Loosely-typed records produced by collectors.
//!
//! Collectors are schema-agnostic: they hand the engine JSON objects in
//! whatever shape their feed uses. The normalizer is the only component
//! that interprets the fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One raw record as returned by a collector's `collect()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    /// Wrap a JSON object.
    pub const fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build a record from an arbitrary JSON value; non-objects yield `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Look up a top-level field; `null` counts as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// The first present field among `keys`.
    pub fn first_of(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().find_map(|k| self.get(k))
    }

    /// A string field, trimmed; empty strings count as absent.
    pub fn str_field(&self, keys: &[&str]) -> Option<&str> {
        self.first_of(keys)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// The `metadata` object, when present.
    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.get("metadata").and_then(Value::as_object)
    }

    /// Canonical JSON text of the whole record.
    ///
    /// Object keys are sorted at every depth, so two byte-identical inputs
    /// (and two inputs differing only in key order) produce the same text.
    pub fn canonical_json(&self) -> String {
        canonicalize(&Value::Object(self.0.clone())).to_string()
    }

    /// Borrow the underlying map.
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Rebuild `value` with object keys inserted in sorted order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::with_capacity(map.len());
            for key in keys {
                if let Some(v) = map.get(key) {
                    out.insert(key.clone(), canonicalize(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn from_value_rejects_non_objects() {
        assert!(RawRecord::from_value(serde_json::json!([1, 2])).is_none());
        assert!(RawRecord::from_value(serde_json::json!({"a": 1})).is_some());
    }

    #[test]
    fn null_fields_are_absent() {
        let r = RawRecord::from_value(serde_json::json!({"lat": null, "latitude": 3.0})).unwrap();
        assert_eq!(r.first_of(&["lat", "latitude"]), Some(&serde_json::json!(3.0)));
    }

    #[test]
    fn canonical_json_ignores_key_order() {
        let a: RawRecord = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b: RawRecord = serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(a.canonical_json(), b.canonical_json());
    }
}

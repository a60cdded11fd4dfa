//! Place-name resolution.
//!
//! The normalizer only consults a geocoder when a raw record carries no
//! coordinates. Backends implement [`Geocoder`]; the normalizer always goes
//! through [`CachedGeocoder`], which memoizes answers by normalized place
//! name and bounds every backend call with a timeout. A lookup that fails
//! or times out is reported as an error and never cached, so a transient
//! outage does not poison the cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A resolved position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// Errors from a geocoding backend.
#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    /// The backend did not answer within the configured timeout.
    #[error("geocoding timed out after {0:?}")]
    Timeout(Duration),

    /// The backend could not be reached or returned an unusable answer.
    #[error("geocoding backend error: {0}")]
    Backend(String),
}

/// Resolves a place name to coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve `place`. `Ok(None)` means the backend answered and does not
    /// know the place.
    async fn resolve(&self, place: &str) -> Result<Option<Coordinates>, GeocodeError>;
}

/// Geocoder that knows nothing. Used when no backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullGeocoder;

#[async_trait]
impl Geocoder for NullGeocoder {
    async fn resolve(&self, _place: &str) -> Result<Option<Coordinates>, GeocodeError> {
        Ok(None)
    }
}

/// Static place-name table, matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct GazetteerGeocoder {
    places: HashMap<String, Coordinates>,
}

impl GazetteerGeocoder {
    /// Build from a `name -> [lat, lon]` table.
    pub fn new(table: &BTreeMap<String, [f64; 2]>) -> Self {
        let places = table
            .iter()
            .map(|(name, [lat, lon])| {
                (
                    cache_key(name),
                    Coordinates {
                        latitude: *lat,
                        longitude: *lon,
                    },
                )
            })
            .collect();
        Self { places }
    }

    /// Number of known places.
    pub fn len(&self) -> usize {
        self.places.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }
}

#[async_trait]
impl Geocoder for GazetteerGeocoder {
    async fn resolve(&self, place: &str) -> Result<Option<Coordinates>, GeocodeError> {
        Ok(self.places.get(&cache_key(place)).copied())
    }
}

/// Tries each backend in order until one knows the place.
///
/// A backend error is logged and the next backend is tried; the chain only
/// reports an error when every backend failed.
pub struct ChainGeocoder {
    backends: Vec<Arc<dyn Geocoder>>,
}

impl ChainGeocoder {
    /// Build a chain from ordered backends.
    pub fn new(backends: Vec<Arc<dyn Geocoder>>) -> Self {
        Self { backends }
    }
}

#[async_trait]
impl Geocoder for ChainGeocoder {
    async fn resolve(&self, place: &str) -> Result<Option<Coordinates>, GeocodeError> {
        let mut last_error = None;
        let mut answered = false;
        for backend in &self.backends {
            match backend.resolve(place).await {
                Ok(Some(coords)) => return Ok(Some(coords)),
                Ok(None) => answered = true,
                Err(e) => {
                    warn!(place, error = %e, "Geocoding backend failed, trying next");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(None),
        }
    }
}

/// Memoizing, timeout-guarded front for any [`Geocoder`].
pub struct CachedGeocoder {
    inner: Arc<dyn Geocoder>,
    timeout: Duration,
    cache: RwLock<HashMap<String, Option<Coordinates>>>,
}

impl CachedGeocoder {
    /// Wrap `inner` with a cache and a per-call timeout.
    pub fn new(inner: Arc<dyn Geocoder>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Number of cached answers (hits and known misses).
    pub async fn cached(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[async_trait]
impl Geocoder for CachedGeocoder {
    async fn resolve(&self, place: &str) -> Result<Option<Coordinates>, GeocodeError> {
        let key = cache_key(place);
        if key.is_empty() {
            return Ok(None);
        }
        if let Some(hit) = self.cache.read().await.get(&key) {
            debug!(place, "Geocode cache hit");
            return Ok(*hit);
        }

        let answer = tokio::time::timeout(self.timeout, self.inner.resolve(place))
            .await
            .map_err(|_elapsed| GeocodeError::Timeout(self.timeout))??;

        self.cache.write().await.insert(key, answer);
        Ok(answer)
    }
}

fn cache_key(place: &str) -> String {
    place.trim().to_lowercase()
}

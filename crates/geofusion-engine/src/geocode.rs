//! Nominatim geocoding backend.
//!
//! Queried after the static gazetteer, behind the core's cache and timeout
//! wrapper. Nominatim's usage policy asks for an identifying user agent
//! and at most one request per second; the cache keeps repeat lookups off
//! the wire.

use async_trait::async_trait;
use geofusion_core::geocode::{Coordinates, GeocodeError, Geocoder};
use serde::Deserialize;

use crate::error::EngineError;
use crate::feeds::USER_AGENT;

/// One search hit. Nominatim encodes coordinates as strings.
#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

/// Resolves place names through a Nominatim `/search` endpoint.
pub struct NominatimGeocoder {
    client: reqwest::Client,
    url: String,
}

impl NominatimGeocoder {
    /// Build a geocoder for the search endpoint at `url`.
    pub fn new(url: &str) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| EngineError::Http {
                message: format!("geocoder client: {e}"),
            })?;
        Ok(Self {
            client,
            url: url.to_owned(),
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn resolve(&self, place: &str) -> Result<Option<Coordinates>, GeocodeError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("q", place), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .map_err(|e| GeocodeError::Backend(format!("Nominatim request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Backend(format!("Nominatim returned {status}")));
        }

        let hits: Vec<Place> = response
            .json()
            .await
            .map_err(|e| GeocodeError::Backend(format!("Nominatim response parse failed: {e}")))?;

        Ok(hits.first().and_then(parse_place))
    }
}

fn parse_place(place: &Place) -> Option<Coordinates> {
    let latitude = place.lat.trim().parse::<f64>().ok()?;
    let longitude = place.lon.trim().parse::<f64>().ok()?;
    Some(Coordinates {
        latitude,
        longitude,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_string_coordinates() {
        let hits: Vec<Place> =
            serde_json::from_str(r#"[{"lat": "50.4500336", "lon": "30.5241361", "display_name": "Kyiv"}]"#)
                .unwrap();
        let coords = hits.first().and_then(parse_place).unwrap();
        assert!((coords.latitude - 50.450_033_6).abs() < 1e-9);
        assert!((coords.longitude - 30.524_136_1).abs() < 1e-9);
    }

    #[test]
    fn garbage_coordinates_are_not_found() {
        let place = Place {
            lat: String::from("north"),
            lon: String::from("30.5"),
        };
        assert!(parse_place(&place).is_none());
    }
}

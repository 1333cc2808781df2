#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the metalert search server.
//!
//! The search payload is checked field by field so that each malformed
//! parameter gets its own 400 message. These types are separate from the
//! core search types to allow independent evolution of the API contract.

use metalert_models::{BoundingBox, SearchHit, SearchResponse, VerticalRange};
use serde::Serialize;
use serde_json::Value;

/// Reasons a search payload is rejected. The `Display` text is the
/// response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// Body missing or not a JSON object.
    #[error("Could not parse JSON payload")]
    NotJson,

    /// `polygon` missing or not a Polygon/MultiPolygon.
    #[error(
        "Payload must contain an object named 'polygon' cotaining a valid geoJson Polygon or MultiPolygon"
    )]
    Polygon,

    /// `vertical` is not two ordered numbers.
    #[error("The 'vertical' search parameter must be a list of 2 integers or floats")]
    Vertical,

    /// `cutoff` is not a number in `(0, 1]`.
    #[error("The 'cutoff' search parameter must be a float in the interval (0.0, 1.0]")]
    Cutoff,

    /// `maxres` is not a positive integer.
    #[error("The 'maxres' search parameter must be an integer larger than 0")]
    MaxResults,
}

/// A type-checked search payload. The polygon is still raw `GeoJSON`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Query geometry.
    pub polygon: Value,
    /// Vertical range filter for alerts.
    pub vertical: Option<VerticalRange>,
    /// Minimum overlap ratio.
    pub cutoff: Option<f64>,
    /// Maximum number of results.
    pub max_results: Option<usize>,
}

impl SearchRequest {
    /// Checks the fields of a `{polygon, vertical?, cutoff?, maxres?}`
    /// body. `null` counts as absent.
    ///
    /// # Errors
    ///
    /// Returns the [`PayloadError`] of the first malformed field.
    pub fn from_payload(payload: &Value) -> Result<Self, PayloadError> {
        let Value::Object(fields) = payload else {
            return Err(PayloadError::NotJson);
        };

        let polygon = match fields.get("polygon") {
            Some(polygon @ Value::Object(_)) => polygon.clone(),
            _ => return Err(PayloadError::Polygon),
        };

        let vertical = match fields.get("vertical") {
            None | Some(Value::Null) => None,
            Some(Value::Array(values)) => match values.as_slice() {
                [low, high] => {
                    let (Some(low), Some(high)) = (low.as_f64(), high.as_f64()) else {
                        return Err(PayloadError::Vertical);
                    };
                    Some(VerticalRange::new(low, high).ok_or(PayloadError::Vertical)?)
                }
                _ => return Err(PayloadError::Vertical),
            },
            Some(_) => return Err(PayloadError::Vertical),
        };

        let cutoff = match fields.get("cutoff") {
            None | Some(Value::Null) => None,
            Some(value) => match value.as_f64() {
                Some(cutoff) if cutoff > 0.0 && cutoff <= 1.0 => Some(cutoff),
                _ => return Err(PayloadError::Cutoff),
            },
        };

        let max_results = match fields.get("maxres") {
            None | Some(Value::Null) => None,
            Some(value) => match value.as_u64().and_then(|n| usize::try_from(n).ok()) {
                Some(n) if n > 0 => Some(n),
                _ => return Err(PayloadError::MaxResults),
            },
        };

        Ok(Self {
            polygon,
            vertical,
            cutoff,
            max_results,
        })
    }
}

/// One search result as returned by the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSearchHit {
    /// Record UUID.
    pub uuid: String,
    /// Alert identifier or map label.
    pub name: String,
    /// Fraction of the query polygon covered by the record.
    pub overlap: f64,
    /// Area of the record polygon.
    pub area: f64,
    /// Extent of the record polygon.
    pub bounds: BoundingBox,
}

impl From<SearchHit> for ApiSearchHit {
    fn from(hit: SearchHit) -> Self {
        Self {
            uuid: hit.uuid,
            name: hit.name,
            overlap: hit.overlap,
            area: hit.area,
            bounds: hit.bounds,
        }
    }
}

/// Response body of `POST /v1/search/{target}`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiSearchResponse {
    /// Number of results.
    pub records: usize,
    /// Result limit that was applied.
    pub maxres: usize,
    /// Accepted records.
    pub results: Vec<ApiSearchHit>,
}

impl From<SearchResponse> for ApiSearchResponse {
    fn from(response: SearchResponse) -> Self {
        Self {
            records: response.record_count,
            maxres: response.max_results,
            results: response.results.into_iter().map(ApiSearchHit::from).collect(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square() -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[[0.5, 0.5], [1.5, 0.5], [1.5, 1.5], [0.5, 1.5], [0.5, 0.5]]]
        })
    }

    fn with(key: &str, value: Value) -> Value {
        json!({"polygon": square(), key: value})
    }

    #[test]
    fn defaults_when_only_polygon_is_given() {
        let request = SearchRequest::from_payload(&json!({"polygon": square()})).unwrap();
        assert_eq!(request.polygon, square());
        assert_eq!(request.vertical, None);
        assert_eq!(request.cutoff, None);
        assert_eq!(request.max_results, None);
    }

    #[test]
    fn rejects_missing_polygon() {
        assert_eq!(
            SearchRequest::from_payload(&json!({})),
            Err(PayloadError::Polygon)
        );
        assert_eq!(
            SearchRequest::from_payload(&json!({"polygon": "square"})),
            Err(PayloadError::Polygon)
        );
        assert_eq!(
            SearchRequest::from_payload(&json!([1, 2])),
            Err(PayloadError::NotJson)
        );
    }

    #[test]
    fn checks_vertical() {
        for bad in [json!("abcdef"), json!([1]), json!(["1", "2"]), json!([5, 1])] {
            assert_eq!(
                SearchRequest::from_payload(&with("vertical", bad)),
                Err(PayloadError::Vertical)
            );
        }
        let ok = SearchRequest::from_payload(&with("vertical", json!([0, 1.5]))).unwrap();
        assert_eq!(ok.vertical, VerticalRange::new(0.0, 1.5));
    }

    #[test]
    fn checks_cutoff() {
        for bad in [json!("abc"), json!(-1.0), json!(0.0), json!(2.0)] {
            assert_eq!(
                SearchRequest::from_payload(&with("cutoff", bad)),
                Err(PayloadError::Cutoff)
            );
        }
        let ok = SearchRequest::from_payload(&with("cutoff", json!(1))).unwrap();
        assert_eq!(ok.cutoff, Some(1.0));
    }

    #[test]
    fn checks_maxres() {
        for bad in [json!("abc"), json!(-5), json!(0), json!(2.5)] {
            assert_eq!(
                SearchRequest::from_payload(&with("maxres", bad)),
                Err(PayloadError::MaxResults)
            );
        }
        let ok = SearchRequest::from_payload(&with("maxres", json!(100))).unwrap();
        assert_eq!(ok.max_results, Some(100));
    }

    #[test]
    fn response_uses_short_keys() {
        let body = serde_json::to_value(ApiSearchResponse::from(SearchResponse {
            record_count: 0,
            max_results: 1000,
            results: Vec::new(),
        }))
        .unwrap();
        assert_eq!(body, json!({"records": 0, "maxres": 1000, "results": []}));
    }
}

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Polygon overlap search.
//!
//! A search runs in two phases. The index first narrows the candidates to
//! records whose bounding box overlaps the query's (and, for alerts, whose
//! vertical interval meets the requested one). Each candidate's full
//! polygon is then loaded and intersected with the query polygon; it is
//! accepted when the intersection covers at least the cutoff fraction of
//! the query area. Results keep the order the index returned them in.

use metalert_config::Config;
use metalert_database::{DbError, SpatialIndex, paths};
use metalert_geometry::{GeometryError, PolygonShape, ShapeStore, ShapeStoreError, codec};
use metalert_models::{AlertFile, Domain, IndexEntry, SearchHit, SearchResponse, VerticalRange};

/// Result limit applied when the caller gives none.
pub const DEFAULT_MAX_RESULTS: usize = 1000;

/// Errors from a search.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The index could not be queried.
    #[error(transparent)]
    Index(#[from] DbError),

    /// The query polygon or a parameter is unusable.
    #[error("Invalid search query: {0}")]
    InvalidQuery(String),

    /// The query polygon could not be measured.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

#[derive(Debug, thiserror::Error)]
enum CandidateError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    ShapeStore(#[from] ShapeStoreError),
}

/// Runs overlap searches against an index and the canonical record files.
pub struct SearchEngine<'a> {
    config: &'a Config,
    index: &'a SpatialIndex,
    shapes: ShapeStore,
}

impl<'a> SearchEngine<'a> {
    /// Creates an engine reading records under `config.data_path`.
    #[must_use]
    pub fn new(config: &'a Config, index: &'a SpatialIndex) -> Self {
        Self {
            config,
            index,
            shapes: ShapeStore::new(config.shapes_path()),
        }
    }

    /// Finds `domain` records overlapping `query`.
    ///
    /// * `vertical` restricts alerts to those whose `[altitude, ceiling]`
    ///   meets the range; it is ignored for maps.
    /// * `cutoff` is the minimum overlap ratio, in `(0, 1]`. Without it any
    ///   positive intersection is accepted.
    /// * `max_results` stops the scan once that many records are accepted
    ///   (default [`DEFAULT_MAX_RESULTS`]).
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::InvalidQuery`] for a zero-area query, a
    /// cutoff outside `(0, 1]` or a zero result limit, and
    /// [`SearchError::Index`] if the index cannot be queried.
    pub fn find_overlap(
        &self,
        domain: Domain,
        query: &PolygonShape,
        vertical: Option<VerticalRange>,
        cutoff: Option<f64>,
        max_results: Option<usize>,
    ) -> Result<SearchResponse, SearchError> {
        let max_results = max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        if max_results == 0 {
            return Err(SearchError::InvalidQuery(
                "maxResults must be positive".to_string(),
            ));
        }
        if let Some(cutoff) = cutoff
            && !(cutoff > 0.0 && cutoff <= 1.0)
        {
            return Err(SearchError::InvalidQuery(format!(
                "cutoff {cutoff} is not in (0.0, 1.0]"
            )));
        }

        let query_area = query.area();
        if query_area <= 0.0 || !query_area.is_finite() {
            return Err(SearchError::InvalidQuery(
                "query polygon has no area".to_string(),
            ));
        }
        let query_bounds = query.bounds()?;

        let mut candidates = self.index.search_bounds(domain, &query_bounds)?;
        if domain == Domain::Alert
            && let Some(range) = vertical
        {
            candidates.retain(|entry| {
                entry
                    .vertical
                    .is_some_and(|(altitude, ceiling)| range.overlaps(altitude, ceiling))
            });
        }
        log::debug!(
            "{} {domain} candidates overlap {query_bounds:?}",
            candidates.len()
        );

        let mut results = Vec::new();
        for entry in candidates {
            if results.len() >= max_results {
                break;
            }

            let polygon = match self.load_polygon(domain, &entry) {
                Ok(polygon) => polygon,
                Err(e) => {
                    log::error!("Skipping {domain} {}: {e}", entry.uuid);
                    continue;
                }
            };

            let intersection = query.intersection_area(&polygon);
            let overlap = intersection / query_area;
            let accepted = cutoff.map_or(intersection > 0.0, |cutoff| overlap >= cutoff);
            if accepted {
                results.push(SearchHit {
                    uuid: entry.uuid,
                    name: entry.name,
                    overlap,
                    area: entry.area,
                    bounds: entry.bounds,
                });
            }
        }

        Ok(SearchResponse {
            record_count: results.len(),
            max_results,
            results,
        })
    }

    fn load_polygon(&self, domain: Domain, entry: &IndexEntry) -> Result<PolygonShape, CandidateError> {
        match domain {
            Domain::Alert => {
                let path = paths::record_path(&self.config.data_path, domain, &entry.uuid);
                let record: AlertFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
                Ok(codec::decode(&record.polygon)?)
            }
            Domain::Map => {
                let shape = self.shapes.open(&entry.uuid)?;
                Ok(self.shapes.polygon(&shape, 0.0, true)?)
            }
        }
    }
}

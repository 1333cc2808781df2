#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Polygon handling for metalert search.
//!
//! [`codec`] turns `GeoJSON` (Polygon, `MultiPolygon`, or a Feature wrapping
//! either) into `geo` geometry and back, and computes the planar measures
//! used by the index: area, bounds, intersection area and simplification.
//! Coordinates are treated as flat degrees; nothing is reprojected.
//!
//! [`shape_store`] persists full-resolution polygons by UUID and lazily
//! derives simplified variants keyed by tolerance.

pub mod codec;
pub mod shape_store;

pub use codec::{GeometrySource, PolygonShape};
pub use shape_store::{ShapeStore, ShapeStoreError, StoredShape};

use std::path::PathBuf;

/// Errors from decoding or measuring polygons.
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    /// The input decoded, but is not a valid Polygon or `MultiPolygon`.
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The input file does not exist or cannot be read.
    #[error("Geometry source unavailable: {}: {reason}", path.display())]
    SourceUnavailable {
        /// The path that was requested.
        path: PathBuf,
        /// Why it could not be read.
        reason: String,
    },

    /// The input is of an unsupported kind, or the file is not JSON.
    #[error("Malformed geometry input: {0}")]
    MalformedInput(String),
}

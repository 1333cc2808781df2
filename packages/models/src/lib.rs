#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared record types for the alert/map polygon index.
//!
//! Defines the two record domains ([`Domain::Alert`] and [`Domain::Map`]),
//! the validated [`BoundingBox`] used as the cheap spatial pre-filter, the
//! [`IndexRecord`] tagged union written to the index, the canonical JSON
//! file shapes that are the authoritative copy of every record, and the
//! search response types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Coordinate system recorded for every indexed record. Coordinates are
/// stored and compared as given; nothing is reprojected.
pub const COORD_SYSTEM: &str = "WGS84";

/// Ceiling stored in the index for alerts that do not declare one.
pub const UNBOUNDED_CEILING: f64 = f64::MAX;

/// The two kinds of polygons the index stores.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Domain {
    /// Emergency-alert areas parsed from CAP documents.
    Alert,
    /// Administrative-boundary regions.
    Map,
}

impl Domain {
    /// Both domains, in index creation order.
    pub const ALL: &[Self] = &[Self::Map, Self::Alert];

    /// Name of the index table holding this domain's rows.
    #[must_use]
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::Alert => "alert_data",
            Self::Map => "map_data",
        }
    }

    /// Prefix of the shard directories holding this domain's canonical
    /// files (`<prefix>_<c>`).
    #[must_use]
    pub const fn shard_prefix(self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Map => "map",
        }
    }
}

/// Write mode for [`IndexRecord`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum IndexCommand {
    /// Add a row, upserting by UUID.
    Insert,
    /// Rewrite every column of the row with the given UUID.
    Update,
    /// Add a row, overwriting an existing row with the same UUID.
    Replace,
}

/// Reasons a record is refused before it reaches the index.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// The UUID is not in canonical lower-case hyphenated form.
    #[error("UUID '{0}' is not a valid canonical UUID")]
    InvalidUuid(String),

    /// South/north are out of range or not strictly increasing.
    #[error("Invalid latitude bounds: south={south}, north={north}")]
    InvalidLatitude {
        /// Southern bound.
        south: f64,
        /// Northern bound.
        north: f64,
    },

    /// West/east are out of range or not strictly increasing.
    #[error("Invalid longitude bounds: west={west}, east={east}")]
    InvalidLongitude {
        /// Western bound.
        west: f64,
        /// Eastern bound.
        east: f64,
    },

    /// Area is negative or not finite.
    #[error("Invalid area: {0}")]
    InvalidArea(f64),

    /// The alert's ceiling lies below its altitude.
    #[error("Ceiling {ceiling} is below altitude {altitude}")]
    CeilingBelowAltitude {
        /// Lower vertical limit.
        altitude: f64,
        /// Upper vertical limit.
        ceiling: f64,
    },

    /// The sent date is not an RFC 3339 timestamp.
    #[error("Invalid timestamp: '{0}'")]
    InvalidTimestamp(String),

    /// A required text attribute is empty.
    #[error("Required field '{0}' is empty")]
    EmptyField(&'static str),
}

/// Parses `value` as a UUID and checks that it is written in canonical
/// (lower-case, hyphenated) form.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidUuid`] for anything else, including
/// the simple (un-hyphenated) and upper-case forms.
pub fn check_uuid(value: &str) -> Result<Uuid, ValidationError> {
    match Uuid::parse_str(value) {
        Ok(parsed) if parsed.hyphenated().to_string() == value => Ok(parsed),
        _ => Err(ValidationError::InvalidUuid(value.to_string())),
    }
}

/// Parses an RFC 3339 timestamp and normalizes it to UTC.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidTimestamp`] if `value` does not parse.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ValidationError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ValidationError::InvalidTimestamp(value.to_string()))
}

/// A geographic bounding box in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Checks that the box is non-degenerate and lies inside the valid
    /// longitude/latitude ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidLatitude`] or
    /// [`ValidationError::InvalidLongitude`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        let lat_ok = (-90.0..=90.0).contains(&self.south)
            && (-90.0..=90.0).contains(&self.north)
            && self.south < self.north;
        if !lat_ok {
            return Err(ValidationError::InvalidLatitude {
                south: self.south,
                north: self.north,
            });
        }

        let lon_ok = (-180.0..=180.0).contains(&self.west)
            && (-180.0..=180.0).contains(&self.east)
            && self.west < self.east;
        if !lon_ok {
            return Err(ValidationError::InvalidLongitude {
                west: self.west,
                east: self.east,
            });
        }

        Ok(())
    }

    /// Strict 2D interval-overlap test. Boxes that only share an edge do
    /// not intersect.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.west < other.east
            && self.east > other.west
            && self.south < other.north
            && self.north > other.south
    }
}

/// Closed altitude interval `[low, high]` used to filter alerts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerticalRange {
    /// Lower limit.
    pub low: f64,
    /// Upper limit.
    pub high: f64,
}

impl VerticalRange {
    /// Creates a range, or `None` if `low > high` or either end is NaN.
    #[must_use]
    pub fn new(low: f64, high: f64) -> Option<Self> {
        (low <= high).then_some(Self { low, high })
    }

    /// Whether `[altitude, ceiling]` shares at least one point with this
    /// range.
    #[must_use]
    pub fn overlaps(&self, altitude: f64, ceiling: f64) -> bool {
        altitude <= self.high && ceiling >= self.low
    }
}

/// Attributes shared by every indexed row.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    /// Canonical UUID, unique within the domain.
    pub uuid: String,
    /// Coordinate system label, normally [`COORD_SYSTEM`].
    pub coord_system: String,
    /// Extent of the record's polygon.
    pub bounds: BoundingBox,
    /// Planar area of the record's polygon.
    pub area: f64,
}

/// Alert-specific index attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertAttributes {
    /// CAP identifier.
    pub identifier: String,
    /// CAP sent timestamp (RFC 3339).
    pub sent: String,
    /// Path of the CAP document the record was ingested from.
    pub source_path: String,
    /// Lower vertical limit.
    pub altitude: f64,
    /// Upper vertical limit.
    pub ceiling: f64,
}

/// Map-region-specific index attributes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MapAttributes {
    /// Human-readable region name.
    pub label: String,
    /// Dataset the region came from.
    pub source: String,
    /// Administrative unit name, if known.
    pub administrative_name: Option<String>,
    /// Administrative unit number/code, if known.
    pub administrative_id: Option<String>,
    /// Start of validity (RFC 3339), if bounded.
    pub valid_from: Option<String>,
    /// End of validity (RFC 3339), if bounded.
    pub valid_to: Option<String>,
}

/// Domain-specific part of an [`IndexRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordAttributes {
    /// Alert area.
    Alert(AlertAttributes),
    /// Map region.
    Map(MapAttributes),
}

/// A row to be written to the spatial index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    /// Shared header.
    pub header: RecordHeader,
    /// Domain-specific attributes; the variant selects the target table.
    pub attributes: RecordAttributes,
}

impl IndexRecord {
    /// The domain selected by the attribute variant.
    #[must_use]
    pub const fn domain(&self) -> Domain {
        match self.attributes {
            RecordAttributes::Alert(_) => Domain::Alert,
            RecordAttributes::Map(_) => Domain::Map,
        }
    }

    /// Validates the header, then the domain-specific attributes.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_uuid(&self.header.uuid)?;
        self.header.bounds.validate()?;

        if !self.header.area.is_finite() || self.header.area < 0.0 {
            return Err(ValidationError::InvalidArea(self.header.area));
        }
        if self.header.coord_system.is_empty() {
            return Err(ValidationError::EmptyField("coord_system"));
        }

        match &self.attributes {
            RecordAttributes::Alert(alert) => {
                if alert.identifier.is_empty() {
                    return Err(ValidationError::EmptyField("identifier"));
                }
                if alert.ceiling < alert.altitude {
                    return Err(ValidationError::CeilingBelowAltitude {
                        altitude: alert.altitude,
                        ceiling: alert.ceiling,
                    });
                }
                parse_timestamp(&alert.sent)?;
            }
            RecordAttributes::Map(map) => {
                if map.label.is_empty() {
                    return Err(ValidationError::EmptyField("label"));
                }
                if map.source.is_empty() {
                    return Err(ValidationError::EmptyField("source"));
                }
                for value in [&map.valid_from, &map.valid_to].into_iter().flatten() {
                    parse_timestamp(value)?;
                }
            }
        }

        Ok(())
    }
}

/// A row returned by a bounding-box query.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Surrogate key; rows are returned in ascending order of this.
    pub id: i64,
    /// Record UUID.
    pub uuid: String,
    /// Alert identifier or map label.
    pub name: String,
    /// Stored extent.
    pub bounds: BoundingBox,
    /// Stored area.
    pub area: f64,
    /// `(altitude, ceiling)` for alerts, `None` for map regions.
    pub vertical: Option<(f64, f64)>,
}

/// Canonical on-disk form of an alert record (`<uuid>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertFile {
    /// CAP identifier.
    pub identifier: String,
    /// Path of the source CAP document.
    pub source: String,
    /// CAP sent timestamp as written in the document.
    pub sent: Option<String>,
    /// Area description per info language.
    #[serde(default)]
    pub area_desc: BTreeMap<String, String>,
    /// GeoJSON geometry (lon, lat order).
    pub polygon: serde_json::Value,
    /// Lower vertical limit.
    pub altitude: Option<f64>,
    /// Upper vertical limit.
    pub ceiling: Option<f64>,
    /// Planar area of `polygon`.
    pub area: f64,
    /// Extent of `polygon`.
    pub bounds: BoundingBox,
}

impl AlertFile {
    /// Projects the file onto the index row stored under `uuid`.
    #[must_use]
    pub fn to_index_record(&self, uuid: &str) -> IndexRecord {
        let altitude = self.altitude.unwrap_or(0.0);
        IndexRecord {
            header: RecordHeader {
                uuid: uuid.to_string(),
                coord_system: COORD_SYSTEM.to_string(),
                bounds: self.bounds,
                area: self.area,
            },
            attributes: RecordAttributes::Alert(AlertAttributes {
                identifier: self.identifier.clone(),
                sent: self.sent.clone().unwrap_or_default(),
                source_path: self.source.clone(),
                altitude,
                ceiling: self.ceiling.unwrap_or(UNBOUNDED_CEILING),
            }),
        }
    }
}

/// Canonical on-disk form of a map record (`<uuid>.json`). The geometry
/// itself lives in the shape store under the same UUID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapFile {
    /// Human-readable region name.
    pub label: String,
    /// Dataset the region came from.
    pub source: String,
    /// Coordinate system label.
    pub coord_system: String,
    /// Administrative unit name.
    pub administrative_name: Option<String>,
    /// Administrative unit number/code.
    pub administrative_id: Option<String>,
    /// Start of validity.
    pub valid_from: Option<String>,
    /// End of validity.
    pub valid_to: Option<String>,
    /// Planar area of the geometry.
    pub area: f64,
    /// Extent of the geometry.
    pub bounds: BoundingBox,
}

impl MapFile {
    /// Projects the file onto the index row stored under `uuid`.
    #[must_use]
    pub fn to_index_record(&self, uuid: &str) -> IndexRecord {
        IndexRecord {
            header: RecordHeader {
                uuid: uuid.to_string(),
                coord_system: self.coord_system.clone(),
                bounds: self.bounds,
                area: self.area,
            },
            attributes: RecordAttributes::Map(MapAttributes {
                label: self.label.clone(),
                source: self.source.clone(),
                administrative_name: self.administrative_name.clone(),
                administrative_id: self.administrative_id.clone(),
                valid_from: self.valid_from.clone(),
                valid_to: self.valid_to.clone(),
            }),
        }
    }
}

/// One accepted search candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// Record UUID.
    pub uuid: String,
    /// Alert identifier or map label.
    pub name: String,
    /// Intersection area divided by the query polygon's area.
    pub overlap: f64,
    /// Stored area of the record.
    pub area: f64,
    /// Stored extent of the record.
    pub bounds: BoundingBox,
}

/// Result of an overlap search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    /// Number of entries in `results`.
    pub record_count: usize,
    /// The result limit that was applied.
    pub max_results: usize,
    /// Accepted candidates in bounding-box iteration order.
    pub results: Vec<SearchHit>,
}

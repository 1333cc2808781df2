//! File-backed store of full-resolution polygons and their simplified
//! variants.
//!
//! Each stored polygon lives at `<root>/<uuid>.geojson`. Simplified
//! variants are written next to it as `<uuid>.<key>.geojson`, where `key`
//! is the tolerance in millionths, rounded. Variants are generated once on
//! first request and never invalidated.

use std::path::{Path, PathBuf};

use metalert_models::check_uuid;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::codec::{self, PolygonShape};
use crate::GeometryError;

/// Errors from the shape store.
#[derive(Debug, thiserror::Error)]
pub enum ShapeStoreError {
    /// The UUID is not in canonical form.
    #[error("UUID {0} is not valid")]
    InvalidUuid(String),

    /// No full-resolution file exists for the UUID.
    #[error("UUID file {} does not exist", .0.display())]
    NotFound(PathBuf),

    /// The requested variant is not cached and generation was not allowed.
    #[error("Polygon does not exist for tolerance {tolerance}")]
    NotCached {
        /// Requested tolerance.
        tolerance: f64,
    },

    /// Tolerance is negative or not finite.
    #[error("Invalid tolerance: {0}")]
    InvalidTolerance(f64),

    /// A stored file could not be decoded.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// I/O error writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Handle to a polygon held by a [`ShapeStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredShape {
    uuid: Uuid,
    path: PathBuf,
}

impl StoredShape {
    /// The polygon's UUID.
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Path of the full-resolution file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Stores polygons under a single directory.
#[derive(Debug, Clone)]
pub struct ShapeStore {
    root: PathBuf,
}

impl ShapeStore {
    /// Creates a store rooted at `root`. The directory is created on first
    /// write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store's directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validates `geometry` and stores it under a fresh UUID.
    ///
    /// Returns `Ok(None)` if `geometry` is not a valid Polygon or
    /// `MultiPolygon` (the reason is logged).
    ///
    /// # Errors
    ///
    /// Returns [`ShapeStoreError::Io`] or [`ShapeStoreError::Json`] if the
    /// file cannot be written.
    pub fn from_geometry(&self, geometry: &Value) -> Result<Option<StoredShape>, ShapeStoreError> {
        if let Err(e) = codec::decode(geometry) {
            log::error!("Not a valid GeoJSON polygon: {e}");
            return Ok(None);
        }

        std::fs::create_dir_all(&self.root)?;

        let uuid = Uuid::new_v4();
        let path = self.full_path(&uuid);
        std::fs::write(&path, serde_json::to_string(geometry)?)?;
        log::debug!("Stored polygon {uuid} at {}", path.display());

        Ok(Some(StoredShape { uuid, path }))
    }

    /// Opens the polygon stored under `uuid`.
    ///
    /// # Errors
    ///
    /// * [`ShapeStoreError::InvalidUuid`] if `uuid` is not canonical
    /// * [`ShapeStoreError::NotFound`] if no file exists for it
    pub fn open(&self, uuid: &str) -> Result<StoredShape, ShapeStoreError> {
        let uuid = check_uuid(uuid).map_err(|_| {
            log::error!("UUID {uuid} is not valid");
            ShapeStoreError::InvalidUuid(uuid.to_string())
        })?;

        let path = self.full_path(&uuid);
        if !path.is_file() {
            log::error!("UUID file {} does not exist", path.display());
            return Err(ShapeStoreError::NotFound(path));
        }

        Ok(StoredShape { uuid, path })
    }

    /// Returns the polygon at the given tolerance.
    ///
    /// A tolerance of `0.0` returns the full-resolution polygon. Otherwise
    /// the cached variant is returned if present; if it is missing and
    /// `cached_only` is set this fails, else the variant is derived from the
    /// full-resolution polygon and persisted.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeStoreError::NotCached`] for a missing variant with
    /// `cached_only`, or the error from loading/writing the files.
    pub fn polygon(
        &self,
        shape: &StoredShape,
        tolerance: f64,
        cached_only: bool,
    ) -> Result<PolygonShape, ShapeStoreError> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ShapeStoreError::InvalidTolerance(tolerance));
        }

        if tolerance == 0.0 {
            return Ok(codec::decode(&shape.path)?);
        }

        let variant = self.variant_path(&shape.uuid, tolerance);
        if variant.is_file() {
            return Ok(codec::decode(&variant)?);
        }

        if cached_only {
            log::error!("Polygon does not exist for tolerance {tolerance}");
            return Err(ShapeStoreError::NotCached { tolerance });
        }

        log::info!(
            "Creating polygon {} with tolerance {tolerance}",
            shape.uuid
        );
        let full = codec::decode(&shape.path)?;
        let simple = full.simplify(tolerance);
        std::fs::write(&variant, serde_json::to_string(&simple.to_geojson())?)?;

        Ok(simple)
    }

    /// Returns the polygon at the given tolerance as a `GeoJSON` Feature.
    ///
    /// # Errors
    ///
    /// See [`ShapeStore::polygon`].
    pub fn to_geojson(
        &self,
        shape: &StoredShape,
        tolerance: f64,
        cached_only: bool,
    ) -> Result<Value, ShapeStoreError> {
        let polygon = self.polygon(shape, tolerance, cached_only)?;
        Ok(codec::encode(&polygon, &Map::new()))
    }

    /// Deletes a stored polygon together with all its cached variants.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeStoreError::Io`] if a file cannot be removed.
    pub fn remove(&self, shape: &StoredShape) -> Result<(), ShapeStoreError> {
        let variant_prefix = format!("{}.", shape.uuid);
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            let is_variant = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&variant_prefix) && name.ends_with(".geojson"));
            if is_variant {
                std::fs::remove_file(&path)?;
            }
        }
        log::debug!("Removed polygon {}", shape.uuid);
        Ok(())
    }

    fn full_path(&self, uuid: &Uuid) -> PathBuf {
        self.root.join(format!("{uuid}.geojson"))
    }

    fn variant_path(&self, uuid: &Uuid, tolerance: f64) -> PathBuf {
        self.root
            .join(format!("{uuid}.{}.geojson", tolerance_key(tolerance)))
    }
}

/// Cache key for a tolerance: millionths, rounded.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn tolerance_key(tolerance: f64) -> i64 {
    (tolerance * 1e6).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn jagged_square() -> Value {
        json!({
            "type": "Feature",
            "properties": {"name": "jagged"},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [0.0, 0.0], [1.0, 0.001], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0], [0.0, 0.0]
                ]]
            }
        })
    }

    fn scratch(name: &str) -> ShapeStore {
        let dir = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&dir);
        ShapeStore::new(dir)
    }

    #[test]
    fn tolerance_key_rounds_to_millionths() {
        assert_eq!(tolerance_key(0.01), 10_000);
        assert_eq!(tolerance_key(1e-6), 1);
        assert_eq!(tolerance_key(2.4e-7), 0);
    }

    #[test]
    fn stores_and_reopens_polygons() {
        let store = scratch("metalert_shape_store_reopen");
        let shape = store.from_geometry(&jagged_square()).unwrap().unwrap();
        assert!(shape.path().is_file());

        let reopened = store.open(&shape.uuid().to_string()).unwrap();
        assert_eq!(reopened, shape);

        let full = store.polygon(&reopened, 0.0, true).unwrap();
        assert!((full.area() - 4.0).abs() < 1e-2);

        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn invalid_geometry_is_not_stored() {
        let store = scratch("metalert_shape_store_invalid");
        let point = json!({"type": "Point", "coordinates": [1.0, 2.0]});
        assert!(store.from_geometry(&point).unwrap().is_none());
        assert!(!store.root().exists());
    }

    #[test]
    fn open_rejects_bad_or_unknown_uuids() {
        let store = scratch("metalert_shape_store_open");
        assert!(matches!(
            store.open("not-a-uuid"),
            Err(ShapeStoreError::InvalidUuid(_))
        ));
        assert!(matches!(
            store.open("e1600641-e537-4d40-8d2f-2fd2c7c457c6"),
            Err(ShapeStoreError::NotFound(_))
        ));
    }

    #[test]
    fn simplified_variants_are_generated_once() {
        let store = scratch("metalert_shape_store_variants");
        let shape = store.from_geometry(&jagged_square()).unwrap().unwrap();

        assert!(matches!(
            store.polygon(&shape, 0.01, true),
            Err(ShapeStoreError::NotCached { .. })
        ));

        let simple = store.polygon(&shape, 0.01, false).unwrap();
        let PolygonShape::Polygon(p) = &simple else {
            panic!("expected a polygon");
        };
        assert_eq!(p.exterior().0.len(), 5);

        let cached_file = store
            .root()
            .join(format!("{}.10000.geojson", shape.uuid()));
        assert!(cached_file.is_file());

        let cached = store.polygon(&shape, 0.01, true).unwrap();
        assert_eq!(cached, simple);

        let feature = store.to_geojson(&shape, 0.01, true).unwrap();
        assert_eq!(feature["type"], "Feature");
        assert_eq!(feature["geometry"]["type"], "Polygon");

        let other = store.from_geometry(&jagged_square()).unwrap().unwrap();
        store.remove(&shape).unwrap();
        assert!(!shape.path().exists());
        assert!(!cached_file.exists());
        assert!(other.path().is_file());

        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn negative_tolerance_is_rejected() {
        let store = scratch("metalert_shape_store_negative");
        let shape = store.from_geometry(&jagged_square()).unwrap().unwrap();
        assert!(matches!(
            store.polygon(&shape, -1.0, false),
            Err(ShapeStoreError::InvalidTolerance(_))
        ));
        let _ = std::fs::remove_dir_all(store.root());
    }
}

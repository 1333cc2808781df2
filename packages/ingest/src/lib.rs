#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ingestion of CAP alerts and boundary regions.
//!
//! Every ingested record is written twice: first as a canonical JSON file
//! in the sharded data tree (the authoritative copy), then as a row in the
//! [`SpatialIndex`]. Both writes must succeed for an ingestion to count.
//! If the index write fails the file stays behind; [`IngestPipeline::rebuild_index`]
//! reconciles the two by re-indexing every canonical file.
//!
//! Alert UUIDs are derived from the CAP identifier (UUIDv5), so
//! re-ingesting the same alert always targets the same file and row.
//! Map region UUIDs are the handles of their stored polygons.

pub mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use metalert_cap::{CapDocument, CapError};
use metalert_config::Config;
use metalert_database::paths::{self, record_uuid};
use metalert_database::{DbError, EditOutcome, SpatialIndex};
use metalert_geometry::{GeometryError, ShapeStore, ShapeStoreError, codec};
use metalert_models::{
    AlertFile, COORD_SYSTEM, Domain, IndexCommand, IndexRecord, MapAttributes, MapFile,
};
use serde_json::Value;
use uuid::Uuid;

use crate::progress::{ProgressCallback, null_progress};

/// Name hashed into the alert UUID namespace.
pub const NAMESPACE_NAME: &str = "metalert.met.no";

/// Errors raised while ingesting or indexing records.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The CAP document could not be read or parsed.
    #[error(transparent)]
    Cap(#[from] CapError),

    /// The CAP document has no identifier.
    #[error("CAP file has no identifier: {}", .0.display())]
    MissingIdentifier(PathBuf),

    /// The CAP document has no polygon.
    #[error("CAP file has no polygon: {}", .0.display())]
    MissingPolygon(PathBuf),

    /// A geometry is not a valid Polygon or `MultiPolygon`.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// Storing or loading a polygon failed.
    #[error(transparent)]
    ShapeStore(#[from] ShapeStoreError),

    /// The record exists and replacing it was not allowed.
    #[error("Record '{name}' already exists at {}", path.display())]
    AlreadyExists {
        /// Alert identifier or map label.
        name: String,
        /// Existing canonical file.
        path: PathBuf,
    },

    /// The path does not exist.
    #[error("No such file: {}", .0.display())]
    NoSuchFile(PathBuf),

    /// The file name is not `<uuid>.json`.
    #[error("Skipping unknown file: {}", .0.display())]
    UnknownFile(PathBuf),

    /// The input is not a `GeoJSON` `FeatureCollection`, or a feature lacks
    /// a required property.
    #[error("Invalid boundary input: {0}")]
    InvalidInput(String),

    /// Index error.
    #[error(transparent)]
    Index(#[from] DbError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of ingesting a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    /// Record UUID.
    pub uuid: String,
    /// Canonical file written.
    pub path: PathBuf,
    /// What the index write did.
    pub outcome: EditOutcome,
}

/// Counts from a batch operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Records written and indexed.
    pub ingested: u64,
    /// Inputs skipped (existing records, or files that are not records).
    pub skipped: u64,
    /// Inputs that failed.
    pub failed: u64,
}

impl std::ops::AddAssign for BatchSummary {
    fn add_assign(&mut self, other: Self) {
        self.ingested += other.ingested;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ingested, {} skipped, {} failed",
            self.ingested, self.skipped, self.failed
        )
    }
}

/// How to read a boundary `FeatureCollection`.
#[derive(Debug, Clone)]
pub struct MapCollectionOptions {
    /// Dataset name recorded as each region's source.
    pub source: String,
    /// Feature property holding the region label.
    pub label_property: String,
    /// Feature property holding the administrative unit name.
    pub admin_name_property: Option<String>,
    /// Feature property holding the administrative unit number/code.
    pub admin_id_property: Option<String>,
    /// Start of validity applied to every region.
    pub valid_from: Option<String>,
    /// End of validity applied to every region.
    pub valid_to: Option<String>,
    /// Replace regions with the same source and label.
    pub allow_replace: bool,
}

impl MapCollectionOptions {
    /// Options for `source`, reading labels from the `name` property.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            label_property: "name".to_string(),
            admin_name_property: None,
            admin_id_property: None,
            valid_from: None,
            valid_to: None,
            allow_replace: false,
        }
    }
}

/// The alert UUID namespace: UUIDv5 of [`NAMESPACE_NAME`] in the URL
/// namespace.
#[must_use]
pub fn alert_namespace() -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, NAMESPACE_NAME.as_bytes())
}

/// Deterministic UUID of the alert with the given CAP identifier.
#[must_use]
pub fn alert_uuid(identifier: &str) -> Uuid {
    Uuid::new_v5(&alert_namespace(), identifier.as_bytes())
}

/// Writes records to the data tree and the index.
pub struct IngestPipeline<'a> {
    config: &'a Config,
    index: &'a SpatialIndex,
    shapes: ShapeStore,
}

impl<'a> IngestPipeline<'a> {
    /// Creates a pipeline writing under `config.data_path` and into
    /// `index`.
    #[must_use]
    pub fn new(config: &'a Config, index: &'a SpatialIndex) -> Self {
        Self {
            config,
            index,
            shapes: ShapeStore::new(config.shapes_path()),
        }
    }

    /// The shape store holding map region polygons.
    #[must_use]
    pub const fn shapes(&self) -> &ShapeStore {
        &self.shapes
    }

    /// Ingests one CAP file.
    ///
    /// The record is written to
    /// `<data>/alert_<uuid[7]>/alert_<uuid[6]>/<uuid>.json` and indexed. An
    /// existing record is only overwritten if `allow_replace` is set.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the file cannot be parsed, lacks an
    /// identifier or polygon, already exists, or either write fails.
    pub fn ingest_alert(&self, path: &Path, allow_replace: bool) -> Result<Ingested, IngestError> {
        let cap = CapDocument::from_file(path).inspect_err(|e| {
            log::error!("Could not parse CAP file {}: {e}", path.display());
        })?;

        let Some(identifier) = cap.identifier.clone() else {
            log::error!("CAP file has no identifier: {}", path.display());
            return Err(IngestError::MissingIdentifier(path.to_path_buf()));
        };

        let Some(feature) = cap.as_geojson() else {
            log::error!("CAP file has no polygon: {}", path.display());
            return Err(IngestError::MissingPolygon(path.to_path_buf()));
        };

        let shape = codec::decode(&feature).inspect_err(|e| {
            log::error!("Could not parse polygon in {}: {e}", path.display());
        })?;

        let uuid = alert_uuid(&identifier).to_string();
        let dir = paths::prepare_record_dir(&self.config.data_path, Domain::Alert, &uuid)
            .inspect_err(|e| log::error!("Could not create storage path: {e}"))?;
        let file_path = dir.join(format!("{uuid}.json"));

        if file_path.is_file() && !allow_replace {
            log::warn!(
                "CAP file with identifier '{identifier}' already exists and is not being overwritten"
            );
            return Err(IngestError::AlreadyExists {
                name: identifier,
                path: file_path,
            });
        }

        let record = AlertFile {
            identifier,
            source: path.display().to_string(),
            sent: cap.sent.clone(),
            area_desc: cap.area_desc.clone(),
            polygon: feature["geometry"].clone(),
            altitude: cap.altitude,
            ceiling: cap.ceiling,
            area: shape.area(),
            bounds: shape.bounds()?,
        };

        write_json(&file_path, &serde_json::to_value(&record)?)?;
        let outcome = self.index_record(
            &file_path,
            Domain::Alert,
            Some(&record.to_index_record(&uuid)),
            allow_replace,
        )?;

        Ok(Ingested {
            uuid,
            path: file_path,
            outcome,
        })
    }

    /// Ingests every `*.xml` file in `dir` (descending into
    /// sub-directories if `recursive`). Per-file failures are logged and
    /// counted; they never abort the batch.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] if a directory cannot be listed.
    pub fn ingest_alert_dir(
        &self,
        dir: &Path,
        recursive: bool,
        allow_replace: bool,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<BatchSummary, IngestError> {
        let progress = progress.unwrap_or_else(null_progress);

        let mut files = Vec::new();
        collect_xml_files(dir, recursive, &mut files)?;
        files.sort();
        log::info!("Found {} CAP files in {}", files.len(), dir.display());
        progress.set_total(files.len() as u64);

        let mut summary = BatchSummary::default();
        for file in &files {
            progress.set_message(file.display().to_string());
            match self.ingest_alert(file, allow_replace) {
                Ok(_) => summary.ingested += 1,
                Err(IngestError::AlreadyExists { .. }) => summary.skipped += 1,
                Err(e) => {
                    log::error!("Failed to ingest {}: {e}", file.display());
                    summary.failed += 1;
                }
            }
            progress.inc(1);
        }

        progress.finish(format!("CAP files: {summary}"));
        Ok(summary)
    }

    /// Ingests one boundary region.
    ///
    /// The geometry is stored in the shape store under a fresh UUID, the
    /// canonical map file is written to
    /// `<data>/map_<uuid[7]>/map_<uuid[6]>/<uuid>.json`, and the region is
    /// indexed. A region with the same source and label is an existing
    /// record: it is refused unless `allow_replace` is set, in which case
    /// the old record, file and polygon are removed once the new one is in
    /// place.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the geometry is invalid, the region
    /// exists and may not be replaced, or any write fails.
    pub fn ingest_map(
        &self,
        feature: &Value,
        attributes: MapAttributes,
        allow_replace: bool,
    ) -> Result<Ingested, IngestError> {
        let shape = codec::decode(feature)?;
        let bounds = shape.bounds()?;

        let existing = self.index.find_map(&attributes.source, &attributes.label)?;
        if let Some(old_uuid) = &existing
            && !allow_replace
        {
            log::warn!(
                "Map region '{}' from '{}' already exists and is not being overwritten",
                attributes.label,
                attributes.source
            );
            return Err(IngestError::AlreadyExists {
                name: attributes.label,
                path: paths::record_path(&self.config.data_path, Domain::Map, old_uuid),
            });
        }

        let stored = self.shapes.from_geometry(feature)?.ok_or_else(|| {
            GeometryError::InvalidGeometry("boundary is not a polygon".to_string())
        })?;
        let uuid = stored.uuid().to_string();

        let record = MapFile {
            label: attributes.label,
            source: attributes.source,
            coord_system: COORD_SYSTEM.to_string(),
            administrative_name: attributes.administrative_name,
            administrative_id: attributes.administrative_id,
            valid_from: attributes.valid_from,
            valid_to: attributes.valid_to,
            area: shape.area(),
            bounds,
        };

        let dir = paths::prepare_record_dir(&self.config.data_path, Domain::Map, &uuid)?;
        let file_path = dir.join(format!("{uuid}.json"));
        write_json(&file_path, &serde_json::to_value(&record)?)?;

        let outcome = self.index_record(
            &file_path,
            Domain::Map,
            Some(&record.to_index_record(&uuid)),
            allow_replace,
        )?;

        let replaced = existing.is_some();
        if let Some(old_uuid) = existing {
            self.remove_map(&old_uuid)?;
            log::info!(
                "Replaced map region '{}' ({old_uuid} -> {uuid})",
                record.label
            );
        }

        Ok(Ingested {
            uuid,
            path: file_path,
            outcome: if replaced { EditOutcome::Replaced } else { outcome },
        })
    }

    fn remove_map(&self, uuid: &str) -> Result<(), IngestError> {
        self.index.delete_record(Domain::Map, uuid)?;

        let file = paths::record_path(&self.config.data_path, Domain::Map, uuid);
        if file.is_file() {
            std::fs::remove_file(&file)?;
        }

        match self.shapes.open(uuid) {
            Ok(shape) => self.shapes.remove(&shape)?,
            Err(e) => log::warn!("No stored polygon to remove for {uuid}: {e}"),
        }
        Ok(())
    }

    /// Ingests every feature of a `GeoJSON` `FeatureCollection` file as a
    /// boundary region, reading labels and administrative metadata from the
    /// configured properties.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the file cannot be read or is not a
    /// `FeatureCollection`. Per-feature failures are only counted.
    pub fn ingest_map_collection(
        &self,
        path: &Path,
        options: &MapCollectionOptions,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<BatchSummary, IngestError> {
        let progress = progress.unwrap_or_else(null_progress);

        let contents = std::fs::read_to_string(path)?;
        let collection: Value = serde_json::from_str(&contents)?;
        if collection.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
            return Err(IngestError::InvalidInput(format!(
                "{} is not a GeoJSON FeatureCollection",
                path.display()
            )));
        }
        let features = collection
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| IngestError::InvalidInput("missing 'features' array".to_string()))?;

        progress.set_total(features.len() as u64);

        let mut summary = BatchSummary::default();
        for (i, feature) in features.iter().enumerate() {
            let result = map_attributes(feature, options)
                .and_then(|attributes| self.ingest_map(feature, attributes, options.allow_replace));
            match result {
                Ok(ingested) => {
                    progress.set_message(ingested.uuid);
                    summary.ingested += 1;
                }
                Err(IngestError::AlreadyExists { .. }) => summary.skipped += 1,
                Err(e) => {
                    log::error!("Failed to ingest feature {i} of {}: {e}", path.display());
                    summary.failed += 1;
                }
            }
            progress.inc(1);
        }

        progress.finish(format!("{}: {summary}", options.source));
        Ok(summary)
    }

    /// Adds the canonical record file at `path` to the index.
    ///
    /// The file name must be `<uuid>.json`. If `precomputed` is given it is
    /// used instead of reading the file; its UUID is taken from the file
    /// name either way.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::NoSuchFile`], [`IngestError::UnknownFile`],
    /// a read/decode error, or the index error.
    pub fn index_record(
        &self,
        path: &Path,
        domain: Domain,
        precomputed: Option<&IndexRecord>,
        allow_replace: bool,
    ) -> Result<EditOutcome, IngestError> {
        if !path.is_file() {
            log::error!("No such file: {}", path.display());
            return Err(IngestError::NoSuchFile(path.to_path_buf()));
        }

        let Some(uuid) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(record_uuid)
        else {
            log::error!("Skipping unknown file: {}", path.display());
            return Err(IngestError::UnknownFile(path.to_path_buf()));
        };

        let record = match precomputed {
            Some(record) => {
                let mut record = record.clone();
                record.header.uuid = uuid.to_string();
                record
            }
            None => read_record(path, domain, uuid)?,
        };

        let cmd = if allow_replace {
            IndexCommand::Replace
        } else {
            IndexCommand::Insert
        };

        match self.index.edit_record(cmd, &record) {
            Ok(outcome) => {
                log::info!("Indexed file: {}", path.display());
                Ok(outcome)
            }
            Err(e) => {
                log::error!("Failed to index file: {}", path.display());
                Err(e.into())
            }
        }
    }

    /// Purges the `domain` table and re-indexes every canonical file under
    /// `<data>/<domain>_*/<domain>_*/`. Files that are not named
    /// `<uuid>.json` are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the table cannot be purged or the data
    /// tree cannot be listed. Per-file failures are only counted.
    pub fn rebuild_index(
        &self,
        domain: Domain,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<BatchSummary, IngestError> {
        let progress = progress.unwrap_or_else(null_progress);

        self.index.purge_table(domain).inspect_err(|e| {
            log::error!("Could not clear old {domain} index: {e}");
        })?;

        let files = paths::record_files(&self.config.data_path, domain)?;
        progress.set_total(files.len() as u64);

        let mut summary = BatchSummary::default();
        for file in &files {
            let is_record = file
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(record_uuid)
                .is_some();

            if !is_record {
                log::info!("Skipping: {}", file.display());
                summary.skipped += 1;
            } else if self.index_record(file, domain, None, true).is_ok() {
                summary.ingested += 1;
            } else {
                summary.failed += 1;
            }
            progress.inc(1);
        }

        log::info!("Rebuilt {domain} index: {summary}");
        progress.finish(format!("{domain} index: {summary}"));
        Ok(summary)
    }
}

fn read_record(path: &Path, domain: Domain, uuid: &str) -> Result<IndexRecord, IngestError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(match domain {
        Domain::Alert => serde_json::from_str::<AlertFile>(&contents)?.to_index_record(uuid),
        Domain::Map => serde_json::from_str::<MapFile>(&contents)?.to_index_record(uuid),
    })
}

fn write_json(path: &Path, value: &Value) -> Result<(), IngestError> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).inspect_err(|e| {
        log::error!("Failed to write {}: {e}", path.display());
    })?;
    Ok(())
}

fn collect_xml_files(dir: &Path, recursive: bool, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                collect_xml_files(&path, recursive, files)?;
            }
        } else if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("xml")) {
            files.push(path);
        }
    }
    Ok(())
}

fn property_string(properties: Option<&Value>, key: &str) -> Option<String> {
    match properties?.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn map_attributes(feature: &Value, options: &MapCollectionOptions) -> Result<MapAttributes, IngestError> {
    let properties = feature.get("properties");
    let label = property_string(properties, &options.label_property).ok_or_else(|| {
        IngestError::InvalidInput(format!(
            "feature has no '{}' property",
            options.label_property
        ))
    })?;

    Ok(MapAttributes {
        label,
        source: options.source.clone(),
        administrative_name: options
            .admin_name_property
            .as_deref()
            .and_then(|key| property_string(properties, key)),
        administrative_id: options
            .admin_id_property
            .as_deref()
            .and_then(|key| property_string(properties, key)),
        valid_from: options.valid_from.clone(),
        valid_to: options.valid_to.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MOCK_UUID: &str = "a35e85f4-b0d1-5b1f-9db0-79007f49be07";

    fn mock_cap(identifier: &str, polygon: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<alert xmlns="urn:oasis:names:tc:emergency:cap:1.2">
  <identifier>{identifier}</identifier>
  <sent>2021-09-27T16:00:00+02:00</sent>
  <info>
    <language>en-GB</language>
    <area>
      <areaDesc>Test area</areaDesc>
      <polygon>{polygon}</polygon>
      <altitude>0</altitude>
      <ceiling>1</ceiling>
    </area>
  </info>
</alert>
"#
        )
    }

    struct Scratch {
        root: PathBuf,
        config: Config,
    }

    impl Scratch {
        fn new(name: &str) -> Self {
            let root = std::env::temp_dir().join(name);
            let _ = std::fs::remove_dir_all(&root);
            let data = root.join("data");
            let index = root.join("index");
            std::fs::create_dir_all(&data).unwrap();
            std::fs::create_dir_all(&index).unwrap();
            Self {
                config: Config::new(data, index),
                root,
            }
        }

        fn write_cap(&self, name: &str, contents: &str) -> PathBuf {
            let dir = self.root.join("cap");
            std::fs::create_dir_all(&dir).unwrap();
            let path = dir.join(name);
            std::fs::write(&path, contents).unwrap();
            path
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn alert_uuid_is_derived_from_identifier() {
        assert_eq!(alert_uuid("mockAlert").to_string(), MOCK_UUID);
        assert_eq!(alert_uuid("mockAlert"), alert_uuid("mockAlert"));
        assert_ne!(alert_uuid("mockAlert"), alert_uuid("otherAlert"));
        assert_eq!(alert_namespace().get_version_num(), 5);
    }

    #[test]
    fn ingests_mock_alert_once() {
        let scratch = Scratch::new("metalert_ingest_mock_alert");
        let index = SpatialIndex::open_in_memory().unwrap();
        let pipeline = IngestPipeline::new(&scratch.config, &index);
        let cap = scratch.write_cap("mock.cap.xml", &mock_cap("mockAlert", "1,1 1,2 2,2 2,1 1,1"));

        let first = pipeline.ingest_alert(&cap, false).unwrap();
        assert_eq!(first.uuid, MOCK_UUID);
        assert_eq!(first.outcome, EditOutcome::Inserted);
        assert_eq!(
            first.path,
            scratch
                .config
                .data_path
                .join("alert_4")
                .join("alert_f")
                .join(format!("{MOCK_UUID}.json"))
        );

        let stored: Value =
            serde_json::from_str(&std::fs::read_to_string(&first.path).unwrap()).unwrap();
        assert_eq!(stored["identifier"], "mockAlert");
        assert_eq!(stored["area"], 1.0);
        assert_eq!(
            stored["bounds"],
            json!({"west": 1.0, "south": 1.0, "east": 2.0, "north": 2.0})
        );
        assert_eq!(
            stored["polygon"]["coordinates"],
            json!([[[1.0, 1.0], [2.0, 1.0], [2.0, 2.0], [1.0, 2.0], [1.0, 1.0]]])
        );
        assert_eq!(stored["areaDesc"]["en-GB"], "Test area");

        assert!(matches!(
            pipeline.ingest_alert(&cap, false),
            Err(IngestError::AlreadyExists { .. })
        ));
        assert_eq!(index.count(Domain::Alert).unwrap(), 1);

        let again = pipeline.ingest_alert(&cap, true).unwrap();
        assert_eq!(again.uuid, MOCK_UUID);
        assert_eq!(again.outcome, EditOutcome::Replaced);
        assert_eq!(index.count(Domain::Alert).unwrap(), 1);
    }

    #[test]
    fn refuses_alerts_without_identifier_or_polygon() {
        let scratch = Scratch::new("metalert_ingest_incomplete");
        let index = SpatialIndex::open_in_memory().unwrap();
        let pipeline = IngestPipeline::new(&scratch.config, &index);

        let no_id = scratch.write_cap(
            "no_id.cap.xml",
            "<alert><info><area><polygon>1,1 1,2 2,2 1,1</polygon></area></info></alert>",
        );
        assert!(matches!(
            pipeline.ingest_alert(&no_id, false),
            Err(IngestError::MissingIdentifier(_))
        ));

        let no_polygon = scratch.write_cap(
            "no_polygon.cap.xml",
            "<alert><identifier>x</identifier><info><area/></info></alert>",
        );
        assert!(matches!(
            pipeline.ingest_alert(&no_polygon, false),
            Err(IngestError::MissingPolygon(_))
        ));

        assert!(matches!(
            pipeline.ingest_alert(&scratch.root.join("missing.xml"), false),
            Err(IngestError::Cap(CapError::Io { .. }))
        ));
        assert_eq!(index.count(Domain::Alert).unwrap(), 0);
    }

    #[test]
    fn index_record_rejects_unrelated_files() {
        let scratch = Scratch::new("metalert_ingest_unknown_file");
        let index = SpatialIndex::open_in_memory().unwrap();
        let pipeline = IngestPipeline::new(&scratch.config, &index);

        let stray = scratch.config.data_path.join("notes.json");
        std::fs::write(&stray, "{}").unwrap();
        assert!(matches!(
            pipeline.index_record(&stray, Domain::Alert, None, false),
            Err(IngestError::UnknownFile(_))
        ));
        assert!(matches!(
            pipeline.index_record(&scratch.root.join("nope.json"), Domain::Alert, None, false),
            Err(IngestError::NoSuchFile(_))
        ));
    }

    #[test]
    fn directory_batch_counts_each_outcome() {
        let scratch = Scratch::new("metalert_ingest_dir");
        let index = SpatialIndex::open_in_memory().unwrap();
        let pipeline = IngestPipeline::new(&scratch.config, &index);

        scratch.write_cap("a.xml", &mock_cap("alert-a", "1,1 1,2 2,2 1,1"));
        scratch.write_cap("b.xml", &mock_cap("alert-b", "5,5 5,6 6,6 5,5"));
        scratch.write_cap("broken.xml", "<alert><identifier>");
        scratch.write_cap("readme.txt", "not cap");
        let nested = scratch.root.join("cap").join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("c.xml"), mock_cap("alert-c", "7,7 7,8 8,8 7,7")).unwrap();

        let cap_dir = scratch.root.join("cap");
        let flat = pipeline
            .ingest_alert_dir(&cap_dir, false, false, None)
            .unwrap();
        assert_eq!(
            flat,
            BatchSummary {
                ingested: 2,
                skipped: 0,
                failed: 1
            }
        );

        let deep = pipeline
            .ingest_alert_dir(&cap_dir, true, false, None)
            .unwrap();
        assert_eq!(
            deep,
            BatchSummary {
                ingested: 1,
                skipped: 2,
                failed: 1
            }
        );
        assert_eq!(index.count(Domain::Alert).unwrap(), 3);
    }

    #[test]
    fn rebuild_reindexes_canonical_files() {
        let scratch = Scratch::new("metalert_ingest_rebuild");
        let index = SpatialIndex::open_in_memory().unwrap();
        let pipeline = IngestPipeline::new(&scratch.config, &index);

        let cap = scratch.write_cap("mock.cap.xml", &mock_cap("mockAlert", "1,1 1,2 2,2 2,1 1,1"));
        let ingested = pipeline.ingest_alert(&cap, false).unwrap();
        std::fs::write(ingested.path.with_file_name("stray.json"), "{}").unwrap();

        index.purge_table(Domain::Alert).unwrap();
        assert_eq!(index.count(Domain::Alert).unwrap(), 0);

        let summary = pipeline.rebuild_index(Domain::Alert, None).unwrap();
        assert_eq!(summary.ingested, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);

        let entry = index.get(Domain::Alert, MOCK_UUID).unwrap().unwrap();
        assert_eq!(entry.name, "mockAlert");
        assert_eq!(entry.vertical, Some((0.0, 1.0)));
    }

    #[test]
    fn map_collection_ingest_and_replace() {
        let scratch = Scratch::new("metalert_ingest_maps");
        let index = SpatialIndex::open_in_memory().unwrap();
        let pipeline = IngestPipeline::new(&scratch.config, &index);

        let collection = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"navn": "Oslo", "nummer": 3},
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[10.0, 59.0], [11.0, 59.0], [11.0, 60.0], [10.0, 60.0], [10.0, 59.0]]]
                    }
                },
                {
                    "type": "Feature",
                    "properties": {"navn": "Nowhere"},
                    "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}
                },
                {
                    "type": "Feature",
                    "properties": {},
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
                    }
                }
            ]
        });
        let file = scratch.root.join("fylker.geojson");
        std::fs::write(&file, collection.to_string()).unwrap();

        let mut options = MapCollectionOptions::new("kartverket");
        options.label_property = "navn".to_string();
        options.admin_id_property = Some("nummer".to_string());

        let summary = pipeline
            .ingest_map_collection(&file, &options, None)
            .unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                ingested: 1,
                skipped: 0,
                failed: 2
            }
        );

        let first = index.find_map("kartverket", "Oslo").unwrap().unwrap();
        let entry = index.get(Domain::Map, &first).unwrap().unwrap();
        assert_eq!(entry.bounds.west, 10.0);
        assert!(pipeline.shapes().open(&first).is_ok());

        let again = pipeline
            .ingest_map_collection(&file, &options, None)
            .unwrap();
        assert_eq!(again.skipped, 1);

        options.allow_replace = true;
        pipeline
            .ingest_map_collection(&file, &options, None)
            .unwrap();
        let second = index.find_map("kartverket", "Oslo").unwrap().unwrap();
        assert_ne!(first, second);
        assert_eq!(index.count(Domain::Map).unwrap(), 1);
        assert!(pipeline.shapes().open(&first).is_err());
        assert!(
            !paths::record_path(&scratch.config.data_path, Domain::Map, &first).exists()
        );

        let stored: Value = serde_json::from_str(
            &std::fs::read_to_string(paths::record_path(
                &scratch.config.data_path,
                Domain::Map,
                &second,
            ))
            .unwrap(),
        )
        .unwrap();
        assert_eq!(stored["administrativeId"], "3");
        assert_eq!(stored["coordSystem"], "WGS84");
    }

    #[test]
    fn non_collections_are_rejected() {
        let scratch = Scratch::new("metalert_ingest_not_collection");
        let index = SpatialIndex::open_in_memory().unwrap();
        let pipeline = IngestPipeline::new(&scratch.config, &index);

        let file = scratch.root.join("single.geojson");
        std::fs::write(&file, r#"{"type": "Feature", "geometry": null}"#).unwrap();
        assert!(matches!(
            pipeline.ingest_map_collection(&file, &MapCollectionOptions::new("x"), None),
            Err(IngestError::InvalidInput(_))
        ));
    }
}

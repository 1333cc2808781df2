//! `DuckDB`-backed bounding-box index of alert and map records.
//!
//! Each domain has its own table with a sequence-backed surrogate `id`, a
//! unique `uuid`, the domain attributes, four bounding-box columns and the
//! polygon area. Schema versions are recorded per table in `index_meta`.
//! The full polygons are never stored here.

use std::path::Path;

use chrono::SecondsFormat;
use duckdb::Connection;
use metalert_models::{
    BoundingBox, Domain, IndexCommand, IndexEntry, IndexRecord, RecordAttributes, parse_timestamp,
};

use crate::DbError;

/// Current schema version of `alert_data`.
pub const ALERT_SCHEMA_VERSION: i64 = 1;

/// Current schema version of `map_data`.
pub const MAP_SCHEMA_VERSION: i64 = 1;

/// What an [`SpatialIndex::edit_record`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// A new row was added.
    Inserted,
    /// An existing row with the same UUID was overwritten.
    Replaced,
    /// An existing row was updated in place.
    Updated,
}

/// Handle to the index store.
pub struct SpatialIndex {
    conn: Connection,
}

impl SpatialIndex {
    /// Opens (or creates) the index at `path` and ensures both tables exist.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            crate::paths::ensure_dir(parent)?;
        }

        let conn = Connection::open(path)?;
        log::debug!("Opened index at {}", path.display());
        Self::from_connection(conn)
    }

    /// Opens a throwaway in-memory index.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if schema creation fails.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS index_meta (
                table_name TEXT PRIMARY KEY,
                schema_version BIGINT NOT NULL
            );",
        )?;

        let index = Self { conn };
        for &domain in Domain::ALL {
            match index.schema_version(domain)? {
                None => index.create_table(domain)?,
                Some(version) if version != current_version(domain) => {
                    log::warn!(
                        "Table {} has schema version {version}, expected {}; rebuild the index",
                        domain.table_name(),
                        current_version(domain)
                    );
                }
                Some(_) => {}
            }
        }

        Ok(index)
    }

    /// Creates the table (and its id sequence) for `domain` if missing and
    /// records its schema version.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the DDL fails.
    pub fn create_table(&self, domain: Domain) -> Result<(), DbError> {
        let table = domain.table_name();
        let columns = match domain {
            Domain::Alert => {
                "identifier TEXT NOT NULL,
                sent TEXT NOT NULL,
                source_path TEXT NOT NULL,
                altitude DOUBLE NOT NULL,
                ceiling DOUBLE NOT NULL,"
            }
            Domain::Map => {
                "label TEXT NOT NULL,
                source TEXT NOT NULL,
                administrative_name TEXT,
                administrative_id TEXT,
                valid_from TEXT,
                valid_to TEXT,"
            }
        };

        self.conn.execute_batch(&format!(
            "CREATE SEQUENCE IF NOT EXISTS {table}_id_seq START 1;

            CREATE TABLE IF NOT EXISTS {table} (
                id BIGINT PRIMARY KEY DEFAULT nextval('{table}_id_seq'),
                uuid TEXT NOT NULL UNIQUE,
                {columns}
                coord_system TEXT NOT NULL,
                bound_west DOUBLE NOT NULL,
                bound_south DOUBLE NOT NULL,
                bound_east DOUBLE NOT NULL,
                bound_north DOUBLE NOT NULL,
                area DOUBLE NOT NULL
            );"
        ))?;

        self.conn.execute(
            "INSERT INTO index_meta (table_name, schema_version) VALUES (?, ?)
             ON CONFLICT (table_name) DO UPDATE SET schema_version = EXCLUDED.schema_version",
            duckdb::params![table, current_version(domain)],
        )?;

        log::info!("Created index table {table}");
        Ok(())
    }

    /// Drops the table of `domain` together with its id sequence.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the DDL fails.
    pub fn drop_table(&self, domain: Domain) -> Result<(), DbError> {
        let table = domain.table_name();
        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
             DROP SEQUENCE IF EXISTS {table}_id_seq;"
        ))?;
        self.conn
            .execute("DELETE FROM index_meta WHERE table_name = ?", [table])?;
        log::info!("Dropped index table {table}");
        Ok(())
    }

    /// Deletes every row of `domain`, keeping the table. Returns the number
    /// of rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the delete fails.
    pub fn purge_table(&self, domain: Domain) -> Result<usize, DbError> {
        let removed = self
            .conn
            .execute(&format!("DELETE FROM {}", domain.table_name()), [])?;
        log::info!("Purged {removed} rows from {}", domain.table_name());
        Ok(removed)
    }

    /// Number of rows indexed for `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn count(&self, domain: Domain) -> Result<u64, DbError> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", domain.table_name()),
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Recorded schema version of the `domain` table, if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn schema_version(&self, domain: Domain) -> Result<Option<i64>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT schema_version FROM index_meta WHERE table_name = ?")?;
        match stmt.query_row([domain.table_name()], |row| row.get(0)) {
            Ok(v) => Ok(Some(v)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::DuckDb(e)),
        }
    }

    /// Validates `record` and writes it to its domain's table.
    ///
    /// [`IndexCommand::Insert`] and [`IndexCommand::Replace`] upsert by
    /// UUID; [`IndexCommand::Update`] rewrites every column of an existing
    /// row. Validation failures and store errors are logged and returned;
    /// store constraint messages are passed through unchanged.
    ///
    /// # Errors
    ///
    /// * [`DbError::Validation`] if the record is invalid
    /// * [`DbError::NotFound`] if an update targets an unknown UUID
    /// * [`DbError::DuckDb`] if the write fails
    pub fn edit_record(&self, cmd: IndexCommand, record: &IndexRecord) -> Result<EditOutcome, DbError> {
        let domain = record.domain();
        let uuid = record.header.uuid.as_str();

        if let Err(e) = record.validate() {
            log::error!("Refusing {cmd} of {domain} record {uuid}: {e}");
            return Err(DbError::Validation(e));
        }

        let result = match cmd {
            IndexCommand::Insert | IndexCommand::Replace => self.upsert(record),
            IndexCommand::Update => self.update(record),
        };

        match &result {
            Ok(outcome) => log::debug!("{outcome:?} {domain} record {uuid}"),
            Err(e) => log::error!("Failed to {cmd} {domain} record {uuid}: {e}"),
        }

        result
    }

    fn upsert(&self, record: &IndexRecord) -> Result<EditOutcome, DbError> {
        let domain = record.domain();
        let existed = self.contains(domain, &record.header.uuid)?;
        let header = &record.header;
        let bounds = &header.bounds;

        match &record.attributes {
            RecordAttributes::Alert(alert) => {
                let sent = normalize_timestamp(&alert.sent)?;
                self.conn.execute(
                    "INSERT INTO alert_data (uuid, identifier, sent, source_path, altitude,
                        ceiling, coord_system, bound_west, bound_south, bound_east,
                        bound_north, area)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT (uuid) DO UPDATE SET
                        identifier = EXCLUDED.identifier,
                        sent = EXCLUDED.sent,
                        source_path = EXCLUDED.source_path,
                        altitude = EXCLUDED.altitude,
                        ceiling = EXCLUDED.ceiling,
                        coord_system = EXCLUDED.coord_system,
                        bound_west = EXCLUDED.bound_west,
                        bound_south = EXCLUDED.bound_south,
                        bound_east = EXCLUDED.bound_east,
                        bound_north = EXCLUDED.bound_north,
                        area = EXCLUDED.area",
                    duckdb::params![
                        header.uuid,
                        alert.identifier,
                        sent,
                        alert.source_path,
                        alert.altitude,
                        alert.ceiling,
                        header.coord_system,
                        bounds.west,
                        bounds.south,
                        bounds.east,
                        bounds.north,
                        header.area,
                    ],
                )?;
            }
            RecordAttributes::Map(map) => {
                let valid_from = map.valid_from.as_deref().map(normalize_timestamp).transpose()?;
                let valid_to = map.valid_to.as_deref().map(normalize_timestamp).transpose()?;
                self.conn.execute(
                    "INSERT INTO map_data (uuid, label, source, administrative_name,
                        administrative_id, valid_from, valid_to, coord_system, bound_west,
                        bound_south, bound_east, bound_north, area)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT (uuid) DO UPDATE SET
                        label = EXCLUDED.label,
                        source = EXCLUDED.source,
                        administrative_name = EXCLUDED.administrative_name,
                        administrative_id = EXCLUDED.administrative_id,
                        valid_from = EXCLUDED.valid_from,
                        valid_to = EXCLUDED.valid_to,
                        coord_system = EXCLUDED.coord_system,
                        bound_west = EXCLUDED.bound_west,
                        bound_south = EXCLUDED.bound_south,
                        bound_east = EXCLUDED.bound_east,
                        bound_north = EXCLUDED.bound_north,
                        area = EXCLUDED.area",
                    duckdb::params![
                        header.uuid,
                        map.label,
                        map.source,
                        map.administrative_name.as_deref(),
                        map.administrative_id.as_deref(),
                        valid_from,
                        valid_to,
                        header.coord_system,
                        bounds.west,
                        bounds.south,
                        bounds.east,
                        bounds.north,
                        header.area,
                    ],
                )?;
            }
        }

        Ok(if existed {
            EditOutcome::Replaced
        } else {
            EditOutcome::Inserted
        })
    }

    fn update(&self, record: &IndexRecord) -> Result<EditOutcome, DbError> {
        let header = &record.header;
        let bounds = &header.bounds;

        let changed = match &record.attributes {
            RecordAttributes::Alert(alert) => {
                let sent = normalize_timestamp(&alert.sent)?;
                self.conn.execute(
                    "UPDATE alert_data SET identifier = ?, sent = ?, source_path = ?,
                        altitude = ?, ceiling = ?, coord_system = ?, bound_west = ?,
                        bound_south = ?, bound_east = ?, bound_north = ?, area = ?
                     WHERE uuid = ?",
                    duckdb::params![
                        alert.identifier,
                        sent,
                        alert.source_path,
                        alert.altitude,
                        alert.ceiling,
                        header.coord_system,
                        bounds.west,
                        bounds.south,
                        bounds.east,
                        bounds.north,
                        header.area,
                        header.uuid,
                    ],
                )?
            }
            RecordAttributes::Map(map) => {
                let valid_from = map.valid_from.as_deref().map(normalize_timestamp).transpose()?;
                let valid_to = map.valid_to.as_deref().map(normalize_timestamp).transpose()?;
                self.conn.execute(
                    "UPDATE map_data SET label = ?, source = ?, administrative_name = ?,
                        administrative_id = ?, valid_from = ?, valid_to = ?,
                        coord_system = ?, bound_west = ?, bound_south = ?,
                        bound_east = ?, bound_north = ?, area = ?
                     WHERE uuid = ?",
                    duckdb::params![
                        map.label,
                        map.source,
                        map.administrative_name.as_deref(),
                        map.administrative_id.as_deref(),
                        valid_from,
                        valid_to,
                        header.coord_system,
                        bounds.west,
                        bounds.south,
                        bounds.east,
                        bounds.north,
                        header.area,
                        header.uuid,
                    ],
                )?
            }
        };

        if changed == 0 {
            return Err(DbError::NotFound {
                domain: record.domain(),
                uuid: header.uuid.clone(),
            });
        }

        Ok(EditOutcome::Updated)
    }

    fn contains(&self, domain: Domain, uuid: &str) -> Result<bool, DbError> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE uuid = ?", domain.table_name()),
            [uuid],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Deletes the row of `domain` with the given UUID. Returns whether a
    /// row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the delete fails.
    pub fn delete_record(&self, domain: Domain, uuid: &str) -> Result<bool, DbError> {
        let removed = self.conn.execute(
            &format!("DELETE FROM {} WHERE uuid = ?", domain.table_name()),
            [uuid],
        )?;
        Ok(removed > 0)
    }

    /// UUID of the map region with the given source and label, if indexed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn find_map(&self, source: &str, label: &str) -> Result<Option<String>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT uuid FROM map_data WHERE source = ? AND label = ? ORDER BY id LIMIT 1")?;
        match stmt.query_row([source, label], |row| row.get(0)) {
            Ok(uuid) => Ok(Some(uuid)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::DuckDb(e)),
        }
    }

    /// Returns the rows of `domain` whose bounding box strictly overlaps
    /// `query`, in ascending surrogate-id order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn search_bounds(&self, domain: Domain, query: &BoundingBox) -> Result<Vec<IndexEntry>, DbError> {
        let sql = format!(
            "SELECT {} FROM {}
             WHERE bound_west < ? AND bound_east > ? AND bound_south < ? AND bound_north > ?
             ORDER BY id",
            entry_columns(domain),
            domain.table_name()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(duckdb::params![
            query.east,
            query.west,
            query.north,
            query.south
        ])?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(read_entry(row)?);
        }

        log::debug!(
            "Bounding box {query:?} matched {} {domain} rows",
            entries.len()
        );
        Ok(entries)
    }

    /// Fetches the row of `domain` with the given UUID.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn get(&self, domain: Domain, uuid: &str) -> Result<Option<IndexEntry>, DbError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE uuid = ?",
            entry_columns(domain),
            domain.table_name()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([uuid])?;
        match rows.next()? {
            Some(row) => Ok(Some(read_entry(row)?)),
            None => Ok(None),
        }
    }
}

const fn current_version(domain: Domain) -> i64 {
    match domain {
        Domain::Alert => ALERT_SCHEMA_VERSION,
        Domain::Map => MAP_SCHEMA_VERSION,
    }
}

const fn entry_columns(domain: Domain) -> &'static str {
    match domain {
        Domain::Alert => {
            "id, uuid, identifier, bound_west, bound_south, bound_east, bound_north, area, \
             altitude, ceiling"
        }
        Domain::Map => {
            "id, uuid, label, bound_west, bound_south, bound_east, bound_north, area, \
             CAST(NULL AS DOUBLE), CAST(NULL AS DOUBLE)"
        }
    }
}

fn read_entry(row: &duckdb::Row<'_>) -> Result<IndexEntry, DbError> {
    let altitude: Option<f64> = row.get(8)?;
    let ceiling: Option<f64> = row.get(9)?;
    Ok(IndexEntry {
        id: row.get(0)?,
        uuid: row.get(1)?,
        name: row.get(2)?,
        bounds: BoundingBox::new(row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?),
        area: row.get(7)?,
        vertical: altitude.zip(ceiling),
    })
}

fn normalize_timestamp(value: &str) -> Result<String, DbError> {
    Ok(parse_timestamp(value)?.to_rfc3339_opts(SecondsFormat::Secs, true))
}

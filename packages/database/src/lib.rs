#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Embedded spatial index and canonical file layout for metalert search.
//!
//! The index is a `DuckDB` file with one table per [`Domain`]: a derived,
//! rebuildable projection of the canonical JSON records kept under the
//! data folder (see [`paths`]).
//!
//! [`Domain`]: metalert_models::Domain

pub mod index_db;
pub mod paths;

pub use index_db::{EditOutcome, SpatialIndex};

use metalert_models::{Domain, ValidationError};

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error, including constraint violations.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error preparing the store location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The record was refused before reaching the store.
    #[error("Invalid record: {0}")]
    Validation(#[from] ValidationError),

    /// An update targeted a UUID with no row.
    #[error("No {domain} record with UUID {uuid}")]
    NotFound {
        /// Table searched.
        domain: Domain,
        /// UUID requested.
        uuid: String,
    },
}

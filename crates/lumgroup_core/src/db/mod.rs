//! GeoPackage connection bootstrap.
//!
//! # Responsibility
//! - Open an existing GeoPackage file as a SQLite connection.
//! - Reject files that are not readable SQLite databases or lack the
//!   GeoPackage catalogue tables.
//!
//! # Invariants
//! - Opening never creates a new file.
//! - Callers never read layer data from a connection that failed validation.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod open;

pub use open::{open_gpkg, GPKG_APPLICATION_ID};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The path does not point at an existing file.
    MissingFile(String),
    /// The file is a SQLite database but not a GeoPackage.
    NotAGeoPackage {
        path: String,
        missing_table: &'static str,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::MissingFile(path) => write!(f, "file does not exist: {path}"),
            Self::NotAGeoPackage {
                path,
                missing_table,
            } => write!(
                f,
                "`{path}` is not a valid GeoPackage (missing table `{missing_table}`)"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::MissingFile(_) | Self::NotAGeoPackage { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

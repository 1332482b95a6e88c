//! Connection bootstrap utilities for GeoPackage files.
//!
//! # Responsibility
//! - Open an existing file read-write without creating it.
//! - Verify the GeoPackage catalogue before handing out the connection.
//!
//! # Invariants
//! - Returned connections have passed `validate_geopackage`.

use super::{DbError, DbResult};
use log::{error, info, warn};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::{Duration, Instant};

/// `application_id` value (`GPKG` in ASCII) written by GeoPackage 1.2+.
pub const GPKG_APPLICATION_ID: i32 = 0x4750_4B47;

/// Legacy `application_id` (`GP10`/`GP11`) of GeoPackage 1.0 and 1.1.
const LEGACY_APPLICATION_IDS: [i32; 2] = [0x4750_3130, 0x4750_3131];

const REQUIRED_TABLES: [&str; 3] = [
    "gpkg_contents",
    "gpkg_spatial_ref_sys",
    "gpkg_geometry_columns",
];

/// Opens a GeoPackage file and validates its catalogue tables.
///
/// # Side effects
/// - Emits `gpkg_open` logging events with duration and status.
///
/// # Errors
/// - `DbError::MissingFile` when `path` is not an existing file.
/// - `DbError::Sqlite` when the file cannot be opened as SQLite.
/// - `DbError::NotAGeoPackage` when catalogue tables are missing.
pub fn open_gpkg(path: impl AsRef<Path>) -> DbResult<Connection> {
    let path = path.as_ref();
    let started_at = Instant::now();
    info!("event=gpkg_open module=db status=start");

    if !path.is_file() {
        error!(
            "event=gpkg_open module=db status=error duration_ms={} error_code=missing_file",
            started_at.elapsed().as_millis()
        );
        return Err(DbError::MissingFile(path.display().to_string()));
    }

    let conn = match Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    ) {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=gpkg_open module=db status=error duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&conn, path) {
        Ok(()) => {
            info!(
                "event=gpkg_open module=db status=ok duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=gpkg_open module=db status=error duration_ms={} error_code=gpkg_validation_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &Connection, path: &Path) -> DbResult<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    validate_geopackage(conn, path)
}

fn validate_geopackage(conn: &Connection, path: &Path) -> DbResult<()> {
    // A non-SQLite file only fails on first read, not on open.
    let application_id: i32 = conn.query_row("PRAGMA application_id;", [], |row| row.get(0))?;
    if application_id != GPKG_APPLICATION_ID && !LEGACY_APPLICATION_IDS.contains(&application_id)
    {
        warn!(
            "event=gpkg_open module=db status=warn reason=unexpected_application_id application_id={application_id:#x}"
        );
    }

    for table in REQUIRED_TABLES {
        if !table_exists(conn, table)? {
            return Err(DbError::NotAGeoPackage {
                path: path.display().to_string(),
                missing_table: table,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

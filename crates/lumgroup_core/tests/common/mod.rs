#![allow(dead_code)]

use rusqlite::{params, Connection};
use std::path::Path;

pub const WGS84_DEFINITION: &str = "GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563]],PRIMEM[\"Greenwich\",0],UNIT[\"degree\",0.0174532925199433]]";

/// Creates a minimal GeoPackage catalogue at `path`.
pub fn create_gpkg(path: &Path) -> Connection {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "PRAGMA application_id = 1196444487;
         CREATE TABLE gpkg_spatial_ref_sys (
            srs_name TEXT NOT NULL,
            srs_id INTEGER PRIMARY KEY,
            organization TEXT NOT NULL,
            organization_coordsys_id INTEGER NOT NULL,
            definition TEXT NOT NULL,
            description TEXT
         );
         CREATE TABLE gpkg_contents (
            table_name TEXT NOT NULL PRIMARY KEY,
            data_type TEXT NOT NULL,
            identifier TEXT UNIQUE,
            description TEXT DEFAULT '',
            last_change DATETIME,
            min_x DOUBLE,
            min_y DOUBLE,
            max_x DOUBLE,
            max_y DOUBLE,
            srs_id INTEGER
         );
         CREATE TABLE gpkg_geometry_columns (
            table_name TEXT NOT NULL,
            column_name TEXT NOT NULL,
            geometry_type_name TEXT NOT NULL,
            srs_id INTEGER NOT NULL,
            z TINYINT NOT NULL,
            m TINYINT NOT NULL,
            PRIMARY KEY (table_name, column_name)
         );
         INSERT INTO gpkg_spatial_ref_sys VALUES ('Undefined cartesian SRS', -1, 'NONE', -1, 'undefined', NULL);
         INSERT INTO gpkg_spatial_ref_sys VALUES ('Undefined geographic SRS', 0, 'NONE', 0, 'undefined', NULL);",
    )
    .unwrap();
    conn.execute(
        "INSERT INTO gpkg_spatial_ref_sys VALUES ('WGS 84', 4326, 'EPSG', 4326, ?1, NULL);",
        [WGS84_DEFINITION],
    )
    .unwrap();
    conn
}

/// Registers a feature table `fid, geom, <extra columns>`.
pub fn add_feature_layer(
    conn: &Connection,
    name: &str,
    geometry_type: &str,
    srs_id: i64,
    extra_columns: &[(&str, &str)],
) {
    let mut columns = vec![
        "\"fid\" INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        format!("\"geom\" {geometry_type}"),
    ];
    columns.extend(
        extra_columns
            .iter()
            .map(|(column, declared)| format!("\"{column}\" {declared}")),
    );
    conn.execute_batch(&format!(
        "CREATE TABLE \"{name}\" ({});",
        columns.join(", ")
    ))
    .unwrap();
    conn.execute(
        "INSERT INTO gpkg_contents (table_name, data_type, identifier, srs_id)
         VALUES (?1, 'features', ?1, ?2);",
        params![name, srs_id],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO gpkg_geometry_columns VALUES (?1, 'geom', ?2, ?3, 0, 0);",
        params![name, geometry_type, srs_id],
    )
    .unwrap();
}

/// Registers a plain attribute table without geometry.
pub fn add_attribute_table(conn: &Connection, name: &str) {
    conn.execute_batch(&format!(
        "CREATE TABLE \"{name}\" (\"fid\" INTEGER PRIMARY KEY AUTOINCREMENT, \"label\" TEXT);"
    ))
    .unwrap();
    conn.execute(
        "INSERT INTO gpkg_contents (table_name, data_type, identifier) VALUES (?1, 'attributes', ?1);",
        [name],
    )
    .unwrap();
}

pub fn insert_feature(conn: &Connection, layer: &str, fid: i64, geom: Option<Vec<u8>>, id: Option<i64>) {
    conn.execute(
        &format!("INSERT INTO \"{layer}\" (\"fid\", \"geom\", \"ID\") VALUES (?1, ?2, ?3);"),
        params![fid, geom, id],
    )
    .unwrap();
}

/// Reads `(fid, ID, ITEM, LumCantPos)` ordered by fid.
pub fn read_outputs(conn: &Connection, layer: &str) -> Vec<(i64, Option<i64>, Option<i64>, Option<i64>)> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT \"fid\", \"ID\", \"ITEM\", \"LumCantPos\" FROM \"{layer}\" ORDER BY \"fid\";"
        ))
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

/// Reads `(fid, ID)` ordered by fid.
pub fn read_ids(conn: &Connection, layer: &str) -> Vec<(i64, Option<i64>)> {
    let mut stmt = conn
        .prepare(&format!("SELECT \"fid\", \"ID\" FROM \"{layer}\" ORDER BY \"fid\";"))
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

pub fn column_names(conn: &Connection, layer: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info(\"{layer}\");"))
        .unwrap();
    stmt.query_map([], |row| row.get::<_, String>("name"))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

fn gpkg_header(srs_id: i32) -> Vec<u8> {
    let mut blob = vec![b'G', b'P', 0, 0x01];
    blob.extend_from_slice(&srs_id.to_le_bytes());
    blob
}

/// GeoPackage blob holding a little-endian 2D point.
pub fn point_blob(x: f64, y: f64) -> Vec<u8> {
    let mut blob = gpkg_header(4326);
    blob.push(1);
    blob.extend_from_slice(&1u32.to_le_bytes());
    blob.extend_from_slice(&x.to_le_bytes());
    blob.extend_from_slice(&y.to_le_bytes());
    blob
}

/// GeoPackage blob holding a single-ring 2D polygon; the ring is closed here.
pub fn polygon_blob(ring: &[(f64, f64)]) -> Vec<u8> {
    let mut blob = gpkg_header(4326);
    blob.push(1);
    blob.extend_from_slice(&3u32.to_le_bytes());
    blob.extend_from_slice(&1u32.to_le_bytes());
    let mut points = ring.to_vec();
    if points.first() != points.last() {
        points.push(ring[0]);
    }
    blob.extend_from_slice(&(points.len() as u32).to_le_bytes());
    for (x, y) in points {
        blob.extend_from_slice(&x.to_le_bytes());
        blob.extend_from_slice(&y.to_le_bytes());
    }
    blob
}

//! Sublayer catalogue of a GeoPackage.
//!
//! # Responsibility
//! - Read `gpkg_contents` / `gpkg_geometry_columns` into typed descriptors.
//! - Resolve spatial reference definitions for export.
//!
//! # Invariants
//! - Descriptors are ordered by table name and indexed from 0 in that order.

use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

/// Kind of dataset registered in `gpkg_contents.data_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerDataType {
    Features,
    Attributes,
    /// Tiles or extension-defined types; never offered for reconciliation.
    Other(String),
}

impl LayerDataType {
    fn parse(value: &str) -> Self {
        match value {
            "features" => Self::Features,
            "attributes" => Self::Attributes,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One named dataset inside a GeoPackage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerDescriptor {
    pub index: usize,
    pub name: String,
    pub data_type: LayerDataType,
    pub identifier: Option<String>,
    pub geometry_column: Option<String>,
    pub geometry_type: Option<String>,
    pub srs_id: Option<i64>,
}

impl LayerDescriptor {
    /// Whether this layer can be reconciled (feature table with geometry).
    pub fn is_vector(&self) -> bool {
        self.data_type == LayerDataType::Features && self.geometry_column.is_some()
    }
}

/// Lists every layer registered in the GeoPackage catalogue.
pub fn list_layers(conn: &Connection) -> rusqlite::Result<Vec<LayerDescriptor>> {
    let mut stmt = conn.prepare(
        "SELECT
            c.table_name,
            c.data_type,
            c.identifier,
            g.column_name,
            g.geometry_type_name,
            COALESCE(g.srs_id, c.srs_id) AS srs_id
         FROM gpkg_contents c
         LEFT JOIN gpkg_geometry_columns g ON g.table_name = c.table_name
         ORDER BY c.table_name ASC;",
    )?;
    let mut rows = stmt.query([])?;
    let mut layers = Vec::new();
    while let Some(row) = rows.next()? {
        layers.push(parse_layer_row(layers.len(), row)?);
    }
    Ok(layers)
}

/// Lists only feature layers that carry a geometry column, re-indexed from 0.
pub fn list_vector_layers(conn: &Connection) -> rusqlite::Result<Vec<LayerDescriptor>> {
    Ok(list_layers(conn)?
        .into_iter()
        .filter(LayerDescriptor::is_vector)
        .enumerate()
        .map(|(index, layer)| LayerDescriptor { index, ..layer })
        .collect())
}

/// Returns the WKT definition of a spatial reference system, if registered.
pub fn srs_definition(conn: &Connection, srs_id: i64) -> rusqlite::Result<Option<String>> {
    let definition: Option<Option<String>> = conn
        .query_row(
            "SELECT definition FROM gpkg_spatial_ref_sys WHERE srs_id = ?1;",
            [srs_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(definition
        .flatten()
        .filter(|value| !value.trim().is_empty() && value.trim() != "undefined"))
}

fn parse_layer_row(index: usize, row: &Row<'_>) -> rusqlite::Result<LayerDescriptor> {
    let data_type: String = row.get("data_type")?;
    Ok(LayerDescriptor {
        index,
        name: row.get("table_name")?,
        data_type: LayerDataType::parse(&data_type),
        identifier: row.get("identifier")?,
        geometry_column: row.get("column_name")?,
        geometry_type: row.get("geometry_type_name")?,
        srs_id: row.get("srs_id")?,
    })
}

//! Layer repository contract and GeoPackage implementation.
//!
//! # Responsibility
//! - Expose schema introspection and field creation for one feature table.
//! - Load `FeatureRecord`s with canonical geometry keys.
//! - Apply staged attribute edits inside a single transaction.
//!
//! # Invariants
//! - Rows are always enumerated by primary key ascending.
//! - `apply_edits` either commits every edit or none.
//! - Identifiers are always quoted before being spliced into SQL.

use crate::db::DbError;
use crate::gpkg::geometry::{geometry_key, GeometryError};
use crate::gpkg::layers::{list_layers, srs_definition, LayerDescriptor};
use crate::model::feature::{FeatureRecord, FieldSpec, InternalId, RecordFields};
use crate::model::layer::{AttributeEdit, AttributeValue, ColumnInfo, LayerRow};
use log::warn;
use rusqlite::types::Value;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for layer access and edits.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    LayerNotFound(String),
    NotAVectorLayer(String),
    MissingColumn {
        layer: String,
        column: String,
    },
    InvalidGeometry {
        internal_id: InternalId,
        source: GeometryError,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::LayerNotFound(name) => write!(f, "layer not found: {name}"),
            Self::NotAVectorLayer(name) => write!(f, "layer `{name}` has no geometry column"),
            Self::MissingColumn { layer, column } => {
                write!(f, "layer `{layer}` has no `{column}` column")
            }
            Self::InvalidGeometry {
                internal_id,
                source,
            } => write!(f, "invalid geometry on feature {internal_id}: {source}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidGeometry { source, .. } => Some(source),
            Self::LayerNotFound(_) | Self::NotAVectorLayer(_) | Self::MissingColumn { .. } => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Vector-data access contract for one layer.
pub trait LayerRepository {
    fn layer(&self) -> &LayerDescriptor;
    /// All table columns in declaration order, geometry included.
    fn columns(&self) -> RepoResult<Vec<ColumnInfo>>;
    fn add_field(&self, spec: &FieldSpec) -> RepoResult<()>;
    /// Loads reconciliation records ordered by internal id ascending.
    fn load_features(&self, fields: &RecordFields) -> RepoResult<Vec<FeatureRecord>>;
    /// Columns returned in `LayerRow::attributes`, in order.
    fn attribute_columns(&self) -> RepoResult<Vec<ColumnInfo>>;
    fn scan_rows(&self) -> RepoResult<Vec<LayerRow>>;
    /// Writes all edits in one transaction and returns the number of values written.
    fn apply_edits(&self, edits: &[AttributeEdit]) -> RepoResult<usize>;
    /// WKT definition of the layer's spatial reference, when one is registered.
    fn srs_definition(&self) -> RepoResult<Option<String>>;

    /// Returns the schema's spelling of `name`, compared ASCII case-insensitively.
    fn find_field(&self, name: &str) -> RepoResult<Option<String>> {
        Ok(self
            .columns()?
            .into_iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
            .map(|column| column.name))
    }
}

/// SQLite-backed repository for a GeoPackage feature table.
pub struct GpkgLayerRepository<'conn> {
    conn: &'conn Connection,
    layer: LayerDescriptor,
    geometry_column: String,
    primary_key: String,
}

impl<'conn> GpkgLayerRepository<'conn> {
    /// Binds the repository to the feature table named `layer_name`.
    ///
    /// # Errors
    /// - `RepoError::LayerNotFound` when the name is not in `gpkg_contents`.
    /// - `RepoError::NotAVectorLayer` when the table has no geometry column.
    pub fn try_new(conn: &'conn Connection, layer_name: &str) -> RepoResult<Self> {
        let layer = list_layers(conn)?
            .into_iter()
            .find(|layer| layer.name == layer_name)
            .ok_or_else(|| RepoError::LayerNotFound(layer_name.to_string()))?;
        let geometry_column = match (&layer.geometry_column, layer.is_vector()) {
            (Some(column), true) => column.clone(),
            _ => return Err(RepoError::NotAVectorLayer(layer.name.clone())),
        };

        let columns = table_columns(conn, &layer.name)?;
        if columns.is_empty() {
            return Err(RepoError::LayerNotFound(layer.name.clone()));
        }
        let primary_key = columns
            .iter()
            .find(|column| column.is_primary_key && column.declared_type == "INTEGER")
            .map_or_else(|| "rowid".to_string(), |column| column.name.clone());

        Ok(Self {
            conn,
            layer,
            geometry_column,
            primary_key,
        })
    }

    fn table(&self) -> String {
        quote_ident(&self.layer.name)
    }
}

impl LayerRepository for GpkgLayerRepository<'_> {
    fn layer(&self) -> &LayerDescriptor {
        &self.layer
    }

    fn columns(&self) -> RepoResult<Vec<ColumnInfo>> {
        table_columns(self.conn, &self.layer.name)
    }

    fn add_field(&self, spec: &FieldSpec) -> RepoResult<()> {
        self.conn.execute(
            &format!(
                "ALTER TABLE {} ADD COLUMN {} {};",
                self.table(),
                quote_ident(&spec.name),
                spec.field_type.sql_type()
            ),
            [],
        )?;
        Ok(())
    }

    fn load_features(&self, fields: &RecordFields) -> RepoResult<Vec<FeatureRecord>> {
        let id_column = self
            .find_field(&fields.id)?
            .ok_or_else(|| RepoError::MissingColumn {
                layer: self.layer.name.clone(),
                column: fields.id.clone(),
            })?;
        let item_column = self.find_field(&fields.item)?;
        let count_column = self.find_field(&fields.lum_cant_pos)?;

        let select_or_null = |column: &Option<String>| {
            column
                .as_deref()
                .map_or_else(|| "NULL".to_string(), quote_ident)
        };
        let sql = format!(
            "SELECT {pk}, {id}, {item}, {count}, {geom} FROM {table} ORDER BY {pk} ASC;",
            pk = quote_ident(&self.primary_key),
            id = quote_ident(&id_column),
            item = select_or_null(&item_column),
            count = select_or_null(&count_column),
            geom = quote_ident(&self.geometry_column),
            table = self.table(),
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_feature_row(row)?);
        }
        Ok(records)
    }

    fn attribute_columns(&self) -> RepoResult<Vec<ColumnInfo>> {
        Ok(self
            .columns()?
            .into_iter()
            .filter(|column| {
                column.name != self.geometry_column
                    && !column.name.eq_ignore_ascii_case(&self.primary_key)
            })
            .collect())
    }

    fn scan_rows(&self) -> RepoResult<Vec<LayerRow>> {
        let attributes = self.attribute_columns()?;
        let mut select = vec![
            quote_ident(&self.primary_key),
            quote_ident(&self.geometry_column),
        ];
        select.extend(attributes.iter().map(|column| quote_ident(&column.name)));
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} ASC;",
            select.join(", "),
            self.table(),
            quote_ident(&self.primary_key)
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(attributes.len());
            for index in 0..attributes.len() {
                values.push(AttributeValue::from(row.get::<_, Value>(index + 2)?));
            }
            result.push(LayerRow {
                internal_id: row.get(0)?,
                geometry: row.get(1)?,
                attributes: values,
            });
        }
        Ok(result)
    }

    fn apply_edits(&self, edits: &[AttributeEdit]) -> RepoResult<usize> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut changed = 0;
        for edit in edits {
            let mut stmt = tx.prepare_cached(&format!(
                "UPDATE {} SET {} = ?1 WHERE {} = ?2;",
                self.table(),
                quote_ident(&edit.field),
                quote_ident(&self.primary_key)
            ))?;
            changed += stmt.execute(params![edit.value, edit.internal_id])?;
        }
        tx.commit()?;
        Ok(changed)
    }

    fn srs_definition(&self) -> RepoResult<Option<String>> {
        match self.layer.srs_id {
            Some(srs_id) => Ok(srs_definition(self.conn, srs_id)?),
            None => Ok(None),
        }
    }
}

fn parse_feature_row(row: &Row<'_>) -> RepoResult<FeatureRecord> {
    let internal_id: InternalId = row.get(0)?;
    let id = parse_id(internal_id, row.get::<_, Value>(1)?);
    let item = parse_id(internal_id, row.get::<_, Value>(2)?);
    let lum_cant_pos = parse_id(internal_id, row.get::<_, Value>(3)?).unwrap_or(0);
    let blob: Option<Vec<u8>> = row.get(4)?;
    let geometry_key =
        geometry_key(blob.as_deref()).map_err(|source| RepoError::InvalidGeometry {
            internal_id,
            source,
        })?;

    Ok(FeatureRecord {
        internal_id,
        id,
        item,
        lum_cant_pos,
        geometry_key,
    })
}

/// Reads an integer attribute, treating unusable values as NULL.
fn parse_id(internal_id: InternalId, value: Value) -> Option<i64> {
    match value {
        Value::Null => None,
        Value::Integer(v) => Some(v),
        Value::Real(v) if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 => {
            Some(v as i64)
        }
        Value::Text(ref text) if text.trim().parse::<i64>().is_ok() => text.trim().parse().ok(),
        other => {
            warn!(
                "event=feature_load module=repo status=warn reason=unusable_integer internal_id={} value_type={}",
                internal_id,
                value_type_name(&other)
            );
            None
        }
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Integer(_) => "integer",
        Value::Real(_) => "real",
        Value::Text(_) => "text",
        Value::Blob(_) => "blob",
    }
}

fn table_columns(conn: &Connection, table: &str) -> RepoResult<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        let declared: Option<String> = row.get("type")?;
        columns.push(ColumnInfo {
            name: row.get("name")?,
            declared_type: declared.unwrap_or_default().trim().to_ascii_uppercase(),
            is_primary_key: row.get::<_, i64>("pk")? > 0,
        });
    }
    Ok(columns)
}

/// Quotes an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

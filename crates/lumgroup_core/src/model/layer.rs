//! Raw layer rows and column metadata.
//!
//! Used by the export path, which needs every attribute rather than the
//! handful reconciliation touches.

use crate::model::feature::InternalId;
use serde::Serialize;

/// Column metadata as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared SQL type, upper-cased; empty when undeclared.
    pub declared_type: String,
    pub is_primary_key: bool,
}

/// Storage class of a single attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<rusqlite::types::Value> for AttributeValue {
    fn from(value: rusqlite::types::Value) -> Self {
        use rusqlite::types::Value;
        match value {
            Value::Null => Self::Null,
            Value::Integer(v) => Self::Integer(v),
            Value::Real(v) => Self::Real(v),
            Value::Text(v) => Self::Text(v),
            Value::Blob(v) => Self::Blob(v),
        }
    }
}

/// One full layer row.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerRow {
    pub internal_id: InternalId,
    pub geometry: Option<Vec<u8>>,
    /// Values of the attribute columns, in `LayerRepository::attribute_columns` order.
    pub attributes: Vec<AttributeValue>,
}

/// A single staged attribute write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeEdit {
    pub internal_id: InternalId,
    pub field: String,
    pub value: Option<i64>,
}

//! Feature record and field schema types.
//!
//! # Responsibility
//! - Hold the attributes touched by reconciliation for one layer row.
//! - Describe required fields and their storage types.
//!
//! # Invariants
//! - `id` is `None` only before identifier reconciliation.
//! - `lum_cant_pos` is `0` on every record that is not a group representative.

use serde::{Deserialize, Serialize};

/// Storage handle of a layer row (the table's integer primary key).
pub type InternalId = i64;

/// Field name of the domain identifier column.
pub const ID_FIELD: &str = "ID";
/// Field name of the group representative column.
pub const ITEM_FIELD: &str = "ITEM";
/// Field name of the group cardinality column.
pub const LUM_CANT_POS_FIELD: &str = "LumCantPos";

/// One layer row as seen by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Used only to address edits; never rewritten.
    pub internal_id: InternalId,
    /// Domain identifier, `None` when the stored value is NULL or unusable.
    pub id: Option<i64>,
    /// Minimum `id` of the record's geometry group.
    pub item: Option<i64>,
    /// Group cardinality on the representative record, `0` elsewhere.
    pub lum_cant_pos: i64,
    /// Canonical WKT of the geometry; empty for NULL geometry.
    pub geometry_key: String,
}

impl FeatureRecord {
    /// Creates a record with output attributes at their defaults.
    pub fn new(internal_id: InternalId, id: Option<i64>, geometry_key: impl Into<String>) -> Self {
        Self {
            internal_id,
            id,
            item: None,
            lum_cant_pos: 0,
            geometry_key: geometry_key.into(),
        }
    }
}

/// Semantic attribute type for schema normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Real,
    Text,
}

impl FieldType {
    /// SQLite declared type used when adding the column.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }
}

/// A field that must exist on the layer schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Names of the layer columns read and written by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFields {
    pub id: String,
    pub item: String,
    pub lum_cant_pos: String,
}

impl Default for RecordFields {
    fn default() -> Self {
        Self {
            id: ID_FIELD.to_string(),
            item: ITEM_FIELD.to_string(),
            lum_cant_pos: LUM_CANT_POS_FIELD.to_string(),
        }
    }
}

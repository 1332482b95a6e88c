//! Identifier and grouping reconciliation passes.
//!
//! # Responsibility
//! - Normalize the layer schema so output fields exist.
//! - Repair missing or duplicate identifiers.
//! - Group records by geometry key and assign representatives.
//!
//! # Invariants
//! - Passes operate on records ordered by internal id ascending; that order is
//!   the only tie-break for duplicate identifiers.
//! - Pure passes never touch storage; persistence belongs to the service layer.

pub mod grouping;
pub mod ids;
pub mod schema;

pub use grouping::{assign_groups, GroupingError, GroupingSummary};
pub use ids::{reconcile_ids, IdError, IdReassignment, IdReconciliation};
pub use schema::{normalize_schema, FieldOutcome, FieldReport};

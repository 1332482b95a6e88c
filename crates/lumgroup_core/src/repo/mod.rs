//! Repository layer over GeoPackage feature tables.
//!
//! # Responsibility
//! - Define the vector-data access contract used by reconciliation services:
//!   enumerate features, read/write attributes, add fields, commit edits.
//! - Isolate SQLite and GeoPackage details from the reconciliation passes.
//!
//! # Invariants
//! - Feature enumeration is ordered by internal id ascending.
//! - A batch of edits is committed all-or-nothing.

pub mod layer_repo;

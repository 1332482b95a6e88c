//! Domain model for layer reconciliation.
//!
//! # Responsibility
//! - Define the in-memory feature record mutated by reconciliation passes.
//! - Describe attribute fields required on the layer schema.
//!
//! # Invariants
//! - `FeatureRecord::internal_id` is never modified after load.

pub mod feature;
pub mod layer;

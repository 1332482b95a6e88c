//! Use-case services.
//!
//! # Responsibility
//! - Select the layer to process from the GeoPackage catalogue.
//! - Orchestrate the reconciliation passes and stage a single commit.
//! - Keep the CLI decoupled from storage details.

pub mod reconcile_service;
pub mod selection;

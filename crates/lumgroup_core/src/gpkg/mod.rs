//! GeoPackage format helpers.
//!
//! # Responsibility
//! - Enumerate the sublayers registered in `gpkg_contents`.
//! - Decode geometry blobs and derive canonical geometry keys.

pub mod geometry;
pub mod layers;

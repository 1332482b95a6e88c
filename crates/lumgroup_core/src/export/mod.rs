//! Export of reconciled layers to external formats.

pub mod shp;

pub use shp::{default_output_path, ensure_shp_extension, export_layer, ExportError, ExportReport};

//! GeoPackage layer reconciliation.
//!
//! Repairs the `ID` column of a vector layer, groups features sharing a
//! geometry into `ITEM`/`LumCantPos` outputs, and exports the layer as a
//! Shapefile.

pub mod db;
pub mod export;
pub mod gpkg;
pub mod logging;
pub mod model;
pub mod reconcile;
pub mod repo;
pub mod service;

pub use db::{open_gpkg, DbError, DbResult};
pub use export::{
    default_output_path, ensure_shp_extension, export_layer, ExportError, ExportReport,
};
pub use gpkg::layers::{list_layers, list_vector_layers, LayerDataType, LayerDescriptor};
pub use logging::{
    default_log_dir, default_log_level, init_logging, logging_status, LogConfig, LoggingError,
};
pub use model::feature::{FeatureRecord, FieldSpec, FieldType, RecordFields};
pub use reconcile::{
    assign_groups, normalize_schema, reconcile_ids, FieldOutcome, FieldReport, GroupingError,
    GroupingSummary, IdError, IdReconciliation,
};
pub use repo::layer_repo::{GpkgLayerRepository, LayerRepository, RepoError, RepoResult};
pub use service::reconcile_service::{
    ReconcileOptions, ReconcileReport, ReconcileService, ServiceError,
};
pub use service::selection::select_layer;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}

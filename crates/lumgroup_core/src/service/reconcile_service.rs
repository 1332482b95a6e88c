//! Reconciliation pipeline service.
//!
//! # Responsibility
//! - Run schema normalization, identifier reconciliation and grouping.
//! - Diff the mutated records and commit every change in one transaction.
//! - Produce a `ReconcileReport` describing what happened.
//!
//! # Invariants
//! - No edit is written unless every in-memory pass succeeded.
//! - A failed commit leaves storage untouched and stops the pipeline.
//! - Each run is tagged with a fresh `run_id` in its log events.

use crate::model::feature::{FeatureRecord, FieldSpec, FieldType, RecordFields};
use crate::model::layer::AttributeEdit;
use crate::reconcile::{
    assign_groups, normalize_schema, reconcile_ids, FieldReport, GroupingError, GroupingSummary,
    IdError, IdReconciliation,
};
use crate::repo::layer_repo::{LayerRepository, RepoError};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

/// Service error for the reconciliation pipeline.
#[derive(Debug)]
pub enum ServiceError {
    /// The GeoPackage has no vector layers.
    NoLayers,
    /// The user cancelled layer selection.
    NoLayerSelected,
    /// Loading or inspecting the layer failed.
    Repo(RepoError),
    /// New identifiers cannot be assigned.
    Ids(IdError),
    /// Grouping ran on records with missing identifiers.
    Grouping(GroupingError),
    /// The edit batch could not be committed; nothing was written.
    CommitFailed(RepoError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoLayers => write!(f, "no layers found in the GeoPackage"),
            Self::NoLayerSelected => write!(f, "no layer was selected"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Ids(err) => write!(f, "{err}"),
            Self::Grouping(err) => write!(f, "{err}"),
            Self::CommitFailed(err) => write!(f, "commit failed, no changes were written: {err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) | Self::CommitFailed(err) => Some(err),
            Self::Ids(err) => Some(err),
            Self::Grouping(err) => Some(err),
            Self::NoLayers | Self::NoLayerSelected => None,
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<IdError> for ServiceError {
    fn from(value: IdError) -> Self {
        Self::Ids(value)
    }
}

impl From<GroupingError> for ServiceError {
    fn from(value: GroupingError) -> Self {
        Self::Grouping(value)
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    pub fields: RecordFields,
    /// Fields created by schema normalization when missing.
    pub required_fields: Vec<FieldSpec>,
}

impl ReconcileOptions {
    /// Options for custom column names; output columns are required as integers.
    pub fn with_fields(fields: RecordFields) -> Self {
        let required_fields = vec![
            FieldSpec::new(fields.item.clone(), FieldType::Integer),
            FieldSpec::new(fields.lum_cant_pos.clone(), FieldType::Integer),
        ];
        Self {
            fields,
            required_fields,
        }
    }
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self::with_fields(RecordFields::default())
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub run_id: Uuid,
    pub layer: String,
    pub fields: Vec<FieldReport>,
    pub feature_count: usize,
    pub ids: IdReconciliation,
    pub grouping: GroupingSummary,
    pub edits_staged: usize,
    pub values_written: usize,
    /// Output columns that could not be written because they are missing.
    pub skipped_outputs: Vec<String>,
}

/// Reconciliation pipeline over one layer repository.
pub struct ReconcileService<R: LayerRepository> {
    repo: R,
    options: ReconcileOptions,
}

impl<R: LayerRepository> ReconcileService<R> {
    pub fn new(repo: R, options: ReconcileOptions) -> Self {
        Self { repo, options }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Runs the three passes and commits the resulting edits once.
    ///
    /// Field creation failures are reported in `ReconcileReport::fields` and
    /// do not stop the run.
    ///
    /// # Errors
    /// - `ServiceError::Repo` when records cannot be loaded; the schema is not
    ///   changed in that case.
    /// - `ServiceError::Ids` when the identifier range is exhausted.
    /// - `ServiceError::CommitFailed` when the edit batch is rejected.
    pub fn run(&self) -> Result<ReconcileReport, ServiceError> {
        let run_id = Uuid::new_v4();
        let started_at = Instant::now();
        let layer = self.repo.layer().name.clone();
        info!(
            "event=reconcile_run module=service status=start run_id={} layer={}",
            run_id, layer
        );

        let result = self.run_passes(run_id, &layer);
        match &result {
            Ok(report) => info!(
                "event=reconcile_run module=service status=ok run_id={} layer={} duration_ms={} features={} ids_repaired={} groups={} values_written={}",
                run_id,
                layer,
                started_at.elapsed().as_millis(),
                report.feature_count,
                report.ids.reassignments.len(),
                report.grouping.groups,
                report.values_written
            ),
            Err(err) => error!(
                "event=reconcile_run module=service status=error run_id={} layer={} duration_ms={} error_code={} error={}",
                run_id,
                layer,
                started_at.elapsed().as_millis(),
                error_code(err),
                err
            ),
        }
        result
    }

    fn run_passes(&self, run_id: Uuid, layer: &str) -> Result<ReconcileReport, ServiceError> {
        // Both checks run before normalization so an aborted run keeps the schema.
        let id_column = self.repo.find_field(&self.options.fields.id)?.ok_or_else(|| {
            RepoError::MissingColumn {
                layer: layer.to_string(),
                column: self.options.fields.id.clone(),
            }
        })?;

        let original = self.repo.load_features(&self.options.fields)?;
        let mut records = original.clone();
        let ids = reconcile_ids(&mut records)?;
        let grouping = assign_groups(&mut records)?;

        // Columns created here are all NULL, which is what `original` holds for them.
        let fields = normalize_schema(&self.repo, &self.options.required_fields);

        let item_column = self.repo.find_field(&self.options.fields.item)?;
        let count_column = self.repo.find_field(&self.options.fields.lum_cant_pos)?;

        let mut skipped_outputs = Vec::new();
        for (column, configured) in [
            (&item_column, &self.options.fields.item),
            (&count_column, &self.options.fields.lum_cant_pos),
        ] {
            if column.is_none() {
                warn!(
                    "event=reconcile_run module=service status=warn run_id={} layer={} reason=output_field_missing field={}",
                    run_id, layer, configured
                );
                skipped_outputs.push(configured.clone());
            }
        }

        let edits = diff_records(
            &original,
            &records,
            &OutputColumns {
                id: &id_column,
                item: item_column.as_deref(),
                lum_cant_pos: count_column.as_deref(),
            },
        );
        let values_written = self
            .repo
            .apply_edits(&edits)
            .map_err(ServiceError::CommitFailed)?;

        Ok(ReconcileReport {
            run_id,
            layer: layer.to_string(),
            fields,
            feature_count: records.len(),
            ids,
            grouping,
            edits_staged: edits.len(),
            values_written,
            skipped_outputs,
        })
    }
}

struct OutputColumns<'a> {
    id: &'a str,
    item: Option<&'a str>,
    lum_cant_pos: Option<&'a str>,
}

/// Stages one edit per changed `ID`/`ITEM` value. The count column is staged
/// for every record because stored NULLs load as `0` and must still be written.
fn diff_records(
    original: &[FeatureRecord],
    updated: &[FeatureRecord],
    columns: &OutputColumns<'_>,
) -> Vec<AttributeEdit> {
    let mut edits = Vec::new();
    for (before, after) in original.iter().zip(updated) {
        let mut stage = |field: &str, value: Option<i64>| {
            edits.push(AttributeEdit {
                internal_id: after.internal_id,
                field: field.to_string(),
                value,
            });
        };

        if before.id != after.id {
            stage(columns.id, after.id);
        }
        if let Some(field) = columns.item {
            if before.item != after.item {
                stage(field, after.item);
            }
        }
        if let Some(field) = columns.lum_cant_pos {
            stage(field, Some(after.lum_cant_pos));
        }
    }
    edits
}

fn error_code(err: &ServiceError) -> &'static str {
    match err {
        ServiceError::NoLayers => "no_layers",
        ServiceError::NoLayerSelected => "no_layer_selected",
        ServiceError::Repo(_) => "layer_read_failed",
        ServiceError::Ids(_) => "id_space_exhausted",
        ServiceError::Grouping(_) => "grouping_failed",
        ServiceError::CommitFailed(_) => "commit_failed",
    }
}

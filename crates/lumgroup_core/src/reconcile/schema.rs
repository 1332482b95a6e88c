//! Schema normalization.
//!
//! Ensures every required field exists on the layer. Creation failures are
//! reported per field and never abort the remaining fields.

use crate::model::feature::FieldSpec;
use crate::repo::layer_repo::LayerRepository;
use log::{error, info};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum FieldOutcome {
    AlreadyPresent,
    Created,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldReport {
    pub field: String,
    pub outcome: FieldOutcome,
}

impl FieldReport {
    pub fn is_available(&self) -> bool {
        !matches!(self.outcome, FieldOutcome::Failed(_))
    }
}

/// Adds each missing field in `specs`; existing fields are left as they are.
pub fn normalize_schema<R: LayerRepository + ?Sized>(
    repo: &R,
    specs: &[FieldSpec],
) -> Vec<FieldReport> {
    specs
        .iter()
        .map(|spec| FieldReport {
            field: spec.name.clone(),
            outcome: ensure_field(repo, spec),
        })
        .collect()
}

fn ensure_field<R: LayerRepository + ?Sized>(repo: &R, spec: &FieldSpec) -> FieldOutcome {
    let layer = repo.layer().name.as_str();
    match repo.find_field(&spec.name) {
        Ok(Some(_)) => {
            info!(
                "event=field_ensure module=reconcile status=ok layer={} field={} outcome=already_present",
                layer, spec.name
            );
            return FieldOutcome::AlreadyPresent;
        }
        Ok(None) => {}
        Err(err) => return failed(layer, spec, err.to_string()),
    }

    match repo.add_field(spec) {
        Ok(()) => {
            info!(
                "event=field_ensure module=reconcile status=ok layer={} field={} outcome=created type={}",
                layer,
                spec.name,
                spec.field_type.sql_type()
            );
            FieldOutcome::Created
        }
        Err(err) => failed(layer, spec, err.to_string()),
    }
}

fn failed(layer: &str, spec: &FieldSpec, reason: String) -> FieldOutcome {
    error!(
        "event=field_ensure module=reconcile status=error layer={} field={} error_code=field_create_failed error={}",
        layer, spec.name, reason
    );
    FieldOutcome::Failed(reason)
}

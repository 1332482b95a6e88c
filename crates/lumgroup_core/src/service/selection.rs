//! Layer selection.
//!
//! # Responsibility
//! - Resolve the layer to process from an explicit name, a single candidate,
//!   or an interactive chooser.
//!
//! # Invariants
//! - The chooser is only consulted when there are two or more candidates and
//!   no explicit name was given.

use crate::gpkg::layers::LayerDescriptor;
use crate::repo::layer_repo::RepoError;
use crate::service::reconcile_service::ServiceError;
use log::info;

/// Picks one layer from `layers`.
///
/// `chooser` receives the candidate list and returns the chosen position, or
/// `None` when the user cancels.
///
/// # Errors
/// - `ServiceError::NoLayers` when `layers` is empty.
/// - `ServiceError::Repo(RepoError::LayerNotFound)` when `requested` is unknown.
/// - `ServiceError::NoLayerSelected` when the chooser cancels or returns an
///   out-of-range position.
pub fn select_layer<F>(
    layers: &[LayerDescriptor],
    requested: Option<&str>,
    chooser: F,
) -> Result<LayerDescriptor, ServiceError>
where
    F: FnOnce(&[LayerDescriptor]) -> Option<usize>,
{
    if layers.is_empty() {
        return Err(ServiceError::NoLayers);
    }

    if let Some(name) = requested {
        return layers
            .iter()
            .find(|layer| layer.name == name)
            .cloned()
            .ok_or_else(|| ServiceError::Repo(RepoError::LayerNotFound(name.to_string())));
    }

    if let [only] = layers {
        info!(
            "event=layer_select module=service status=ok mode=single layer={}",
            only.name
        );
        return Ok(only.clone());
    }

    let chosen = chooser(layers)
        .and_then(|position| layers.get(position))
        .cloned()
        .ok_or(ServiceError::NoLayerSelected)?;
    info!(
        "event=layer_select module=service status=ok mode=interactive layer={}",
        chosen.name
    );
    Ok(chosen)
}

//! Action kinds registered by [`ActionFactory::with_builtins`](super::ActionFactory::with_builtins).

mod filter;
mod history;
mod layer;
mod sandbox;
mod state;

pub use filter::{FillSlice, Smooth};
pub use history::{Redo, Undo};
pub use layer::{CopyLayers, DeleteLayers, NewLayer, RenameLayer};
pub use sandbox::{CreateSandbox, DeleteSandbox};
pub use state::{GetState, SetState};

use super::{ActionInfo, ActionScope, Constructor, Rejection};
use crate::layer::{LayerId, LayerStore};

pub fn all() -> Vec<(&'static ActionInfo, Constructor)> {
    vec![
        (&state::SET_INFO, SetState::create),
        (&state::GET_INFO, GetState::create),
        (&layer::NEW_LAYER_INFO, NewLayer::create),
        (&layer::RENAME_LAYER_INFO, RenameLayer::create),
        (&layer::DELETE_LAYERS_INFO, DeleteLayers::create),
        (&layer::COPY_LAYERS_INFO, CopyLayers::create),
        (&filter::FILL_SLICE_INFO, FillSlice::create),
        (&filter::SMOOTH_INFO, Smooth::create),
        (&history::UNDO_INFO, Undo::create),
        (&history::REDO_INFO, Redo::create),
        (&sandbox::CREATE_SANDBOX_INFO, CreateSandbox::create),
        (&sandbox::DELETE_SANDBOX_INFO, DeleteSandbox::create),
    ]
}

fn required_layer(scope: &ActionScope<'_>, param: &str) -> Result<LayerId, Rejection> {
    scope
        .layer(param)
        .ok_or_else(|| Rejection::invalid(format!("'{}' does not name a layer", param)))
}

/// Fails with `Unavailable` while a background job holds any of `ids`.
fn ensure_available(scope: &ActionScope<'_>, ids: &[LayerId]) -> Result<(), Rejection> {
    let layers = scope.layers()?;
    for id in ids {
        let layer = layers
            .get(*id)
            .ok_or_else(|| Rejection::invalid(format!("layer {} no longer exists", id)))?;
        if let Some(notifier) = layer.busy() {
            return Err(Rejection::Unavailable {
                reason: format!("layer '{}' is busy", layer.name()),
                notifier: notifier.clone(),
            });
        }
    }
    Ok(())
}

/// Fails with `Invalid` when one layer is listed more than once.
fn ensure_distinct(scope: &ActionScope<'_>, ids: &[LayerId]) -> Result<(), Rejection> {
    for (index, id) in ids.iter().enumerate() {
        if ids[..index].contains(id) {
            let name = scope
                .layers()?
                .get(*id)
                .map(|layer| layer.name())
                .unwrap_or_else(|| id.to_string());
            return Err(Rejection::invalid(format!("layer '{}' is listed twice", name)));
        }
    }
    Ok(())
}

fn ensure_name_free(
    layers: &LayerStore,
    name: &str,
    except: Option<LayerId>,
) -> Result<(), Rejection> {
    match layers.find_by_name(name) {
        Some(id) if Some(id) != except => Err(Rejection::invalid(format!(
            "layer name '{}' is already in use",
            name
        ))),
        _ => Ok(()),
    }
}

use std::collections::HashSet;

use cairn_types::Variant;

use super::{ensure_available, ensure_distinct, ensure_name_free, required_layer};
use crate::action::{
    Action, ActionArgs, ActionInfo, ActionParam, ActionScope, CommandError, Execution, ParamKind,
    ParamSpec, Rejection,
};
use crate::layer::{validate_layer_name, Volume, MAX_VOXELS};

pub(super) static NEW_LAYER_INFO: ActionInfo = ActionInfo {
    tag: "new_layer",
    alias: "new",
    description: "Create a layer filled with a constant value.",
    params: &[
        ParamSpec::optional("name", ParamKind::Text, "layer", "layer name"),
        ParamSpec::optional("dims", ParamKind::Value, "[16,16,16]", "volume size [x,y,z]"),
        ParamSpec::optional("value", ParamKind::Double, "0", "fill value"),
    ],
};

pub(super) static RENAME_LAYER_INFO: ActionInfo = ActionInfo {
    tag: "rename_layer",
    alias: "rename",
    description: "Change the name of a layer.",
    params: &[
        ParamSpec::required("layer", ParamKind::Layer, "layer to rename"),
        ParamSpec::required("name", ParamKind::Text, "new name"),
    ],
};

pub(super) static DELETE_LAYERS_INFO: ActionInfo = ActionInfo {
    tag: "delete_layers",
    alias: "delete",
    description: "Remove layers from the workspace.",
    params: &[ParamSpec::required("layers", ParamKind::LayerList, "layers to delete")],
};

pub(super) static COPY_LAYERS_INFO: ActionInfo = ActionInfo {
    tag: "copy_layers",
    alias: "copy",
    description: "Duplicate layers; each copy gets a new provenance id.",
    params: &[
        ParamSpec::required("layers", ParamKind::LayerList, "layers to copy"),
        ParamSpec::optional("suffix", ParamKind::Text, "_copy", "appended to each name"),
    ],
};

#[derive(Debug, Clone)]
pub struct NewLayer {
    name: String,
    dims: [usize; 3],
    value: f64,
}

impl NewLayer {
    pub fn new(name: impl Into<String>, dims: [usize; 3], value: f64) -> Self {
        Self {
            name: name.into(),
            dims,
            value,
        }
    }

    pub(super) fn create(args: &ActionArgs) -> Result<Box<dyn Action>, CommandError> {
        let dims = args.int_list("dims")?;
        let bad_dims = || CommandError::BadArgument {
            action: NEW_LAYER_INFO.tag,
            name: "dims".into(),
            reason: "expected three positive sizes".into(),
        };
        if dims.len() != 3 || dims.iter().any(|d| *d <= 0) {
            return Err(bad_dims());
        }
        let mut sizes = [0usize; 3];
        for (size, d) in sizes.iter_mut().zip(&dims) {
            *size = usize::try_from(*d).map_err(|_| bad_dims())?;
        }
        Ok(Box::new(Self {
            name: args.text("name")?,
            dims: sizes,
            value: args.double("value")?,
        }))
    }
}

impl Action for NewLayer {
    fn info(&self) -> &'static ActionInfo {
        &NEW_LAYER_INFO
    }

    fn params(&self) -> Vec<(&'static str, ActionParam)> {
        let dims = self.dims.iter().map(|d| Variant::Int(*d as i64)).collect();
        vec![
            ("name", ActionParam::Value(Variant::Str(self.name.clone()))),
            ("dims", ActionParam::Value(Variant::List(dims))),
            ("value", ActionParam::Value(Variant::Double(self.value))),
        ]
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), Rejection> {
        validate_layer_name(&self.name)?;
        if self.dims.iter().any(|d| *d == 0) {
            return Err(Rejection::invalid("layer dimensions must be positive"));
        }
        if Volume::voxel_count(self.dims).is_none() {
            return Err(Rejection::invalid(format!(
                "layer dimensions {}x{}x{} exceed {} voxels",
                self.dims[0], self.dims[1], self.dims[2], MAX_VOXELS
            )));
        }
        ensure_name_free(scope.layers()?, &self.name, None)
    }

    fn execute(&mut self, scope: &mut ActionScope<'_>) -> Result<Execution, String> {
        let provenance_id = scope.output_provenance_id(0)?;
        let volume = Volume::try_new(self.dims, self.value as f32)
            .ok_or("layer dimensions are too large")?;
        let id = scope
            .layers_mut()?
            .insert(&self.name, volume, provenance_id)
            .map_err(|e| e.to_string())?;
        scope.track_created(id)?;
        Ok(Execution::Done(Some(Variant::Str(self.name.clone()))))
    }
}

#[derive(Debug, Clone)]
pub struct RenameLayer {
    layer: String,
    name: String,
}

impl RenameLayer {
    pub fn new(layer: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            name: name.into(),
        }
    }

    pub(super) fn create(args: &ActionArgs) -> Result<Box<dyn Action>, CommandError> {
        Ok(Box::new(Self {
            layer: args.layer("layer")?,
            name: args.text("name")?,
        }))
    }
}

impl Action for RenameLayer {
    fn info(&self) -> &'static ActionInfo {
        &RENAME_LAYER_INFO
    }

    fn params(&self) -> Vec<(&'static str, ActionParam)> {
        vec![
            ("layer", ActionParam::Layer(self.layer.clone())),
            ("name", ActionParam::Value(Variant::Str(self.name.clone()))),
        ]
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), Rejection> {
        let id = required_layer(scope, "layer")?;
        validate_layer_name(&self.name)?;
        ensure_name_free(scope.layers()?, &self.name, Some(id))
    }

    fn execute(&mut self, scope: &mut ActionScope<'_>) -> Result<Execution, String> {
        let id = scope.layer("layer").ok_or("layer is gone")?;
        let cell = scope
            .layers()?
            .get(id)
            .map(|layer| layer.name_state().clone())
            .ok_or_else(|| format!("layer {} no longer exists", id))?;
        let previous = cell.get();
        if cell
            .set(self.name.clone(), scope.source())
            .map_err(|e| e.to_string())?
        {
            scope.track_state(cell.id(), previous);
        }
        Ok(Execution::Done(None))
    }

    fn changes_provenance(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct DeleteLayers {
    layers: Vec<String>,
}

impl DeleteLayers {
    pub fn new(layers: Vec<String>) -> Self {
        Self { layers }
    }

    pub(super) fn create(args: &ActionArgs) -> Result<Box<dyn Action>, CommandError> {
        Ok(Box::new(Self {
            layers: args.layers("layers")?,
        }))
    }
}

impl Action for DeleteLayers {
    fn info(&self) -> &'static ActionInfo {
        &DELETE_LAYERS_INFO
    }

    fn params(&self) -> Vec<(&'static str, ActionParam)> {
        vec![("layers", ActionParam::LayerList(self.layers.clone()))]
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), Rejection> {
        let ids = scope.layer_list("layers");
        if ids.is_empty() {
            return Err(Rejection::invalid("no layers to delete"));
        }
        ensure_distinct(scope, ids)?;
        ensure_available(scope, ids)
    }

    fn execute(&mut self, scope: &mut ActionScope<'_>) -> Result<Execution, String> {
        for id in scope.layer_list("layers").to_vec() {
            let layers = scope.layers_mut()?;
            let snapshot = layers
                .snapshot(id)
                .ok_or_else(|| format!("layer {} no longer exists", id))?;
            layers.remove(id);
            scope.track_deleted(snapshot);
        }
        Ok(Execution::Done(None))
    }
}

#[derive(Debug, Clone)]
pub struct CopyLayers {
    layers: Vec<String>,
    suffix: String,
}

impl CopyLayers {
    pub(super) fn create(args: &ActionArgs) -> Result<Box<dyn Action>, CommandError> {
        Ok(Box::new(Self {
            layers: args.layers("layers")?,
            suffix: args.text("suffix")?,
        }))
    }
}

impl Action for CopyLayers {
    fn info(&self) -> &'static ActionInfo {
        &COPY_LAYERS_INFO
    }

    fn params(&self) -> Vec<(&'static str, ActionParam)> {
        vec![
            ("layers", ActionParam::LayerList(self.layers.clone())),
            ("suffix", ActionParam::Value(Variant::Str(self.suffix.clone()))),
        ]
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), Rejection> {
        let ids = scope.layer_list("layers");
        if ids.is_empty() {
            return Err(Rejection::invalid("no layers to copy"));
        }
        ensure_distinct(scope, ids)?;
        ensure_available(scope, ids)?;
        let layers = scope.layers()?;
        let mut targets = HashSet::new();
        for id in ids {
            if let Some(layer) = layers.get(*id) {
                let name = format!("{}{}", layer.name(), self.suffix);
                validate_layer_name(&name)?;
                ensure_name_free(layers, &name, None)?;
                if !targets.insert(name.clone()) {
                    return Err(Rejection::invalid(format!(
                        "copies would share the name '{}'",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    fn execute(&mut self, scope: &mut ActionScope<'_>) -> Result<Execution, String> {
        let mut names = Vec::new();
        for (index, id) in scope.layer_list("layers").to_vec().into_iter().enumerate() {
            let (name, volume, opacity) = scope
                .layers()?
                .get(id)
                .map(|layer| {
                    (
                        format!("{}{}", layer.name(), self.suffix),
                        layer.volume().clone(),
                        layer.opacity_state().get(),
                    )
                })
                .ok_or_else(|| format!("layer {} no longer exists", id))?;
            let provenance_id = scope.output_provenance_id(index)?;
            let source = scope.source();
            let layers = scope.layers_mut()?;
            let copy = layers
                .insert(&name, volume, provenance_id)
                .map_err(|e| e.to_string())?;
            if let Some(layer) = layers.get(copy) {
                layer
                    .opacity_state()
                    .set(opacity, source)
                    .map_err(|e| e.to_string())?;
            }
            scope.track_created(copy)?;
            names.push(Variant::Str(name));
        }
        Ok(Execution::Done(Some(Variant::List(names))))
    }
}

use cairn_types::Variant;

use super::{ensure_available, required_layer};
use crate::action::{
    Action, ActionArgs, ActionInfo, ActionParam, ActionScope, CheckpointSpan, Commit, CommandError,
    Execution, ParamKind, ParamSpec, Rejection,
};
use crate::layer::Volume;

pub(super) static FILL_SLICE_INFO: ActionInfo = ActionInfo {
    tag: "fill_slice",
    alias: "fill",
    description: "Set every voxel of one z-slice to a value.",
    params: &[
        ParamSpec::required("layer", ParamKind::Layer, "target layer"),
        ParamSpec::optional("slice", ParamKind::Int, "0", "z index"),
        ParamSpec::optional("value", ParamKind::Double, "1", "fill value"),
    ],
};

pub(super) static SMOOTH_INFO: ActionInfo = ActionInfo {
    tag: "smooth",
    alias: "blur",
    description: "Average each voxel with its six neighbours, in the background.",
    params: &[
        ParamSpec::required("layer", ParamKind::Layer, "target layer"),
        ParamSpec::optional("iterations", ParamKind::Int, "1", "passes, 1 to 20"),
    ],
};

const MAX_SMOOTH_ITERATIONS: i64 = 20;

#[derive(Debug, Clone)]
pub struct FillSlice {
    layer: String,
    slice: i64,
    value: f64,
}

impl FillSlice {
    pub fn new(layer: impl Into<String>, slice: i64, value: f64) -> Self {
        Self {
            layer: layer.into(),
            slice,
            value,
        }
    }

    pub(super) fn create(args: &ActionArgs) -> Result<Box<dyn Action>, CommandError> {
        Ok(Box::new(Self {
            layer: args.layer("layer")?,
            slice: args.int("slice")?,
            value: args.double("value")?,
        }))
    }
}

impl Action for FillSlice {
    fn info(&self) -> &'static ActionInfo {
        &FILL_SLICE_INFO
    }

    fn params(&self) -> Vec<(&'static str, ActionParam)> {
        vec![
            ("layer", ActionParam::Layer(self.layer.clone())),
            ("slice", ActionParam::Value(Variant::Int(self.slice))),
            ("value", ActionParam::Value(Variant::Double(self.value))),
        ]
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), Rejection> {
        let id = required_layer(scope, "layer")?;
        ensure_available(scope, &[id])?;
        let depth = scope
            .layers()?
            .get(id)
            .map(|layer| layer.volume().dims()[2])
            .unwrap_or(0);
        if self.slice < 0 || self.slice as usize >= depth {
            return Err(Rejection::invalid(format!(
                "slice {} is outside 0..{}",
                self.slice, depth
            )));
        }
        Ok(())
    }

    fn execute(&mut self, scope: &mut ActionScope<'_>) -> Result<Execution, String> {
        let id = scope.layer("layer").ok_or("layer is gone")?;
        let z = self.slice as usize;
        scope.checkpoint_volume(id, CheckpointSpan::Slices(z..z + 1))?;
        let provenance_id = scope.output_provenance_id(0)?;
        let source = scope.source();
        let layer = scope
            .layers_mut()?
            .get_mut(id)
            .ok_or_else(|| format!("layer {} no longer exists", id))?;
        layer
            .volume_mut()
            .slice_mut(z)
            .ok_or_else(|| format!("slice {} is out of range", z))?
            .fill(self.value as f32);
        layer
            .provenance_state()
            .set(provenance_id.get(), source)
            .map_err(|e| e.to_string())?;
        Ok(Execution::Done(None))
    }
}

#[derive(Debug, Clone)]
pub struct Smooth {
    layer: String,
    iterations: i64,
}

impl Smooth {
    pub fn new(layer: impl Into<String>, iterations: i64) -> Self {
        Self {
            layer: layer.into(),
            iterations,
        }
    }

    pub(super) fn create(args: &ActionArgs) -> Result<Box<dyn Action>, CommandError> {
        Ok(Box::new(Self {
            layer: args.layer("layer")?,
            iterations: args.int("iterations")?,
        }))
    }
}

impl Action for Smooth {
    fn info(&self) -> &'static ActionInfo {
        &SMOOTH_INFO
    }

    fn params(&self) -> Vec<(&'static str, ActionParam)> {
        vec![
            ("layer", ActionParam::Layer(self.layer.clone())),
            ("iterations", ActionParam::Value(Variant::Int(self.iterations))),
        ]
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), Rejection> {
        if !(1..=MAX_SMOOTH_ITERATIONS).contains(&self.iterations) {
            return Err(Rejection::invalid(format!(
                "iterations must be between 1 and {}",
                MAX_SMOOTH_ITERATIONS
            )));
        }
        let id = required_layer(scope, "layer")?;
        ensure_available(scope, &[id])
    }

    fn execute(&mut self, scope: &mut ActionScope<'_>) -> Result<Execution, String> {
        let id = scope.layer("layer").ok_or("layer is gone")?;
        scope.checkpoint_volume(id, CheckpointSpan::Full)?;
        let provenance_id = scope.output_provenance_id(0)?;
        let mut volume = scope
            .layers()?
            .get(id)
            .map(|layer| layer.volume().clone())
            .ok_or_else(|| format!("layer {} no longer exists", id))?;
        let iterations = self.iterations as usize;

        scope.spawn_worker(vec![id], move |worker| {
            for pass in 0..iterations {
                if worker.is_interrupted() {
                    return Err("interrupted".to_string());
                }
                volume = smooth_once(&volume);
                worker.report_progress((pass + 1) as f64 / iterations as f64);
            }
            let commit: Commit = Box::new(move |scope: &mut ActionScope<'_>| -> Result<Option<Variant>, String> {
                let source = scope.source();
                let layer = scope
                    .layers_mut()?
                    .get_mut(id)
                    .ok_or_else(|| format!("layer {} no longer exists", id))?;
                layer.set_volume(volume);
                layer
                    .provenance_state()
                    .set(provenance_id.get(), source)
                    .map_err(|e| e.to_string())?;
                Ok(None)
            });
            Ok(commit)
        })
    }
}

/// One pass of a six-neighbour box filter. Border voxels average over the
/// neighbours that exist.
fn smooth_once(input: &Volume) -> Volume {
    let [nx, ny, nz] = input.dims();
    let src = input.data();
    let index = |x: usize, y: usize, z: usize| (z * ny + y) * nx + x;
    let mut out = Vec::with_capacity(src.len());
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let mut sum = src[index(x, y, z)];
                let mut count = 1.0f32;
                let mut add = |v: f32| {
                    sum += v;
                    count += 1.0;
                };
                if x > 0 {
                    add(src[index(x - 1, y, z)]);
                }
                if x + 1 < nx {
                    add(src[index(x + 1, y, z)]);
                }
                if y > 0 {
                    add(src[index(x, y - 1, z)]);
                }
                if y + 1 < ny {
                    add(src[index(x, y + 1, z)]);
                }
                if z > 0 {
                    add(src[index(x, y, z - 1)]);
                }
                if z + 1 < nz {
                    add(src[index(x, y, z + 1)]);
                }
                out.push(sum / count);
            }
        }
    }
    Volume::from_data(input.dims(), out).unwrap_or_else(|| input.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothing_preserves_a_constant_volume() {
        let volume = Volume::new([3, 3, 3], 2.0);
        assert_eq!(smooth_once(&volume), volume);
    }

    #[test]
    fn smoothing_spreads_a_spike() {
        let mut volume = Volume::new([3, 1, 1], 0.0);
        volume.data_mut()[1] = 3.0;
        let out = smooth_once(&volume);
        assert_eq!(out.data(), &[1.5, 1.0, 1.5]);
    }
}

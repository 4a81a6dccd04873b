//! Layer arena: named 3-D scalar volumes addressed by generation-checked ids.
//!
//! Each layer registers its observable attributes (`name`, `provenance_id`,
//! `opacity`) as state cells under a `layer_N::` prefix in the workspace
//! registry. `name` and `provenance_id` are locked against the generic `set`
//! action: names change through `rename_layer`, ids never change.

use std::sync::Arc;

use cairn_types::{LoadPriority, ProvenanceId};
use serde::{Deserialize, Serialize};

use crate::action::Notifier;
use crate::state::{StateCell, StateError, StateGroup, StateRegistry};

/// Largest voxel count a single volume may hold (1 GiB of `f32`).
pub const MAX_VOXELS: usize = 1 << 28;

/// Dense scalar volume stored x-fastest, then y, then z.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VolumeParts")]
pub struct Volume {
    dims: [usize; 3],
    data: Vec<f32>,
}

/// Wire form of a [`Volume`]; decoding goes through [`Volume::from_data`].
#[derive(Deserialize)]
struct VolumeParts {
    dims: [usize; 3],
    data: Vec<f32>,
}

impl TryFrom<VolumeParts> for Volume {
    type Error = String;

    fn try_from(parts: VolumeParts) -> Result<Self, Self::Error> {
        let len = parts.data.len();
        Volume::from_data(parts.dims, parts.data).ok_or_else(|| {
            format!(
                "volume {}x{}x{} does not hold {} voxels",
                parts.dims[0], parts.dims[1], parts.dims[2], len
            )
        })
    }
}

impl Volume {
    /// Number of voxels for `dims`, or `None` when the product overflows
    /// or exceeds [`MAX_VOXELS`].
    pub fn voxel_count(dims: [usize; 3]) -> Option<usize> {
        dims[0]
            .checked_mul(dims[1])
            .and_then(|n| n.checked_mul(dims[2]))
            .filter(|n| *n <= MAX_VOXELS)
    }

    pub fn try_new(dims: [usize; 3], fill: f32) -> Option<Self> {
        let len = Self::voxel_count(dims)?;
        Some(Self {
            dims,
            data: vec![fill; len],
        })
    }

    /// Like [`try_new`](Self::try_new) for sizes known to be small.
    ///
    /// # Panics
    /// If `dims` exceed [`MAX_VOXELS`].
    pub fn new(dims: [usize; 3], fill: f32) -> Self {
        match Self::try_new(dims, fill) {
            Some(volume) => volume,
            None => panic!("volume {:?} is too large", dims),
        }
    }

    pub fn from_data(dims: [usize; 3], data: Vec<f32>) -> Option<Self> {
        (Self::voxel_count(dims) == Some(data.len())).then_some(Self { dims, data })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn slice_len(&self) -> usize {
        self.dims[0] * self.dims[1]
    }

    pub fn slice(&self, z: usize) -> Option<&[f32]> {
        if z >= self.dims[2] {
            return None;
        }
        let n = self.slice_len();
        Some(&self.data[z * n..(z + 1) * n])
    }

    pub fn slice_mut(&mut self, z: usize) -> Option<&mut [f32]> {
        if z >= self.dims[2] {
            return None;
        }
        let n = self.slice_len();
        Some(&mut self.data[z * n..(z + 1) * n])
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<f32> {
        if x >= self.dims[0] || y >= self.dims[1] || z >= self.dims[2] {
            return None;
        }
        Some(self.data[(z * self.dims[1] + y) * self.dims[0] + x])
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn byte_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

/// Index into a [`LayerStore`]. A removed layer's id never resolves again,
/// even after its slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId {
    index: u32,
    generation: u32,
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}

/// Detached copy of a layer, used to re-create it on undo, in sandboxes and
/// in saved projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSnapshot {
    pub key: String,
    pub position: usize,
    pub name: String,
    pub provenance_id: ProvenanceId,
    pub opacity: f64,
    pub volume: Volume,
}

impl LayerSnapshot {
    pub fn byte_size(&self) -> usize {
        self.volume.byte_size() + self.key.len() + self.name.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayerError {
    #[error("layer name '{0}' is already in use")]
    NameInUse(String),
    #[error(transparent)]
    State(#[from] StateError),
}

pub(crate) fn validate_layer_name(name: &String) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("layer name cannot be empty".into());
    }
    if trimmed.starts_with('#') || trimmed.starts_with('$') {
        return Err(format!("layer name '{}' cannot start with '#' or '$'", name));
    }
    if trimmed.eq_ignore_ascii_case("<none>") {
        return Err("'<none>' is reserved".into());
    }
    Ok(())
}

pub struct Layer {
    name: Arc<StateCell<String>>,
    provenance_id: Arc<StateCell<i64>>,
    opacity: Arc<StateCell<f64>>,
    volume: Volume,
    busy: Option<Notifier>,
    group: StateGroup,
}

impl Layer {
    fn create(
        mut group: StateGroup,
        name: &str,
        provenance_id: ProvenanceId,
        opacity: f64,
        volume: Volume,
    ) -> Result<Self, StateError> {
        validate_layer_name(&name.to_string()).map_err(|reason| StateError::Rejected {
            id: format!("{}::name", group.prefix()),
            reason,
        })?;
        let name = group.register(
            group
                .cell("name", name.to_string())
                .validator(validate_layer_name)
                .project_data()
                .locked(),
        )?;
        let provenance_id = group.register(
            group
                .cell("provenance_id", provenance_id.get())
                .project_data()
                .locked()
                .session_priority(LoadPriority::LOAD_LAST),
        )?;
        let opacity = group.register(
            group
                .cell("opacity", opacity.clamp(0.0, 1.0))
                .ranged(0.0, 1.0)
                .project_data(),
        )?;
        Ok(Self {
            name,
            provenance_id,
            opacity,
            volume,
            busy: None,
            group,
        })
    }

    /// Registry prefix of this layer's cells, stable across undo.
    pub fn key(&self) -> &str {
        self.group.prefix()
    }

    pub fn name(&self) -> String {
        self.name.get()
    }

    pub fn name_state(&self) -> &Arc<StateCell<String>> {
        &self.name
    }

    pub fn provenance_id(&self) -> ProvenanceId {
        ProvenanceId::new(self.provenance_id.get())
    }

    pub fn provenance_state(&self) -> &Arc<StateCell<i64>> {
        &self.provenance_id
    }

    pub fn opacity_state(&self) -> &Arc<StateCell<f64>> {
        &self.opacity
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn volume_mut(&mut self) -> &mut Volume {
        &mut self.volume
    }

    pub fn set_volume(&mut self, volume: Volume) {
        self.volume = volume;
    }

    /// Notifier fired when the background job holding this layer ends.
    pub fn busy(&self) -> Option<&Notifier> {
        self.busy.as_ref()
    }

    pub(crate) fn set_busy(&mut self, notifier: Notifier) {
        self.busy = Some(notifier);
    }

    pub(crate) fn clear_busy(&mut self) -> Option<Notifier> {
        self.busy.take()
    }

    fn snapshot(&self, position: usize) -> LayerSnapshot {
        LayerSnapshot {
            key: self.key().to_string(),
            position,
            name: self.name(),
            provenance_id: self.provenance_id(),
            opacity: self.opacity.get(),
            volume: self.volume.clone(),
        }
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("key", &self.key())
            .field("name", &self.name())
            .field("provenance_id", &self.provenance_id())
            .field("dims", &self.volume.dims())
            .finish()
    }
}

struct Slot {
    generation: u32,
    layer: Option<Layer>,
}

/// Arena of layers for one workspace (the live session or a sandbox).
pub struct LayerStore {
    registry: StateRegistry,
    slots: Vec<Slot>,
    free: Vec<u32>,
    order: Vec<LayerId>,
    next_number: u64,
}

impl LayerStore {
    pub fn new(registry: StateRegistry) -> Self {
        Self {
            registry,
            slots: Vec::new(),
            free: Vec::new(),
            order: Vec::new(),
            next_number: 0,
        }
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    fn allocate_group(&mut self) -> StateGroup {
        loop {
            self.next_number += 1;
            let prefix = format!("layer_{}", self.next_number);
            if let Ok(group) = StateGroup::with_prefix(&self.registry, &prefix) {
                return group;
            }
        }
    }

    fn place(&mut self, layer: Layer, position: usize) -> LayerId {
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.layer = Some(layer);
                LayerId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    layer: Some(layer),
                });
                LayerId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        let position = position.min(self.order.len());
        self.order.insert(position, id);
        id
    }

    pub fn insert(
        &mut self,
        name: &str,
        volume: Volume,
        provenance_id: ProvenanceId,
    ) -> Result<LayerId, LayerError> {
        if self.find_by_name(name).is_some() {
            return Err(LayerError::NameInUse(name.to_string()));
        }
        let group = self.allocate_group();
        let layer = Layer::create(group, name, provenance_id, 1.0, volume)?;
        log::debug!(target: "layer", "created {} '{}' ({})", layer.key(), name, provenance_id);
        let end = self.order.len();
        Ok(self.place(layer, end))
    }

    /// Re-create a layer from a snapshot, reusing its registry key when it
    /// is still free.
    pub fn restore(&mut self, snapshot: &LayerSnapshot) -> Result<LayerId, StateError> {
        let group = match StateGroup::with_prefix(&self.registry, &snapshot.key) {
            Ok(group) => {
                if let Some(n) = snapshot
                    .key
                    .strip_prefix("layer_")
                    .and_then(|n| n.parse::<u64>().ok())
                {
                    self.next_number = self.next_number.max(n);
                }
                group
            }
            Err(_) => self.allocate_group(),
        };
        let layer = Layer::create(
            group,
            &snapshot.name,
            snapshot.provenance_id,
            snapshot.opacity,
            snapshot.volume.clone(),
        )?;
        Ok(self.place(layer, snapshot.position))
    }

    /// Replace every layer with `snapshots`. The snapshots are restored
    /// into a scratch store first, so on error the current layers are
    /// left as they were.
    pub fn replace_all(&mut self, snapshots: &[LayerSnapshot]) -> Result<(), (String, LayerError)> {
        let mut scratch = LayerStore::new(StateRegistry::new());
        for snapshot in snapshots {
            if scratch.find_by_name(&snapshot.name).is_some() {
                let err = LayerError::NameInUse(snapshot.name.clone());
                return Err((snapshot.key.clone(), err));
            }
            scratch
                .restore(snapshot)
                .map_err(|e| (snapshot.key.clone(), e.into()))?;
        }

        let previous = self.snapshots();
        self.clear();
        for snapshot in snapshots {
            if let Err(e) = self.restore(snapshot) {
                self.clear();
                for old in &previous {
                    if let Err(e) = self.restore(old) {
                        log::error!(target: "layer", "could not put back {}: {}", old.key, e);
                    }
                }
                return Err((snapshot.key.clone(), e.into()));
            }
        }
        Ok(())
    }

    fn clear(&mut self) {
        for id in self.ids() {
            self.remove(id);
        }
    }

    pub fn remove(&mut self, id: LayerId) -> Option<Layer> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let layer = slot.layer.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.order.retain(|o| *o != id);
        log::debug!(target: "layer", "removed {} '{}'", layer.key(), layer.name());
        Some(layer)
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.layer.as_ref()
    }

    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.layer.as_mut()
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.get(id).is_some()
    }

    /// Layer ids in display order.
    pub fn ids(&self) -> Vec<LayerId> {
        self.order.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LayerId, &Layer)> + '_ {
        self.order
            .iter()
            .filter_map(move |id| self.get(*id).map(|layer| (*id, layer)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn position(&self, id: LayerId) -> Option<usize> {
        self.order.iter().position(|o| *o == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<LayerId> {
        self.iter()
            .find(|(_, layer)| layer.name() == name)
            .map(|(id, _)| id)
    }

    pub fn find_by_provenance(&self, provenance_id: ProvenanceId) -> Option<LayerId> {
        self.iter()
            .find(|(_, layer)| layer.provenance_id() == provenance_id)
            .map(|(id, _)| id)
    }

    pub fn find_by_key(&self, key: &str) -> Option<LayerId> {
        self.iter()
            .find(|(_, layer)| layer.key() == key)
            .map(|(id, _)| id)
    }

    pub fn snapshot(&self, id: LayerId) -> Option<LayerSnapshot> {
        let position = self.position(id)?;
        self.get(id).map(|layer| layer.snapshot(position))
    }

    pub fn snapshots(&self) -> Vec<LayerSnapshot> {
        self.iter()
            .enumerate()
            .map(|(position, (_, layer))| layer.snapshot(position))
            .collect()
    }

    /// Copy every layer into a fresh registry.
    pub fn fork(&self) -> Result<LayerStore, StateError> {
        let mut copy = LayerStore::new(StateRegistry::new());
        for snapshot in self.snapshots() {
            copy.restore(&snapshot)?;
        }
        copy.next_number = copy.next_number.max(self.next_number);
        Ok(copy)
    }

    pub(crate) fn next_layer_number(&self) -> u64 {
        self.next_number
    }

    pub(crate) fn set_next_layer_number(&mut self, n: u64) {
        self.next_number = self.next_number.max(n);
    }
}

impl std::fmt::Debug for LayerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter().map(|(_, layer)| layer)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_types::ActionSource;

    fn store() -> LayerStore {
        LayerStore::new(StateRegistry::new())
    }

    #[test]
    fn stale_ids_do_not_resolve() {
        let mut layers = store();
        let a = layers.insert("a", Volume::new([2, 2, 2], 0.0), ProvenanceId::new(1)).unwrap();
        layers.remove(a).unwrap();
        let b = layers.insert("b", Volume::new([2, 2, 2], 0.0), ProvenanceId::new(2)).unwrap();
        assert!(layers.get(a).is_none());
        assert_eq!(layers.get(b).unwrap().name(), "b");
    }

    #[test]
    fn layer_cells_live_under_their_key() {
        let mut layers = store();
        let id = layers.insert("CT", Volume::new([1, 1, 1], 0.0), ProvenanceId::new(5)).unwrap();
        let key = layers.get(id).unwrap().key().to_string();
        assert_eq!(key, "layer_1");
        let name = layers.registry().get("layer_1::name").unwrap();
        assert_eq!(name.export_to_string(), "CT");

        layers.remove(id);
        assert!(!layers.registry().contains("layer_1::name"));
    }

    #[test]
    fn duplicate_names_are_refused() {
        let mut layers = store();
        layers.insert("a", Volume::new([1, 1, 1], 0.0), ProvenanceId::new(1)).unwrap();
        let err = layers
            .insert("a", Volume::new([1, 1, 1], 0.0), ProvenanceId::new(2))
            .unwrap_err();
        assert_eq!(err, LayerError::NameInUse("a".into()));
        assert_eq!(layers.len(), 1);
        assert!(!layers.registry().contains("layer_2::name"));
    }

    #[test]
    fn oversized_volumes_are_not_allocated() {
        assert!(Volume::try_new([usize::MAX, 2, 1], 0.0).is_none());
        assert!(Volume::try_new([1 << 20, 1 << 20, 1], 0.0).is_none());
        assert_eq!(Volume::voxel_count([4, 4, 2]), Some(32));
        assert!(Volume::from_data([usize::MAX, usize::MAX, 2], Vec::new()).is_none());
    }

    #[test]
    fn decoding_rejects_mismatched_voxel_counts() {
        let good = rmp_serde::to_vec(&Volume::new([2, 1, 1], 3.0)).unwrap();
        let decoded: Volume = rmp_serde::from_slice(&good).unwrap();
        assert_eq!(decoded.data(), &[3.0, 3.0]);

        let corrupt = rmp_serde::to_vec(&([2usize, 2, 2], vec![0.0f32; 3])).unwrap();
        assert!(rmp_serde::from_slice::<Volume>(&corrupt).is_err());
    }

    #[test]
    fn keys_are_not_reused_after_removal() {
        let mut layers = store();
        let a = layers.insert("a", Volume::new([1, 1, 1], 0.0), ProvenanceId::new(1)).unwrap();
        layers.remove(a);
        let b = layers.insert("b", Volume::new([1, 1, 1], 0.0), ProvenanceId::new(2)).unwrap();
        assert_eq!(layers.get(b).unwrap().key(), "layer_2");
    }

    #[test]
    fn restore_reuses_key_and_position() {
        let mut layers = store();
        let a = layers.insert("a", Volume::new([1, 1, 1], 1.0), ProvenanceId::new(1)).unwrap();
        let _b = layers.insert("b", Volume::new([1, 1, 1], 2.0), ProvenanceId::new(2)).unwrap();
        layers
            .get(a)
            .unwrap()
            .opacity_state()
            .set(0.25, ActionSource::None)
            .unwrap();

        let snapshot = layers.snapshot(a).unwrap();
        layers.remove(a);
        let restored = layers.restore(&snapshot).unwrap();

        let layer = layers.get(restored).unwrap();
        assert_eq!(layer.key(), "layer_1");
        assert_eq!(layer.opacity_state().get(), 0.25);
        assert_eq!(layers.position(restored), Some(0));
    }

    #[test]
    fn names_starting_with_reference_sigils_are_rejected() {
        let mut layers = store();
        assert!(layers
            .insert("#3", Volume::new([1, 1, 1], 0.0), ProvenanceId::new(1))
            .is_err());
    }

    #[test]
    fn lookups_by_name_and_provenance() {
        let mut layers = store();
        let a = layers.insert("a", Volume::new([1, 1, 1], 0.0), ProvenanceId::new(7)).unwrap();
        assert_eq!(layers.find_by_name("a"), Some(a));
        assert_eq!(layers.find_by_provenance(ProvenanceId::new(7)), Some(a));
        assert_eq!(layers.find_by_name("missing"), None);
    }

    #[test]
    fn fork_copies_into_a_separate_registry() {
        let mut layers = store();
        layers.insert("a", Volume::new([1, 1, 2], 3.0), ProvenanceId::new(1)).unwrap();
        let copy = layers.fork().unwrap();
        assert_eq!(copy.len(), 1);
        assert_eq!(copy.snapshots(), layers.snapshots());
    }

    #[test]
    fn volume_slices_index_by_z() {
        let mut volume = Volume::new([2, 2, 3], 0.0);
        volume.slice_mut(1).unwrap().fill(4.0);
        assert_eq!(volume.get(1, 1, 1), Some(4.0));
        assert_eq!(volume.get(0, 0, 2), Some(0.0));
        assert!(volume.slice(3).is_none());
    }
}

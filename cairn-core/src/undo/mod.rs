//! Undo history built from inverse snapshots.
//!
//! Each undoable action leaves an [`UndoItem`] describing how to get back to
//! the state before it ran. Applying an item produces its own inverse from
//! the current state, which goes on the opposite stack, so undo and redo
//! are the same operation.

mod checkpoint;

pub use checkpoint::LayerCheckpoint;

use std::collections::VecDeque;

use cairn_types::{ActionSource, ProvenanceStepId};

use crate::action::Notifier;
use crate::layer::{LayerSnapshot, LayerStore};
use crate::provenance::ProvenanceLog;
use crate::signal::Signal;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UndoError {
    #[error("Undo list is empty")]
    NothingToUndo,
    #[error("Redo list is empty")]
    NothingToRedo,
    #[error("'{tag}' no longer applies: {reason}")]
    Incompatible { tag: String, reason: String },
    #[error("restore failed: {0}")]
    Restore(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoDirection {
    Undo,
    Redo,
}

impl std::fmt::Display for UndoDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UndoDirection::Undo => f.write_str("undo"),
            UndoDirection::Redo => f.write_str("redo"),
        }
    }
}

/// Everything needed to revert one action.
#[derive(Debug, Clone, Default)]
pub struct UndoItem {
    pub tag: String,
    pub(crate) volumes: Vec<(String, LayerCheckpoint)>,
    /// Keys of layers the action created; reverting removes them.
    pub(crate) created: Vec<String>,
    /// Layers the action removed, in removal order.
    pub(crate) deleted: Vec<LayerSnapshot>,
    /// Previous string form of each state the action changed.
    pub(crate) states: Vec<(String, String)>,
    pub(crate) retract: Vec<ProvenanceStepId>,
    pub(crate) reinstate: Vec<ProvenanceStepId>,
}

impl UndoItem {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
            && self.created.is_empty()
            && self.deleted.is_empty()
            && self.states.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        let volumes: usize = self.volumes.iter().map(|(_, c)| c.byte_size()).sum();
        let deleted: usize = self.deleted.iter().map(LayerSnapshot::byte_size).sum();
        let states: usize = self.states.iter().map(|(id, v)| id.len() + v.len()).sum();
        volumes + deleted + states
    }

    pub(crate) fn has_checkpoint(&self, key: &str) -> bool {
        self.volumes.iter().any(|(k, _)| k == key)
    }

    pub(crate) fn add_checkpoint(&mut self, key: String, checkpoint: LayerCheckpoint) {
        self.volumes.push((key, checkpoint));
    }

    /// Layer keys whose current contents this item would overwrite or remove.
    fn touched_keys(&self) -> impl Iterator<Item = &str> {
        self.volumes
            .iter()
            .map(|(key, _)| key.as_str())
            .chain(self.created.iter().map(String::as_str))
    }

    /// Verify the item still fits the workspace before changing anything.
    pub fn check(&self, layers: &LayerStore) -> Result<(), String> {
        let re_added = |key: &str| self.deleted.iter().any(|s| s.key == key);
        for (key, checkpoint) in &self.volumes {
            if re_added(key) {
                continue;
            }
            let layer = layers
                .find_by_key(key)
                .and_then(|id| layers.get(id))
                .ok_or_else(|| format!("layer {} no longer exists", key))?;
            if !checkpoint.is_compatible(layer) {
                return Err(format!("layer '{}' changed size", layer.name()));
            }
        }
        for key in &self.created {
            if layers.find_by_key(key).is_none() {
                return Err(format!("layer {} no longer exists", key));
            }
        }
        Ok(())
    }

    /// Revert the workspace part of this item and return its inverse.
    fn restore(self, layers: &mut LayerStore) -> Result<UndoItem, UndoError> {
        let mut inverse = UndoItem::new(self.tag.clone());

        for snapshot in self.deleted.iter().rev() {
            let id = layers
                .restore(snapshot)
                .map_err(|e| UndoError::Restore(e.to_string()))?;
            if let Some(layer) = layers.get(id) {
                inverse.created.push(layer.key().to_string());
            }
        }

        for (key, checkpoint) in self.volumes {
            let Some(layer) = layers.find_by_key(&key).and_then(|id| layers.get_mut(id)) else {
                log::warn!(target: "undo", "{}: layer {} vanished", self.tag, key);
                continue;
            };
            let current = LayerCheckpoint::capture(layer, &checkpoint.span())
                .map_err(UndoError::Restore)?;
            if checkpoint.apply(layer) {
                inverse.volumes.push((key, current));
            }
        }

        for (id, value) in self.states {
            let Some(state) = layers.registry().get(&id) else {
                log::warn!(target: "undo", "{}: state {} vanished", self.tag, id);
                continue;
            };
            let current = state.export_to_string();
            if state.import_from_string(&value, ActionSource::UndoBuffer) {
                inverse.states.push((id, current));
            } else {
                log::warn!(target: "undo", "{}: could not restore {}='{}'", self.tag, id, value);
            }
        }

        for key in self.created {
            let Some(id) = layers.find_by_key(&key) else {
                continue;
            };
            if let Some(snapshot) = layers.snapshot(id) {
                layers.remove(id);
                inverse.deleted.push(snapshot);
            }
        }

        inverse.retract = self.reinstate;
        inverse.reinstate = self.retract;
        Ok(inverse)
    }

    /// Apply this item to the live workspace and its provenance log.
    pub(crate) fn apply(
        self,
        layers: &mut LayerStore,
        log: &mut ProvenanceLog,
    ) -> Result<UndoItem, UndoError> {
        let retract = self.retract.clone();
        let reinstate = self.reinstate.clone();
        let inverse = self.restore(layers)?;
        for step in retract {
            log.retract(step);
        }
        for step in reinstate {
            log.reinstate(step);
        }
        Ok(inverse)
    }

    /// Throw away the partial effects of an action that failed.
    pub(crate) fn rollback(self, layers: &mut LayerStore) {
        let tag = self.tag.clone();
        if let Err(e) = self.restore(layers) {
            log::warn!(target: "undo", "rollback of {} failed: {}", tag, e);
        }
    }
}

/// Tags at the top of each stack, for menus and status lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoTags {
    pub undo: Option<String>,
    pub redo: Option<String>,
}

pub struct UndoBuffer {
    undo: VecDeque<UndoItem>,
    redo: VecDeque<UndoItem>,
    max_depth: usize,
    max_bytes: usize,
    changed: Signal<UndoTags>,
}

impl UndoBuffer {
    pub fn new(max_depth: usize, max_bytes: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            max_depth,
            max_bytes,
            changed: Signal::new(),
        }
    }

    pub fn changed(&self) -> &Signal<UndoTags> {
        &self.changed
    }

    pub fn tags(&self) -> UndoTags {
        UndoTags {
            undo: self.undo.back().map(|item| item.tag.clone()),
            redo: self.redo.back().map(|item| item.tag.clone()),
        }
    }

    fn notify(&self) {
        self.changed.emit(self.tags());
    }

    fn total_bytes(&self) -> usize {
        self.undo
            .iter()
            .chain(self.redo.iter())
            .map(UndoItem::byte_size)
            .sum()
    }

    /// Record a new undoable action. Clears the redo stack.
    pub fn push(&mut self, item: UndoItem) {
        self.redo.clear();
        let size = item.byte_size();
        if size > self.max_bytes {
            log::warn!(
                target: "undo",
                "{} needs {} bytes of undo data, over the {} byte budget; history cleared",
                item.tag,
                size,
                self.max_bytes
            );
            self.undo.clear();
            self.notify();
            return;
        }
        self.undo.push_back(item);
        while self.undo.len() > self.max_depth {
            self.undo.pop_front();
        }
        while self.total_bytes() > self.max_bytes && self.undo.pop_front().is_some() {}
        self.notify();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Notifier of a background job holding a layer the next step would
    /// touch.
    pub fn blocker(&self, direction: UndoDirection, layers: &LayerStore) -> Option<Notifier> {
        let item = match direction {
            UndoDirection::Undo => self.undo.back()?,
            UndoDirection::Redo => self.redo.back()?,
        };
        item.touched_keys()
            .filter_map(|key| layers.find_by_key(key))
            .filter_map(|id| layers.get(id))
            .find_map(|layer| layer.busy().cloned())
    }

    pub(crate) fn step(
        &mut self,
        direction: UndoDirection,
        layers: &mut LayerStore,
        log: &mut ProvenanceLog,
    ) -> Result<String, UndoError> {
        let (from, to) = match direction {
            UndoDirection::Undo => (&mut self.undo, &mut self.redo),
            UndoDirection::Redo => (&mut self.redo, &mut self.undo),
        };
        let item = from.pop_back().ok_or(match direction {
            UndoDirection::Undo => UndoError::NothingToUndo,
            UndoDirection::Redo => UndoError::NothingToRedo,
        })?;
        let tag = item.tag.clone();
        let result = match item.check(layers) {
            Ok(()) => item.apply(layers, log).map(|inverse| to.push_back(inverse)),
            Err(reason) => Err(UndoError::Incompatible {
                tag: tag.clone(),
                reason,
            }),
        };
        if let Err(e) = &result {
            log::warn!(target: "undo", "{} discarded: {}", direction, e);
        }
        self.notify();
        result.map(|()| tag)
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.notify();
    }
}

impl std::fmt::Debug for UndoBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoBuffer")
            .field("undo", &self.undo.len())
            .field("redo", &self.redo.len())
            .field("max_depth", &self.max_depth)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

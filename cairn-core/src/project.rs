use std::collections::BTreeMap;

use cairn_types::{ProvenanceId, SandboxId};

use crate::config::Config;
use crate::layer::LayerStore;
use crate::provenance::ProvenanceLog;
use crate::state::{StateError, StateRegistry};
use crate::undo::{UndoBuffer, UndoDirection, UndoError, UndoItem};

/// Root context object: the live workspace, its sandboxes, provenance log
/// and undo history. Owned by the dispatcher's owner thread.
pub struct Project {
    live: LayerStore,
    sandboxes: BTreeMap<SandboxId, LayerStore>,
    next_sandbox: u32,
    provenance: ProvenanceLog,
    undo: UndoBuffer,
    next_provenance_id: i64,
    record_provenance: bool,
}

impl Project {
    pub fn new(config: &Config) -> Self {
        Self::with_registry(StateRegistry::new(), config)
    }

    /// Project whose live layers register their cells in `registry`.
    pub fn with_registry(registry: StateRegistry, config: &Config) -> Self {
        Self {
            live: LayerStore::new(registry),
            sandboxes: BTreeMap::new(),
            next_sandbox: 1,
            provenance: ProvenanceLog::new(),
            undo: UndoBuffer::new(config.undo_depth(), config.undo_max_bytes()),
            next_provenance_id: 1,
            record_provenance: config.record_provenance(),
        }
    }

    pub fn registry(&self) -> &StateRegistry {
        self.live.registry()
    }

    pub fn layers(&self) -> &LayerStore {
        &self.live
    }

    pub fn layers_mut(&mut self) -> &mut LayerStore {
        &mut self.live
    }

    /// The live workspace for `None`, otherwise the sandbox if it exists.
    pub fn workspace(&self, sandbox: Option<SandboxId>) -> Option<&LayerStore> {
        match sandbox {
            None => Some(&self.live),
            Some(id) => self.sandboxes.get(&id),
        }
    }

    pub fn workspace_mut(&mut self, sandbox: Option<SandboxId>) -> Option<&mut LayerStore> {
        match sandbox {
            None => Some(&mut self.live),
            Some(id) => self.sandboxes.get_mut(&id),
        }
    }

    /// New sandbox, either empty or a copy of the live layers in its own
    /// registry.
    pub fn create_sandbox(&mut self, empty: bool) -> Result<SandboxId, StateError> {
        let layers = if empty {
            LayerStore::new(StateRegistry::new())
        } else {
            self.live.fork()?
        };
        let id = SandboxId::new(self.next_sandbox);
        self.next_sandbox += 1;
        self.sandboxes.insert(id, layers);
        log::debug!(target: "dispatch", "sandbox {} created", id);
        Ok(id)
    }

    pub fn delete_sandbox(&mut self, id: SandboxId) -> bool {
        let removed = self.sandboxes.remove(&id).is_some();
        if removed {
            log::debug!(target: "dispatch", "sandbox {} deleted", id);
        }
        removed
    }

    pub fn sandbox_ids(&self) -> Vec<SandboxId> {
        self.sandboxes.keys().copied().collect()
    }

    pub fn provenance(&self) -> &ProvenanceLog {
        &self.provenance
    }

    pub(crate) fn provenance_mut(&mut self) -> &mut ProvenanceLog {
        &mut self.provenance
    }

    pub(crate) fn replace_provenance(&mut self, log: ProvenanceLog) {
        self.provenance = log;
    }

    pub fn records_provenance(&self) -> bool {
        self.record_provenance
    }

    pub fn undo_buffer(&self) -> &UndoBuffer {
        &self.undo
    }

    /// Allocate a fresh provenance id.
    pub fn next_provenance_id(&mut self) -> ProvenanceId {
        let id = ProvenanceId::new(self.next_provenance_id);
        self.next_provenance_id += 1;
        id
    }

    /// Keep fresh ids above any id assigned elsewhere (replay, loading).
    pub fn observe_provenance_id(&mut self, id: ProvenanceId) {
        self.next_provenance_id = self.next_provenance_id.max(id.get() + 1);
    }

    pub(crate) fn peek_next_provenance_id(&self) -> i64 {
        self.next_provenance_id
    }

    pub fn undo(&mut self) -> Result<String, UndoError> {
        self.undo
            .step(UndoDirection::Undo, &mut self.live, &mut self.provenance)
    }

    pub fn redo(&mut self) -> Result<String, UndoError> {
        self.undo
            .step(UndoDirection::Redo, &mut self.live, &mut self.provenance)
    }

    pub(crate) fn push_undo(&mut self, item: UndoItem) {
        self.undo.push(item);
    }

    pub(crate) fn clear_undo(&mut self) {
        self.undo.clear();
    }
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("live", &self.live)
            .field("sandboxes", &self.sandboxes.keys().collect::<Vec<_>>())
            .field("provenance", &self.provenance)
            .field("undo", &self.undo)
            .finish()
    }
}

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cairn_types::{ActionSource, ProvenanceId, SandboxId, Variant};
use crossbeam_channel::Sender;

use super::{ActionContext, Execution, Notifier};
use crate::dispatch::Job;
use crate::layer::{LayerId, LayerSnapshot, LayerStore};
use crate::project::Project;
use crate::provenance::Translation;
use crate::state::StateRegistry;
use crate::undo::{LayerCheckpoint, UndoItem};

/// How much of a layer to capture before it is modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointSpan {
    Full,
    /// Z-slice range, for actions that only touch part of a volume.
    Slices(Range<usize>),
}

/// Result of a background worker, run on the owner thread to commit it.
pub type Commit = Box<dyn FnOnce(&mut ActionScope<'_>) -> Result<Option<Variant>, String> + Send>;

/// Given to a background worker. Workers never touch the project; they
/// report progress and return a [`Commit`].
pub struct WorkerHandle {
    seq: u64,
    jobs: Sender<Job>,
    interrupt: Arc<AtomicBool>,
}

impl WorkerHandle {
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }

    pub fn report_progress(&self, fraction: f64) {
        let job = Job::Progress {
            seq: self.seq,
            fraction: fraction.clamp(0.0, 1.0),
        };
        if let Err(e) = self.jobs.send(job) {
            log::warn!(target: "dispatch", "progress dropped: {}", e);
        }
    }
}

pub(crate) struct WorkerState {
    pub(crate) busy: Vec<LayerId>,
    pub(crate) notifier: Notifier,
    pub(crate) interrupt: Arc<AtomicBool>,
}

/// Per-action bookkeeping that outlives a single scope, so a deferred
/// action can be resumed when its worker finishes.
pub(crate) struct ScopeState {
    pub(crate) seq: u64,
    pub(crate) sandbox: Option<SandboxId>,
    pub(crate) refs: Vec<(&'static str, Vec<LayerId>)>,
    pub(crate) inputs: Vec<ProvenanceId>,
    pub(crate) presets: Option<Vec<ProvenanceId>>,
    pub(crate) outputs: Vec<Option<ProvenanceId>>,
    pub(crate) deleted: Vec<ProvenanceId>,
    pub(crate) draft: UndoItem,
    pub(crate) worker: Option<WorkerState>,
}

impl ScopeState {
    pub(crate) fn new(
        seq: u64,
        sandbox: Option<SandboxId>,
        translation: Translation,
        presets: Option<&[ProvenanceId]>,
    ) -> Self {
        Self {
            seq,
            sandbox,
            refs: translation.refs,
            inputs: translation.inputs,
            presets: presets.map(<[ProvenanceId]>::to_vec),
            outputs: Vec::new(),
            deleted: Vec::new(),
            draft: UndoItem::default(),
            worker: None,
        }
    }

    pub(crate) fn output_ids(&self) -> Vec<ProvenanceId> {
        self.outputs.iter().flatten().copied().collect()
    }
}

fn missing_sandbox(sandbox: Option<SandboxId>) -> String {
    match sandbox {
        Some(id) => format!("sandbox {} does not exist", id),
        None => "no live workspace".to_string(),
    }
}

/// What an action sees while it validates and executes on the owner
/// thread: the target workspace, its resolved layer references, and the
/// undo and provenance bookkeeping for this run.
pub struct ActionScope<'a> {
    project: &'a mut Project,
    context: &'a ActionContext,
    jobs: &'a Sender<Job>,
    state: &'a mut ScopeState,
}

impl<'a> ActionScope<'a> {
    pub(crate) fn new(
        project: &'a mut Project,
        context: &'a ActionContext,
        jobs: &'a Sender<Job>,
        state: &'a mut ScopeState,
    ) -> Self {
        Self {
            project,
            context,
            jobs,
            state,
        }
    }

    pub fn context(&self) -> &ActionContext {
        self.context
    }

    pub fn source(&self) -> ActionSource {
        self.context.source()
    }

    pub fn sandbox(&self) -> Option<SandboxId> {
        self.state.sandbox
    }

    pub fn project(&self) -> &Project {
        self.project
    }

    pub fn project_mut(&mut self) -> &mut Project {
        self.project
    }

    /// Layers of the workspace this action targets.
    pub fn layers(&self) -> Result<&LayerStore, String> {
        self.project
            .workspace(self.state.sandbox)
            .ok_or_else(|| missing_sandbox(self.state.sandbox))
    }

    pub fn layers_mut(&mut self) -> Result<&mut LayerStore, String> {
        let sandbox = self.state.sandbox;
        self.project
            .workspace_mut(sandbox)
            .ok_or_else(|| missing_sandbox(sandbox))
    }

    pub fn registry(&self) -> Result<&StateRegistry, String> {
        Ok(self.layers()?.registry())
    }

    /// First layer resolved for a `Layer` parameter, if it was not empty.
    pub fn layer(&self, param: &str) -> Option<LayerId> {
        self.layer_list(param).first().copied()
    }

    pub fn layer_list(&self, param: &str) -> &[LayerId] {
        self.state
            .refs
            .iter()
            .find(|(name, _)| *name == param)
            .map(|(_, ids)| ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn input_provenance_ids(&self) -> &[ProvenanceId] {
        &self.state.inputs
    }

    /// Provenance id for output `index`. Preset ids are reused verbatim;
    /// replays without presets fail instead of inventing new ids.
    pub fn output_provenance_id(&mut self, index: usize) -> Result<ProvenanceId, String> {
        if let Some(Some(id)) = self.state.outputs.get(index) {
            return Ok(*id);
        }
        let id = match &self.state.presets {
            Some(presets) => *presets
                .get(index)
                .ok_or_else(|| format!("no preset provenance id for output {}", index))?,
            None if self.source().is_replay() => {
                return Err(format!(
                    "replayed action has no provenance id for output {}",
                    index
                ))
            }
            None => self.project.next_provenance_id(),
        };
        self.project.observe_provenance_id(id);
        if self.state.outputs.len() <= index {
            self.state.outputs.resize(index + 1, None);
        }
        self.state.outputs[index] = Some(id);
        Ok(id)
    }

    /// Capture a layer before modifying it. Only the first checkpoint per
    /// layer is kept, so the draft always holds the pre-action state.
    pub fn checkpoint_volume(&mut self, id: LayerId, span: CheckpointSpan) -> Result<(), String> {
        let sandbox = self.state.sandbox;
        let layers = self
            .project
            .workspace(sandbox)
            .ok_or_else(|| missing_sandbox(sandbox))?;
        let layer = layers
            .get(id)
            .ok_or_else(|| format!("layer {} no longer exists", id))?;
        if self.state.draft.has_checkpoint(layer.key()) {
            return Ok(());
        }
        let checkpoint = LayerCheckpoint::capture(layer, &span)?;
        self.state.draft.add_checkpoint(layer.key().to_string(), checkpoint);
        Ok(())
    }

    pub fn track_created(&mut self, id: LayerId) -> Result<(), String> {
        let key = self
            .layers()?
            .get(id)
            .map(|layer| layer.key().to_string())
            .ok_or_else(|| format!("layer {} no longer exists", id))?;
        self.state.draft.created.push(key);
        Ok(())
    }

    pub fn track_deleted(&mut self, snapshot: LayerSnapshot) {
        self.state.deleted.push(snapshot.provenance_id);
        self.state.draft.deleted.push(snapshot);
    }

    /// Remember a state cell's previous value so undo can restore it.
    pub fn track_state(&mut self, state_id: &str, previous: String) {
        if !self.state.draft.states.iter().any(|(id, _)| id == state_id) {
            self.state.draft.states.push((state_id.to_string(), previous));
        }
    }

    /// Run `job` on a background thread. The listed layers are busy until
    /// the returned commit has run; actions touching them come back
    /// `Unavailable` in the meantime.
    pub fn spawn_worker<F>(&mut self, busy: Vec<LayerId>, job: F) -> Result<Execution, String>
    where
        F: FnOnce(&WorkerHandle) -> Result<Commit, String> + Send + 'static,
    {
        if self.state.worker.is_some() {
            return Err("action already started a worker".into());
        }
        let seq = self.state.seq;
        let interrupt = Arc::new(AtomicBool::new(false));
        let handle = WorkerHandle {
            seq,
            jobs: self.jobs.clone(),
            interrupt: Arc::clone(&interrupt),
        };
        let jobs = self.jobs.clone();
        std::thread::Builder::new()
            .name(format!("cairn-worker-{}", seq))
            .spawn(move || {
                let outcome =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| job(&handle)))
                        .unwrap_or_else(|_| Err("worker panicked".to_string()));
                if jobs.send(Job::Complete { seq, outcome }).is_err() {
                    log::warn!(target: "dispatch", "worker {} finished after shutdown", seq);
                }
            })
            .map_err(|e| format!("could not start worker: {}", e))?;

        let notifier = Notifier::new(format!("worker {}", seq));
        let sandbox = self.state.sandbox;
        if let Some(layers) = self.project.workspace_mut(sandbox) {
            for id in &busy {
                if let Some(layer) = layers.get_mut(*id) {
                    layer.set_busy(notifier.clone());
                }
            }
        }
        self.state.worker = Some(WorkerState {
            busy,
            notifier,
            interrupt,
        });
        Ok(Execution::Deferred)
    }
}

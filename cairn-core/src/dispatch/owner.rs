use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use cairn_types::{ActionStatus, ProvenanceId, Variant};
use crossbeam_channel::{Receiver, Sender};

use super::{DispatchEvent, DispatchShared, Job};
use crate::action::{
    ActionContextHandle, ActionHandle, ActionScope, Commit, Execution, Rejection, ScopeState,
};
use crate::project::Project;
use crate::provenance::{export_provenance_string, translate};

/// Text of a panic caught while running one phase of an action.
fn panic_message(payload: Box<dyn Any + Send>, phase: &str) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    log::error!(target: "dispatch", "action panicked during {}: {}", phase, detail);
    format!("panicked during {}: {}", phase, detail)
}

/// An action whose worker is still running.
struct Deferred {
    action: ActionHandle,
    context: ActionContextHandle,
    state: ScopeState,
}

pub(super) struct Owner {
    project: Project,
    jobs_tx: Sender<Job>,
    jobs: Receiver<Job>,
    shared: Arc<DispatchShared>,
    deferred: HashMap<u64, Deferred>,
    next_seq: u64,
}

impl Owner {
    pub(super) fn new(
        project: Project,
        jobs_tx: Sender<Job>,
        jobs: Receiver<Job>,
        shared: Arc<DispatchShared>,
    ) -> Self {
        Self {
            project,
            jobs_tx,
            jobs,
            shared,
            deferred: HashMap::new(),
            next_seq: 0,
        }
    }

    pub(super) fn run(mut self) {
        while let Ok(job) = self.jobs.recv() {
            if self.handle_job(job) {
                break;
            }
        }
        self.drain();
    }

    /// Returns true on shutdown.
    fn handle_job(&mut self, job: Job) -> bool {
        match job {
            Job::Run { action, context } => self.run_batch(vec![action], context),
            Job::RunMany { actions, context } => self.run_batch(actions, context),
            Job::Progress { seq, fraction } => {
                if self.deferred.contains_key(&seq) {
                    self.shared
                        .emit(DispatchEvent::ProgressReport { seq, fraction });
                }
            }
            Job::Complete { seq, outcome } => self.complete(seq, outcome),
            Job::Query(f) => f(&self.project),
            Job::Interrupt => {
                for deferred in self.deferred.values() {
                    if let Some(worker) = &deferred.state.worker {
                        worker.interrupt.store(true, Ordering::Release);
                    }
                }
            }
            Job::Shutdown => return true,
        }
        false
    }

    /// Finish outstanding workers, then refuse whatever was queued behind
    /// the shutdown request.
    fn drain(&mut self) {
        if !self.deferred.is_empty() {
            log::debug!(target: "dispatch", "waiting for {} workers", self.deferred.len());
        }
        while !self.deferred.is_empty() {
            match self.jobs.recv() {
                Ok(Job::Complete { seq, outcome }) => self.complete(seq, outcome),
                Ok(Job::Query(f)) => f(&self.project),
                Ok(job) => self.refuse(job),
                Err(_) => break,
            }
        }
        while let Ok(job) = self.jobs.try_recv() {
            self.refuse(job);
        }
    }

    fn refuse(&self, job: Job) {
        let (context, count) = match job {
            Job::Run { context, .. } => (context, 1),
            Job::RunMany { actions, context } => (context, actions.len()),
            _ => return,
        };
        context.report_error("dispatcher is shutting down");
        context.report_status(ActionStatus::Error);
        for _ in 0..count {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            context.report_done();
        }
    }

    fn run_batch(&mut self, actions: Vec<ActionHandle>, context: ActionContextHandle) {
        let mut remaining = actions.into_iter();
        while let Some(action) = remaining.next() {
            if !self.run_action(action, &context) {
                let skipped = remaining.len();
                if skipped > 0 {
                    context.report_warning(format!("{} queued actions skipped", skipped));
                    for _ in 0..skipped {
                        self.shared.finish_one(&context);
                    }
                }
                break;
            }
        }
    }

    /// Translate, validate and execute one action. Returns false if it
    /// ended without success.
    fn run_action(&mut self, mut action: ActionHandle, context: &ActionContextHandle) -> bool {
        self.next_seq += 1;
        let seq = self.next_seq;
        let tag = action.tag();
        let sandbox = action.sandbox();
        self.shared.emit(DispatchEvent::PreAction {
            seq,
            tag,
            source: context.source(),
            sandbox,
        });

        let params = action.action().params();
        let translation = match self.project.workspace(sandbox) {
            Some(layers) => translate(&params, layers),
            None => Err(Rejection::invalid(match sandbox {
                Some(id) => format!("sandbox {} does not exist", id),
                None => "no live workspace".to_string(),
            })),
        };
        let translation = match translation {
            Ok(translation) => translation,
            Err(rejection) => return self.reject(seq, &action, context, rejection),
        };
        let mut state = ScopeState::new(seq, sandbox, translation, action.preset_output_ids());
        state.draft.tag = tag.to_string();

        let validation = {
            let scope = ActionScope::new(&mut self.project, context, &self.jobs_tx, &mut state);
            catch_unwind(AssertUnwindSafe(|| action.action_mut().validate(&scope)))
        };
        match validation {
            Ok(Ok(())) => {}
            Ok(Err(rejection)) => return self.reject(seq, &action, context, rejection),
            Err(payload) => {
                let message = panic_message(payload, "validate");
                return self.finish(seq, action, context, state, Err(message), false);
            }
        }

        let execution = {
            let mut scope = ActionScope::new(&mut self.project, context, &self.jobs_tx, &mut state);
            catch_unwind(AssertUnwindSafe(|| action.action_mut().execute(&mut scope)))
        };
        let execution = execution.unwrap_or_else(|payload| Err(panic_message(payload, "execute")));
        match execution {
            Ok(Execution::Done(result)) => self.finish(seq, action, context, state, Ok(result), false),
            Ok(Execution::Deferred) if state.worker.is_some() => {
                self.shared.emit(DispatchEvent::ProgressBegin { seq, tag });
                self.shared.emit(DispatchEvent::PostAction {
                    seq,
                    tag,
                    command: action.to_command_string(),
                    source: context.source(),
                    status: ActionStatus::Success,
                    message: String::new(),
                    deferred: true,
                });
                self.deferred.insert(
                    seq,
                    Deferred {
                        action,
                        context: Arc::clone(context),
                        state,
                    },
                );
                true
            }
            Ok(Execution::Deferred) => {
                let message = "action deferred without starting a worker".to_string();
                self.finish(seq, action, context, state, Err(message), false)
            }
            Err(message) => self.finish(seq, action, context, state, Err(message), false),
        }
    }

    fn reject(
        &self,
        seq: u64,
        action: &ActionHandle,
        context: &ActionContextHandle,
        rejection: Rejection,
    ) -> bool {
        let status = rejection.status();
        log::debug!(target: "dispatch", "{} {}: {}", action.tag(), status, rejection.reason());
        context.report_error(rejection.reason());
        context.report_status(status);
        if let Rejection::Unavailable { notifier, .. } = &rejection {
            context.report_need_resource(notifier.clone());
        }
        self.shared.emit(DispatchEvent::PostAction {
            seq,
            tag: action.tag(),
            command: action.to_command_string(),
            source: context.source(),
            status,
            message: rejection.reason().to_string(),
            deferred: false,
        });
        self.shared.finish_one(context);
        false
    }

    /// Run the commit of a finished worker.
    fn complete(&mut self, seq: u64, outcome: Result<Commit, String>) {
        let Some(mut deferred) = self.deferred.remove(&seq) else {
            log::warn!(target: "dispatch", "result for unknown job {}", seq);
            return;
        };
        let result = match outcome {
            Ok(commit) => {
                let mut scope = ActionScope::new(
                    &mut self.project,
                    &deferred.context,
                    &self.jobs_tx,
                    &mut deferred.state,
                );
                commit(&mut scope)
            }
            Err(message) => Err(message),
        };
        self.shared.emit(DispatchEvent::ProgressEnd { seq });
        let context = Arc::clone(&deferred.context);
        self.finish(seq, deferred.action, &context, deferred.state, result, true);
    }

    /// Settle an executed action: record provenance and undo on success,
    /// roll back on error, then report.
    fn finish(
        &mut self,
        seq: u64,
        action: ActionHandle,
        context: &ActionContextHandle,
        mut state: ScopeState,
        outcome: Result<Option<Variant>, String>,
        deferred: bool,
    ) -> bool {
        if let Some(worker) = state.worker.take() {
            if outcome.is_err() {
                worker.interrupt.store(true, Ordering::Release);
            }
            if let Some(layers) = self.project.workspace_mut(state.sandbox) {
                for id in &worker.busy {
                    if let Some(layer) = layers.get_mut(*id) {
                        layer.clear_busy();
                    }
                }
            }
            worker.notifier.notify();
        }

        let tag = action.tag();
        let draft = std::mem::take(&mut state.draft);
        let (status, message) = match outcome {
            Ok(result) => {
                let outputs: Vec<ProvenanceId> = state.output_ids();
                self.commit_history(&action, context, &state, draft, &outputs);
                context.set_output_provenance_ids(outputs);
                if let Some(result) = result {
                    context.report_result(result);
                }
                context.report_status(ActionStatus::Success);
                (ActionStatus::Success, String::new())
            }
            Err(message) => {
                if let Some(layers) = self.project.workspace_mut(state.sandbox) {
                    draft.rollback(layers);
                }
                context.report_error(format!("{}: {}", tag, message));
                context.report_status(ActionStatus::Error);
                (ActionStatus::Error, message)
            }
        };

        if deferred {
            self.shared.emit(DispatchEvent::DeferredDone {
                seq,
                tag,
                status,
                message,
            });
        } else {
            self.shared.emit(DispatchEvent::PostAction {
                seq,
                tag,
                command: action.to_command_string(),
                source: context.source(),
                status,
                message,
                deferred: false,
            });
        }
        self.shared.finish_one(context);
        status == ActionStatus::Success
    }

    /// Append the provenance record and push the undo item of a successful
    /// live, non-replayed action.
    fn commit_history(
        &mut self,
        action: &ActionHandle,
        context: &ActionContextHandle,
        state: &ScopeState,
        mut draft: crate::undo::UndoItem,
        outputs: &[ProvenanceId],
    ) {
        if context.source().is_replay() || state.sandbox.is_some() {
            return;
        }
        if action.action().changes_provenance() && self.project.records_provenance() {
            let command = export_provenance_string(action.tag(), &action.action().params());
            let step = self.project.provenance_mut().append(
                command,
                state.inputs.clone(),
                outputs.to_vec(),
                state.deleted.clone(),
            );
            draft.retract.push(step);
        }
        if !draft.is_empty() {
            self.project.push_undo(draft);
        }
    }
}

//! The action queue.
//!
//! A [`Dispatcher`] owns the [`Project`] on a dedicated owner thread. Any
//! thread may post actions; the owner runs them one at a time in arrival
//! order. Background workers started by actions report back through the
//! same queue, so every mutation of the project happens on the owner thread.

mod owner;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use cairn_types::{ActionSource, ActionStatus, SandboxId};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::action::{ActionContextHandle, ActionHandle, Commit};
use crate::config::Config;
use crate::project::Project;
use crate::signal::Signal;

pub(crate) type QueryFn = Box<dyn FnOnce(&Project) + Send>;

/// Messages processed by the owner thread.
pub(crate) enum Job {
    Run {
        action: ActionHandle,
        context: ActionContextHandle,
    },
    RunMany {
        actions: Vec<ActionHandle>,
        context: ActionContextHandle,
    },
    Progress {
        seq: u64,
        fraction: f64,
    },
    Complete {
        seq: u64,
        outcome: Result<Commit, String>,
    },
    Query(QueryFn),
    Interrupt,
    Shutdown,
}

/// Emitted on the owner thread, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    PreAction {
        seq: u64,
        tag: &'static str,
        source: ActionSource,
        sandbox: Option<SandboxId>,
    },
    /// Sent for every action once `execute` has returned or the action was
    /// turned down. `deferred` actions report their final status with
    /// [`DispatchEvent::DeferredDone`].
    PostAction {
        seq: u64,
        tag: &'static str,
        command: String,
        source: ActionSource,
        status: ActionStatus,
        message: String,
        deferred: bool,
    },
    ProgressBegin {
        seq: u64,
        tag: &'static str,
    },
    ProgressReport {
        seq: u64,
        fraction: f64,
    },
    ProgressEnd {
        seq: u64,
    },
    DeferredDone {
        seq: u64,
        tag: &'static str,
        status: ActionStatus,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("cannot wait for an action on the dispatcher thread")]
    OwnerThread,
    #[error("dispatcher is shut down")]
    Closed,
    #[error("could not start dispatcher thread: {0}")]
    Spawn(String),
    #[error("dispatcher thread panicked")]
    Panicked,
}

pub(crate) struct DispatchShared {
    pending: AtomicUsize,
    closing: AtomicBool,
    completed: AtomicU64,
    last_completed: Mutex<Option<Instant>>,
    events: Signal<DispatchEvent>,
}

impl DispatchShared {
    fn new() -> Self {
        Self {
            pending: AtomicUsize::new(0),
            closing: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            last_completed: Mutex::new(None),
            events: Signal::new(),
        }
    }

    pub(crate) fn emit(&self, event: DispatchEvent) {
        self.events.emit(event);
    }

    pub(crate) fn finish_one(&self, context: &ActionContextHandle) {
        self.completed.fetch_add(1, Ordering::AcqRel);
        *self.last_completed.lock() = Some(Instant::now());
        self.pending.fetch_sub(1, Ordering::AcqRel);
        context.report_done();
    }
}

/// Handle to the owner thread. Cheap to share by reference across
/// producer threads.
pub struct Dispatcher {
    jobs: Sender<Job>,
    shared: Arc<DispatchShared>,
    owner: ThreadId,
    join: Mutex<Option<JoinHandle<()>>>,
    event_capacity: usize,
}

impl Dispatcher {
    /// Move `project` onto a new owner thread and start processing.
    pub fn start(project: Project, config: &Config) -> Result<Self, DispatchError> {
        let (tx, rx): (Sender<Job>, Receiver<Job>) = crossbeam_channel::unbounded();
        let shared = Arc::new(DispatchShared::new());
        let owner = owner::Owner::new(project, tx.clone(), rx, Arc::clone(&shared));
        let join = thread::Builder::new()
            .name("cairn-dispatch".into())
            .spawn(move || owner.run())
            .map_err(|e| DispatchError::Spawn(e.to_string()))?;
        let owner = join.thread().id();
        log::debug!(target: "dispatch", "dispatcher started");
        Ok(Self {
            jobs: tx,
            shared,
            owner,
            join: Mutex::new(Some(join)),
            event_capacity: config.event_capacity(),
        })
    }

    fn fail(context: &ActionContextHandle, count: usize, error: &DispatchError) {
        context.report_error(error.to_string());
        context.report_status(ActionStatus::Error);
        for _ in 0..count {
            context.report_done();
        }
    }

    fn submit(&self, job: Job, count: usize, context: &ActionContextHandle) -> Result<(), DispatchError> {
        context.begin(count);
        if self.shared.closing.load(Ordering::Acquire) {
            Self::fail(context, count, &DispatchError::Closed);
            return Err(DispatchError::Closed);
        }
        self.shared.pending.fetch_add(count, Ordering::AcqRel);
        if self.jobs.send(job).is_err() {
            self.shared.pending.fetch_sub(count, Ordering::AcqRel);
            Self::fail(context, count, &DispatchError::Closed);
            return Err(DispatchError::Closed);
        }
        Ok(())
    }

    /// Queue `action` and return immediately. Safe from any thread,
    /// including the owner thread.
    pub fn post(&self, action: ActionHandle, context: &ActionContextHandle) -> Result<(), DispatchError> {
        let job = Job::Run {
            action,
            context: Arc::clone(context),
        };
        self.submit(job, 1, context)
    }

    /// Queue `action` and block until it reaches a terminal status.
    pub fn post_and_wait(
        &self,
        action: ActionHandle,
        context: &ActionContextHandle,
    ) -> Result<(), DispatchError> {
        if self.is_owner_thread() {
            return Err(DispatchError::OwnerThread);
        }
        self.post(action, context)?;
        context.wait_done();
        Ok(())
    }

    /// Queue a batch that runs back to back. The first action that does not
    /// succeed ends the batch; the rest are skipped.
    pub fn post_many(
        &self,
        actions: Vec<ActionHandle>,
        context: &ActionContextHandle,
    ) -> Result<(), DispatchError> {
        if actions.is_empty() {
            return Ok(());
        }
        let count = actions.len();
        let job = Job::RunMany {
            actions,
            context: Arc::clone(context),
        };
        self.submit(job, count, context)
    }

    pub fn post_and_wait_many(
        &self,
        actions: Vec<ActionHandle>,
        context: &ActionContextHandle,
    ) -> Result<(), DispatchError> {
        if self.is_owner_thread() {
            return Err(DispatchError::OwnerThread);
        }
        self.post_many(actions, context)?;
        context.wait_done();
        Ok(())
    }

    /// Run `f` against the project on the owner thread, after everything
    /// already queued, and return its result.
    pub fn query<R, F>(&self, f: F) -> Result<R, DispatchError>
    where
        R: Send + 'static,
        F: FnOnce(&Project) -> R + Send + 'static,
    {
        if self.is_owner_thread() {
            return Err(DispatchError::OwnerThread);
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        let job = Job::Query(Box::new(move |project| {
            let _ = tx.send(f(project));
        }));
        self.jobs.send(job).map_err(|_| DispatchError::Closed)?;
        rx.recv().map_err(|_| DispatchError::Closed)
    }

    /// Ask every running background worker to stop at its next check.
    pub fn interrupt_workers(&self) {
        if self.jobs.send(Job::Interrupt).is_err() {
            log::warn!(target: "dispatch", "interrupt dropped: dispatcher is shut down");
        }
    }

    pub fn events(&self) -> &Signal<DispatchEvent> {
        &self.shared.events
    }

    /// Bounded channel of dispatch events, sized by `dispatch.event_capacity`.
    pub fn subscribe(&self) -> Receiver<DispatchEvent> {
        self.shared.events.subscribe(self.event_capacity)
    }

    /// True while any posted action has not reached a terminal status.
    pub fn is_busy(&self) -> bool {
        self.shared.pending.load(Ordering::Acquire) > 0
    }

    pub fn completed_count(&self) -> u64 {
        self.shared.completed.load(Ordering::Acquire)
    }

    pub fn last_action_completed(&self) -> Option<Instant> {
        *self.shared.last_completed.lock()
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Run everything already queued, wait for background workers, then
    /// stop the owner thread. Later posts fail with [`DispatchError::Closed`].
    pub fn shutdown(&self) -> Result<(), DispatchError> {
        if self.is_owner_thread() {
            return Err(DispatchError::OwnerThread);
        }
        let Some(join) = self.join.lock().take() else {
            return Ok(());
        };
        self.shared.closing.store(true, Ordering::Release);
        if self.jobs.send(Job::Shutdown).is_err() {
            log::warn!(target: "dispatch", "owner thread already gone");
        }
        join.join().map_err(|_| DispatchError::Panicked)?;
        log::debug!(target: "dispatch", "dispatcher stopped");
        Ok(())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!(target: "dispatch", "shutdown: {}", e);
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.shared.pending.load(Ordering::Relaxed))
            .field("completed", &self.completed_count())
            .finish()
    }
}

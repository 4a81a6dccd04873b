use std::sync::Arc;
use std::time::{Duration, Instant};

use cairn_types::{ActionSource, ActionStatus, ProvenanceId, Variant};
use parking_lot::{Condvar, Mutex};

use super::Notifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Message,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextMessage {
    pub severity: Severity,
    pub text: String,
}

struct ContextState {
    status: ActionStatus,
    error: String,
    messages: Vec<ContextMessage>,
    result: Option<Variant>,
    notifier: Option<Notifier>,
    output_ids: Vec<ProvenanceId>,
    outstanding: usize,
}

/// Feedback channel for actions posted by one caller.
///
/// The caller keeps a handle, the dispatcher reports into it from the
/// owner thread, and [`wait_done`](Self::wait_done) blocks until every
/// action posted with it has reached a terminal status.
pub struct ActionContext {
    source: ActionSource,
    state: Mutex<ContextState>,
    done: Condvar,
}

pub type ActionContextHandle = Arc<ActionContext>;

impl ActionContext {
    pub fn new(source: ActionSource) -> ActionContextHandle {
        Arc::new(Self {
            source,
            state: Mutex::new(ContextState {
                status: ActionStatus::Pending,
                error: String::new(),
                messages: Vec::new(),
                result: None,
                notifier: None,
                output_ids: Vec::new(),
                outstanding: 0,
            }),
            done: Condvar::new(),
        })
    }

    pub fn source(&self) -> ActionSource {
        self.source
    }

    pub fn report_error(&self, message: impl Into<String>) {
        let text = message.into();
        log::warn!(target: "action", "[{}] {}", self.source, text);
        let mut state = self.state.lock();
        state.error = text.clone();
        state.messages.push(ContextMessage {
            severity: Severity::Error,
            text,
        });
    }

    pub fn report_warning(&self, message: impl Into<String>) {
        let text = message.into();
        log::warn!(target: "action", "[{}] {}", self.source, text);
        self.state.lock().messages.push(ContextMessage {
            severity: Severity::Warning,
            text,
        });
    }

    pub fn report_message(&self, message: impl Into<String>) {
        let text = message.into();
        log::info!(target: "action", "[{}] {}", self.source, text);
        self.state.lock().messages.push(ContextMessage {
            severity: Severity::Message,
            text,
        });
    }

    pub fn report_status(&self, status: ActionStatus) {
        self.state.lock().status = status;
    }

    pub fn report_result(&self, result: Variant) {
        self.state.lock().result = Some(result);
    }

    pub fn report_need_resource(&self, notifier: Notifier) {
        self.state.lock().notifier = Some(notifier);
    }

    /// Mark one posted action as finished.
    pub fn report_done(&self) {
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.outstanding == 0 {
            self.done.notify_all();
        }
    }

    pub(crate) fn begin(&self, count: usize) {
        self.state.lock().outstanding += count;
    }

    pub(crate) fn set_output_provenance_ids(&self, ids: Vec<ProvenanceId>) {
        self.state.lock().output_ids = ids;
    }

    pub fn status(&self) -> ActionStatus {
        self.state.lock().status
    }

    pub fn is_success(&self) -> bool {
        self.status() == ActionStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status() == ActionStatus::Error
    }

    pub fn is_invalid(&self) -> bool {
        self.status() == ActionStatus::Invalid
    }

    pub fn is_unavailable(&self) -> bool {
        self.status() == ActionStatus::Unavailable
    }

    pub fn result(&self) -> Option<Variant> {
        self.state.lock().result.clone()
    }

    pub fn error_message(&self) -> String {
        self.state.lock().error.clone()
    }

    pub fn messages(&self) -> Vec<ContextMessage> {
        self.state.lock().messages.clone()
    }

    pub fn resource_notifier(&self) -> Option<Notifier> {
        self.state.lock().notifier.clone()
    }

    /// Provenance ids given to the outputs of the last successful action.
    pub fn output_provenance_ids(&self) -> Vec<ProvenanceId> {
        self.state.lock().output_ids.clone()
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().outstanding == 0
    }

    /// Clear the outcome so the context can be reused for another post.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.status = ActionStatus::Pending;
        state.error.clear();
        state.messages.clear();
        state.result = None;
        state.notifier = None;
        state.output_ids.clear();
    }

    pub fn wait_done(&self) {
        let mut state = self.state.lock();
        while state.outstanding > 0 {
            self.done.wait(&mut state);
        }
    }

    /// Returns false if the timeout elapsed with actions still outstanding.
    pub fn wait_done_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.outstanding > 0 {
            if self.done.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.outstanding == 0
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ActionContext")
            .field("source", &self.source)
            .field("status", &state.status)
            .field("error", &state.error)
            .field("outstanding", &state.outstanding)
            .finish()
    }
}

//! The action object model.
//!
//! An [`Action`] describes one requested mutation. The dispatcher resolves
//! its layer references, calls [`Action::validate`] (no side effects), and
//! then [`Action::execute`], which either finishes immediately or hands
//! long-running work to a background worker whose result is committed
//! later on the owner thread.

pub mod builtin;
mod context;
mod factory;
mod info;
mod notifier;
pub mod parser;
mod scope;

pub use context::{ActionContext, ActionContextHandle, ContextMessage, Severity};
pub use factory::{ActionArgs, ActionFactory, CommandError, Constructor};
pub use info::{ActionInfo, ParamKind, ParamSpec};
pub use notifier::Notifier;
pub use scope::{ActionScope, CheckpointSpan, Commit, WorkerHandle};

pub(crate) use scope::ScopeState;

use cairn_types::{ActionStatus, ProvenanceId, SandboxId, Variant};

/// Value of one named action parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionParam {
    Value(Variant),
    /// Layer name or `#provenance_id`; empty means "no layer".
    Layer(String),
    LayerList(Vec<String>),
}

/// Why an action was turned down during validation.
#[derive(Debug, Clone)]
pub enum Rejection {
    Invalid(String),
    /// A resource is busy; retry after `notifier` fires.
    Unavailable { reason: String, notifier: Notifier },
}

impl Rejection {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Rejection::Invalid(reason.into())
    }

    pub fn status(&self) -> ActionStatus {
        match self {
            Rejection::Invalid(_) => ActionStatus::Invalid,
            Rejection::Unavailable { .. } => ActionStatus::Unavailable,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Rejection::Invalid(reason) => reason,
            Rejection::Unavailable { reason, .. } => reason,
        }
    }
}

impl From<String> for Rejection {
    fn from(reason: String) -> Self {
        Rejection::Invalid(reason)
    }
}

/// Outcome of a successful [`Action::execute`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    Done(Option<Variant>),
    /// A worker was started with [`ActionScope::spawn_worker`]; the action
    /// finishes when its commit runs.
    Deferred,
}

pub trait Action: Send + std::fmt::Debug {
    fn info(&self) -> &'static ActionInfo;

    /// Parameters in declaration order. Layer references are resolved
    /// against the workspace before `validate` runs.
    fn params(&self) -> Vec<(&'static str, ActionParam)>;

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), Rejection>;

    fn execute(&mut self, scope: &mut ActionScope<'_>) -> Result<Execution, String>;

    /// Whether a successful run is appended to the provenance log.
    fn changes_provenance(&self) -> bool {
        true
    }
}

/// An action ready to post, with its routing and replay settings.
pub struct ActionHandle {
    action: Box<dyn Action>,
    sandbox: Option<SandboxId>,
    output_ids: Option<Vec<ProvenanceId>>,
}

impl ActionHandle {
    pub fn new(action: impl Action + 'static) -> Self {
        Self::from_box(Box::new(action))
    }

    pub fn from_box(action: Box<dyn Action>) -> Self {
        Self {
            action,
            sandbox: None,
            output_ids: None,
        }
    }

    pub fn in_sandbox(mut self, sandbox: SandboxId) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Reuse these provenance ids for the action's outputs instead of
    /// generating new ones.
    pub fn with_output_provenance_ids(mut self, ids: Vec<ProvenanceId>) -> Self {
        self.output_ids = Some(ids);
        self
    }

    pub fn tag(&self) -> &'static str {
        self.action.info().tag
    }

    pub fn sandbox(&self) -> Option<SandboxId> {
        self.sandbox
    }

    pub fn preset_output_ids(&self) -> Option<&[ProvenanceId]> {
        self.output_ids.as_deref()
    }

    pub fn action(&self) -> &dyn Action {
        self.action.as_ref()
    }

    pub(crate) fn action_mut(&mut self) -> &mut dyn Action {
        self.action.as_mut()
    }

    /// Script form with layer references as written.
    pub fn to_command_string(&self) -> String {
        let mut params = self.action.params();
        if let Some(sandbox) = self.sandbox {
            params.push((
                "sandbox",
                ActionParam::Value(Variant::Int(i64::from(sandbox.get()))),
            ));
        }
        format_params(self.tag(), &params, parser::quote_if_needed)
    }
}

impl std::fmt::Debug for ActionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionHandle")
            .field("action", &self.action)
            .field("sandbox", &self.sandbox)
            .field("output_ids", &self.output_ids)
            .finish()
    }
}

/// Render `tag(key=value, ...)`, formatting each layer reference with
/// `layer_ref`.
pub(crate) fn format_params(
    tag: &str,
    params: &[(&'static str, ActionParam)],
    mut layer_ref: impl FnMut(&str) -> String,
) -> String {
    let args: Vec<String> = params
        .iter()
        .map(|(name, param)| {
            let value = match param {
                ActionParam::Value(v) => parser::format_variant(v),
                ActionParam::Layer(reference) => layer_ref(reference),
                ActionParam::LayerList(references) => {
                    let items: Vec<String> = references.iter().map(|r| layer_ref(r)).collect();
                    format!("[{}]", items.join(","))
                }
            };
            format!("{}={}", name, value)
        })
        .collect();
    format!("{}({})", tag, args.join(", "))
}

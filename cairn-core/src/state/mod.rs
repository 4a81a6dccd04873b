//! Typed observable state cells and the registry that names them.
//!
//! - [`StateCell`] holds one value, validates every write and notifies
//!   observers after the registry lock is released.
//! - [`StateRegistry`] maps unique ids (and `$` aliases) to cells and owns
//!   the re-entrant lock that serialises all mutation.
//! - [`StateGroup`] scopes cells under a `prefix::` and unregisters them
//!   when dropped.

mod cell;
mod group;
mod registry;

pub use cell::{StateCell, StateCellBuilder, StateChange};
pub use group::StateGroup;
pub use registry::{RegistryGuard, StateRegistry};

use std::any::Any;
use std::sync::Arc;

use cairn_types::{ActionSource, LoadPriority, Variant};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("state '{0}' already exists")]
    DuplicateId(String),
    #[error("no state named '{0}'")]
    NotFound(String),
    #[error("state '{0}' was not reserved")]
    NotReserved(String),
    #[error("state '{0}' is locked")]
    Locked(String),
    #[error("cannot convert '{value}' for state '{id}'")]
    Conversion { id: String, value: String },
    #[error("state '{id}': {reason}")]
    Rejected { id: String, reason: String },
    #[error("alias '{0}' already exists")]
    DuplicateAlias(String),
}

/// Type-erased view of a state cell, used by the registry, the `set`
/// action and session persistence.
pub trait StateBase: Send + Sync {
    fn id(&self) -> &str;

    fn export_to_string(&self) -> String;
    /// Returns false when the string does not convert or fails validation;
    /// the value is left untouched in that case.
    fn import_from_string(&self, text: &str, source: ActionSource) -> bool;

    fn export_to_variant(&self) -> Variant;
    fn import_from_variant(&self, value: &Variant, source: ActionSource)
        -> Result<bool, StateError>;
    fn validate_variant(&self, value: &Variant) -> Result<(), String>;

    fn is_locked(&self) -> bool;
    fn set_locked(&self, locked: bool);
    fn is_project_data(&self) -> bool;
    fn session_priority(&self) -> LoadPriority;

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

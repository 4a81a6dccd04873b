//! # cairn-types
//!
//! Shared type definitions for the cairn engine: durable identifiers, action
//! sources and statuses, and the [`Variant`] value used to bind action
//! parameters and state cells.

mod source;
mod variant;

pub use source::{ActionSource, ActionStatus};
pub use variant::{StateValue, Variant};

/// Durable identifier for the action output that produced an entity.
///
/// Provenance ids survive renames and are reproduced verbatim when a
/// recorded history is replayed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ProvenanceId(i64);

impl ProvenanceId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }
    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ProvenanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one recorded step in the provenance log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ProvenanceStepId(i64);

impl ProvenanceStepId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }
    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ProvenanceStepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tag of a private copy of the layer graph. Actions without a sandbox
/// operate on the live session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct SandboxId(u32);

impl SandboxId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SandboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session load priority of a state cell. Higher priorities load first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct LoadPriority(i32);

impl LoadPriority {
    /// Skipped entirely when a session is loaded.
    pub const DO_NOT_LOAD: LoadPriority = LoadPriority(-1);
    /// Loaded after every other cell.
    pub const LOAD_LAST: LoadPriority = LoadPriority(0);
    pub const DEFAULT_LOAD: LoadPriority = LoadPriority(100);

    pub fn new(priority: i32) -> Self {
        Self(priority)
    }
    pub fn get(self) -> i32 {
        self.0
    }
}

impl Default for LoadPriority {
    fn default() -> Self {
        Self::DEFAULT_LOAD
    }
}

use serde::{Deserialize, Serialize};

/// Where an action came from.
///
/// `Provenance` and `UndoBuffer` mark replays of history that already
/// exists, so they are never recorded again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ActionSource {
    #[default]
    None,
    InterfaceWidget,
    InterfaceMouse,
    InterfaceKeyboard,
    InterfaceMenu,
    Script,
    CommandLine,
    Provenance,
    UndoBuffer,
}

impl ActionSource {
    pub fn is_replay(self) -> bool {
        matches!(self, ActionSource::Provenance | ActionSource::UndoBuffer)
    }

    pub fn is_interface(self) -> bool {
        matches!(
            self,
            ActionSource::InterfaceWidget
                | ActionSource::InterfaceMouse
                | ActionSource::InterfaceKeyboard
                | ActionSource::InterfaceMenu
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ActionSource::None => "none",
            ActionSource::InterfaceWidget => "interface_widget",
            ActionSource::InterfaceMouse => "interface_mouse",
            ActionSource::InterfaceKeyboard => "interface_keyboard",
            ActionSource::InterfaceMenu => "interface_menu",
            ActionSource::Script => "script",
            ActionSource::CommandLine => "commandline",
            ActionSource::Provenance => "provenance",
            ActionSource::UndoBuffer => "undobuffer",
        }
    }
}

impl std::fmt::Display for ActionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one action. Every status but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ActionStatus {
    /// Posted, no outcome reported yet.
    #[default]
    Pending,
    Success,
    /// Execution failed after validation passed.
    Error,
    /// Rejected during validation; nothing was mutated.
    Invalid,
    /// Well formed, but a required resource is busy.
    Unavailable,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        self != ActionStatus::Pending
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Success => "success",
            ActionStatus::Error => "error",
            ActionStatus::Invalid => "invalid",
            ActionStatus::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

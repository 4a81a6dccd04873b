use cairn_types::Variant;

use crate::action::{
    Action, ActionArgs, ActionInfo, ActionParam, ActionScope, CommandError, Execution, Rejection,
};
use crate::undo::{UndoDirection, UndoError};

pub(super) static UNDO_INFO: ActionInfo = ActionInfo {
    tag: "undo",
    alias: "u",
    description: "Revert the most recent undoable action.",
    params: &[],
};

pub(super) static REDO_INFO: ActionInfo = ActionInfo {
    tag: "redo",
    alias: "r",
    description: "Re-apply the most recently undone action.",
    params: &[],
};

fn validate_history(scope: &ActionScope<'_>, direction: UndoDirection) -> Result<(), Rejection> {
    if scope.sandbox().is_some() {
        return Err(Rejection::invalid("undo history only covers the live workspace"));
    }
    let buffer = scope.project().undo_buffer();
    let available = match direction {
        UndoDirection::Undo => buffer.can_undo(),
        UndoDirection::Redo => buffer.can_redo(),
    };
    if !available {
        let error = match direction {
            UndoDirection::Undo => UndoError::NothingToUndo,
            UndoDirection::Redo => UndoError::NothingToRedo,
        };
        return Err(Rejection::invalid(error.to_string()));
    }
    if let Some(notifier) = buffer.blocker(direction, scope.layers()?) {
        return Err(Rejection::Unavailable {
            reason: format!("{} is waiting for {}", direction, notifier.name()),
            notifier,
        });
    }
    Ok(())
}

fn run_history(scope: &mut ActionScope<'_>, direction: UndoDirection) -> Result<Execution, String> {
    let project = scope.project_mut();
    let tag = match direction {
        UndoDirection::Undo => project.undo(),
        UndoDirection::Redo => project.redo(),
    }
    .map_err(|e| e.to_string())?;
    Ok(Execution::Done(Some(Variant::Str(tag))))
}

#[derive(Debug, Clone, Default)]
pub struct Undo;

impl Undo {
    pub(super) fn create(_args: &ActionArgs) -> Result<Box<dyn Action>, CommandError> {
        Ok(Box::new(Self))
    }
}

impl Action for Undo {
    fn info(&self) -> &'static ActionInfo {
        &UNDO_INFO
    }

    fn params(&self) -> Vec<(&'static str, ActionParam)> {
        Vec::new()
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), Rejection> {
        validate_history(scope, UndoDirection::Undo)
    }

    fn execute(&mut self, scope: &mut ActionScope<'_>) -> Result<Execution, String> {
        run_history(scope, UndoDirection::Undo)
    }

    fn changes_provenance(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Default)]
pub struct Redo;

impl Redo {
    pub(super) fn create(_args: &ActionArgs) -> Result<Box<dyn Action>, CommandError> {
        Ok(Box::new(Self))
    }
}

impl Action for Redo {
    fn info(&self) -> &'static ActionInfo {
        &REDO_INFO
    }

    fn params(&self) -> Vec<(&'static str, ActionParam)> {
        Vec::new()
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), Rejection> {
        validate_history(scope, UndoDirection::Redo)
    }

    fn execute(&mut self, scope: &mut ActionScope<'_>) -> Result<Execution, String> {
        run_history(scope, UndoDirection::Redo)
    }

    fn changes_provenance(&self) -> bool {
        false
    }
}

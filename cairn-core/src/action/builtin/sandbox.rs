use cairn_types::{SandboxId, Variant};

use crate::action::{
    Action, ActionArgs, ActionInfo, ActionParam, ActionScope, CommandError, Execution, ParamKind,
    ParamSpec, Rejection,
};

pub(super) static CREATE_SANDBOX_INFO: ActionInfo = ActionInfo {
    tag: "create_sandbox",
    alias: "sandbox",
    description: "Create an isolated workspace; reports its number.",
    params: &[ParamSpec::optional(
        "empty",
        ParamKind::Bool,
        "false",
        "start without copying the live layers",
    )],
};

pub(super) static DELETE_SANDBOX_INFO: ActionInfo = ActionInfo {
    tag: "delete_sandbox",
    alias: "drop_sandbox",
    description: "Discard a sandbox and everything in it.",
    params: &[ParamSpec::required("id", ParamKind::Int, "sandbox number")],
};

#[derive(Debug, Clone, Default)]
pub struct CreateSandbox {
    empty: bool,
}

impl CreateSandbox {
    pub fn new(empty: bool) -> Self {
        Self { empty }
    }

    pub(super) fn create(args: &ActionArgs) -> Result<Box<dyn Action>, CommandError> {
        Ok(Box::new(Self {
            empty: args.boolean("empty")?,
        }))
    }
}

impl Action for CreateSandbox {
    fn info(&self) -> &'static ActionInfo {
        &CREATE_SANDBOX_INFO
    }

    fn params(&self) -> Vec<(&'static str, ActionParam)> {
        vec![("empty", ActionParam::Value(Variant::Bool(self.empty)))]
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), Rejection> {
        if scope.sandbox().is_some() {
            return Err(Rejection::invalid("sandboxes cannot be nested"));
        }
        Ok(())
    }

    fn execute(&mut self, scope: &mut ActionScope<'_>) -> Result<Execution, String> {
        let id = scope
            .project_mut()
            .create_sandbox(self.empty)
            .map_err(|e| e.to_string())?;
        Ok(Execution::Done(Some(Variant::Int(i64::from(id.get())))))
    }

    fn changes_provenance(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct DeleteSandbox {
    id: i64,
}

impl DeleteSandbox {
    pub fn new(id: SandboxId) -> Self {
        Self {
            id: i64::from(id.get()),
        }
    }

    pub(super) fn create(args: &ActionArgs) -> Result<Box<dyn Action>, CommandError> {
        Ok(Box::new(Self {
            id: args.int("id")?,
        }))
    }

    fn sandbox_id(&self) -> Option<SandboxId> {
        u32::try_from(self.id).ok().map(SandboxId::new)
    }
}

impl Action for DeleteSandbox {
    fn info(&self) -> &'static ActionInfo {
        &DELETE_SANDBOX_INFO
    }

    fn params(&self) -> Vec<(&'static str, ActionParam)> {
        vec![("id", ActionParam::Value(Variant::Int(self.id)))]
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), Rejection> {
        let layers = self
            .sandbox_id()
            .and_then(|id| scope.project().workspace(Some(id)))
            .ok_or_else(|| Rejection::invalid(format!("sandbox {} does not exist", self.id)))?;
        let busy = layers.iter().find_map(|(_, layer)| layer.busy().cloned());
        match busy {
            Some(notifier) => Err(Rejection::Unavailable {
                reason: format!("sandbox {} has running jobs", self.id),
                notifier,
            }),
            None => Ok(()),
        }
    }

    fn execute(&mut self, scope: &mut ActionScope<'_>) -> Result<Execution, String> {
        let id = self
            .sandbox_id()
            .ok_or_else(|| format!("sandbox {} does not exist", self.id))?;
        if scope.project_mut().delete_sandbox(id) {
            Ok(Execution::Done(None))
        } else {
            Err(format!("sandbox {} does not exist", id))
        }
    }

    fn changes_provenance(&self) -> bool {
        false
    }
}

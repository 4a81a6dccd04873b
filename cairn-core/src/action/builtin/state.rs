use cairn_types::Variant;

use crate::action::{
    Action, ActionArgs, ActionInfo, ActionParam, ActionScope, CommandError, Execution, ParamKind,
    ParamSpec, Rejection,
};

pub(super) static SET_INFO: ActionInfo = ActionInfo {
    tag: "set",
    alias: "set_state",
    description: "Set a state value by id or $alias.",
    params: &[
        ParamSpec::required("id", ParamKind::Text, "state id"),
        ParamSpec::required("value", ParamKind::Value, "new value"),
    ],
};

pub(super) static GET_INFO: ActionInfo = ActionInfo {
    tag: "get",
    alias: "get_state",
    description: "Report the current value of a state.",
    params: &[ParamSpec::required("id", ParamKind::Text, "state id")],
};

#[derive(Debug, Clone)]
pub struct SetState {
    id: String,
    value: Variant,
}

impl SetState {
    pub fn new(id: impl Into<String>, value: impl Into<Variant>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
        }
    }

    pub(super) fn create(args: &ActionArgs) -> Result<Box<dyn Action>, CommandError> {
        Ok(Box::new(Self {
            id: args.text("id")?,
            value: args.value("value")?,
        }))
    }
}

impl Action for SetState {
    fn info(&self) -> &'static ActionInfo {
        &SET_INFO
    }

    fn params(&self) -> Vec<(&'static str, ActionParam)> {
        vec![
            ("id", ActionParam::Value(Variant::Str(self.id.clone()))),
            ("value", ActionParam::Value(self.value.clone())),
        ]
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), Rejection> {
        let state = scope
            .registry()?
            .get(&self.id)
            .ok_or_else(|| Rejection::invalid(format!("unknown state '{}'", self.id)))?;
        if state.is_locked() {
            return Err(Rejection::invalid(format!("state '{}' is locked", state.id())));
        }
        state.validate_variant(&self.value).map_err(Rejection::Invalid)
    }

    fn execute(&mut self, scope: &mut ActionScope<'_>) -> Result<Execution, String> {
        let state = scope
            .registry()?
            .get(&self.id)
            .ok_or_else(|| format!("unknown state '{}'", self.id))?;
        let previous = state.export_to_string();
        let changed = state
            .import_from_variant(&self.value, scope.source())
            .map_err(|e| e.to_string())?;
        if changed {
            scope.track_state(state.id(), previous);
        }
        Ok(Execution::Done(None))
    }

    fn changes_provenance(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct GetState {
    id: String,
}

impl GetState {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub(super) fn create(args: &ActionArgs) -> Result<Box<dyn Action>, CommandError> {
        Ok(Box::new(Self {
            id: args.text("id")?,
        }))
    }
}

impl Action for GetState {
    fn info(&self) -> &'static ActionInfo {
        &GET_INFO
    }

    fn params(&self) -> Vec<(&'static str, ActionParam)> {
        vec![("id", ActionParam::Value(Variant::Str(self.id.clone())))]
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), Rejection> {
        if scope.registry()?.get(&self.id).is_some() {
            Ok(())
        } else {
            Err(Rejection::invalid(format!("unknown state '{}'", self.id)))
        }
    }

    fn execute(&mut self, scope: &mut ActionScope<'_>) -> Result<Execution, String> {
        let state = scope
            .registry()?
            .get(&self.id)
            .ok_or_else(|| format!("unknown state '{}'", self.id))?;
        Ok(Execution::Done(Some(state.export_to_variant())))
    }

    fn changes_provenance(&self) -> bool {
        false
    }
}

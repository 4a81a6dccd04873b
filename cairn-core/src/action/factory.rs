use std::collections::HashMap;

use cairn_types::{SandboxId, Variant};

use super::parser::{self, ParseError, RawValue};
use super::{Action, ActionHandle, ActionInfo};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("syntax error: {0}")]
    Syntax(#[from] ParseError),
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("{action}: unknown argument '{name}'")]
    UnknownArgument { action: &'static str, name: String },
    #[error("{action}: missing required argument '{name}'")]
    MissingArgument { action: &'static str, name: String },
    #[error("{action}: bad value for '{name}': {reason}")]
    BadArgument {
        action: &'static str,
        name: String,
        reason: String,
    },
    #[error("action name '{0}' is already registered")]
    Duplicate(String),
}

/// Parsed arguments for one action, with defaults filled in.
pub struct ActionArgs {
    action: &'static str,
    values: HashMap<String, RawValue>,
}

impl ActionArgs {
    fn raw(&self, name: &str) -> Result<&RawValue, CommandError> {
        self.values
            .get(name)
            .ok_or_else(|| CommandError::MissingArgument {
                action: self.action,
                name: name.to_string(),
            })
    }

    fn bad(&self, name: &str, reason: impl Into<String>) -> CommandError {
        CommandError::BadArgument {
            action: self.action,
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn value(&self, name: &str) -> Result<Variant, CommandError> {
        Ok(self.raw(name)?.to_variant())
    }

    pub fn text(&self, name: &str) -> Result<String, CommandError> {
        self.raw(name)?
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| self.bad(name, "expected text, found a list"))
    }

    pub fn int(&self, name: &str) -> Result<i64, CommandError> {
        match self.value(name)? {
            Variant::Int(i) => Ok(i),
            other => Err(self.bad(name, format!("expected an integer, found '{}'", other))),
        }
    }

    pub fn double(&self, name: &str) -> Result<f64, CommandError> {
        match self.value(name)? {
            Variant::Double(d) => Ok(d),
            Variant::Int(i) => Ok(i as f64),
            other => Err(self.bad(name, format!("expected a number, found '{}'", other))),
        }
    }

    pub fn boolean(&self, name: &str) -> Result<bool, CommandError> {
        match self.value(name)? {
            Variant::Bool(b) => Ok(b),
            Variant::Int(0) => Ok(false),
            Variant::Int(1) => Ok(true),
            other => Err(self.bad(name, format!("expected true or false, found '{}'", other))),
        }
    }

    pub fn int_list(&self, name: &str) -> Result<Vec<i64>, CommandError> {
        match self.value(name)? {
            Variant::List(items) => items
                .into_iter()
                .map(|item| match item {
                    Variant::Int(i) => Ok(i),
                    other => Err(self.bad(name, format!("expected integers, found '{}'", other))),
                })
                .collect(),
            other => Err(self.bad(name, format!("expected a list, found '{}'", other))),
        }
    }

    pub fn layer(&self, name: &str) -> Result<String, CommandError> {
        self.text(name)
    }

    /// A bracketed list, or a single reference treated as a one-item list.
    pub fn layers(&self, name: &str) -> Result<Vec<String>, CommandError> {
        match self.raw(name)? {
            RawValue::List(items) => items
                .iter()
                .map(|item| {
                    item.as_text()
                        .map(str::to_string)
                        .ok_or_else(|| self.bad(name, "nested lists are not layer references"))
                })
                .collect(),
            RawValue::Bare(s) | RawValue::Quoted(s) => Ok(vec![s.clone()]),
        }
    }
}

pub type Constructor = fn(&ActionArgs) -> Result<Box<dyn Action>, CommandError>;

/// Registration table mapping tags and aliases to constructors.
pub struct ActionFactory {
    entries: Vec<(&'static ActionInfo, Constructor)>,
    index: HashMap<String, usize>,
}

impl ActionFactory {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Factory with every built-in action kind registered.
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        for (info, constructor) in super::builtin::all() {
            if let Err(e) = factory.register(info, constructor) {
                log::error!(target: "action", "{}", e);
            }
        }
        factory
    }

    pub fn register(
        &mut self,
        info: &'static ActionInfo,
        constructor: Constructor,
    ) -> Result<(), CommandError> {
        let tag = info.tag.to_ascii_lowercase();
        let alias = info.alias.to_ascii_lowercase();
        for name in [&tag, &alias] {
            if self.index.contains_key(name) {
                return Err(CommandError::Duplicate(name.clone()));
            }
        }
        let slot = self.entries.len();
        self.entries.push((info, constructor));
        self.index.insert(tag, slot);
        self.index.insert(alias, slot);
        Ok(())
    }

    pub fn info(&self, name: &str) -> Option<&'static ActionInfo> {
        let slot = *self.index.get(&name.to_ascii_lowercase())?;
        Some(self.entries[slot].0)
    }

    pub fn tags(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(info, _)| info.tag).collect()
    }

    pub fn usage(&self, name: &str) -> Option<String> {
        self.info(name).map(ActionInfo::usage)
    }

    /// Parse a command string into a ready-to-post action. A `sandbox=N`
    /// argument routes the action into that sandbox.
    pub fn create(&self, command: &str) -> Result<ActionHandle, CommandError> {
        let parsed = parser::parse_command(command)?;
        let slot = *self
            .index
            .get(&parsed.name.to_ascii_lowercase())
            .ok_or_else(|| CommandError::UnknownAction(parsed.name.clone()))?;
        let (info, constructor) = self.entries[slot];

        let mut values = HashMap::new();
        let mut sandbox = None;
        for (name, value) in parsed.args {
            if name == "sandbox" && info.param("sandbox").is_none() {
                sandbox = Some(parse_sandbox(info.tag, &value)?);
                continue;
            }
            if info.param(&name).is_none() {
                return Err(CommandError::UnknownArgument {
                    action: info.tag,
                    name,
                });
            }
            values.insert(name, value);
        }

        for spec in info.params {
            if values.contains_key(spec.name) {
                continue;
            }
            match spec.default {
                Some(default) => {
                    let value = parser::parse_value(default)?;
                    values.insert(spec.name.to_string(), value);
                }
                None => {
                    return Err(CommandError::MissingArgument {
                        action: info.tag,
                        name: spec.name.to_string(),
                    })
                }
            }
        }

        let args = ActionArgs {
            action: info.tag,
            values,
        };
        let mut handle = ActionHandle::from_box(constructor(&args)?);
        if let Some(sandbox) = sandbox {
            handle = handle.in_sandbox(sandbox);
        }
        Ok(handle)
    }
}

fn parse_sandbox(action: &'static str, value: &RawValue) -> Result<SandboxId, CommandError> {
    value
        .as_text()
        .and_then(|s| s.parse::<u32>().ok())
        .map(SandboxId::new)
        .ok_or_else(|| CommandError::BadArgument {
            action,
            name: "sandbox".into(),
            reason: "expected a sandbox number".into(),
        })
}

impl Default for ActionFactory {
    fn default() -> Self {
        Self::with_builtins()
    }
}

use cairn_types::{ActionSource, ActionStatus, ProvenanceId, SandboxId};

use crate::action::{ActionContext, ActionFactory, CommandError};
use crate::dispatch::{DispatchError, Dispatcher};

/// One line of a provenance script.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayStep {
    pub command: String,
    /// Provenance ids the step's outputs must receive.
    pub outputs: Vec<ProvenanceId>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("line {line}: {reason}")]
    Script { line: usize, reason: String },
    #[error("step {step} ({command}): {error}")]
    Command {
        step: usize,
        command: String,
        #[source]
        error: CommandError,
    },
    #[error("step {step} ({command}) ended {status}: {message}")]
    Failed {
        step: usize,
        command: String,
        status: ActionStatus,
        message: String,
    },
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Parse `command -> 3,4` lines. Blank lines and lines starting with `#`
/// are skipped.
pub fn parse_script(text: &str) -> Result<Vec<ReplayStep>, ReplayError> {
    let mut steps = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (command, outputs) = match line.rsplit_once(" -> ") {
            Some((command, outputs)) => (command.trim(), outputs.trim()),
            None => (line, ""),
        };
        let outputs = outputs
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<i64>()
                    .map(ProvenanceId::new)
                    .map_err(|_| ReplayError::Script {
                        line: index + 1,
                        reason: format!("bad provenance id '{}'", s),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        steps.push(ReplayStep {
            command: command.to_string(),
            outputs,
        });
    }
    Ok(steps)
}

/// Re-runs recorded steps with their original output ids.
pub struct Replayer {
    factory: ActionFactory,
}

impl Replayer {
    pub fn new(factory: ActionFactory) -> Self {
        Self { factory }
    }

    /// Run `steps` in order, stopping at the first one that does not
    /// succeed. Returns the output ids produced.
    pub fn replay(
        &self,
        dispatcher: &Dispatcher,
        steps: &[ReplayStep],
        sandbox: Option<SandboxId>,
    ) -> Result<Vec<ProvenanceId>, ReplayError> {
        let mut produced = Vec::new();
        for (index, step) in steps.iter().enumerate() {
            let mut handle =
                self.factory
                    .create(&step.command)
                    .map_err(|error| ReplayError::Command {
                        step: index + 1,
                        command: step.command.clone(),
                        error,
                    })?;
            if let Some(sandbox) = sandbox {
                handle = handle.in_sandbox(sandbox);
            }
            let handle = handle.with_output_provenance_ids(step.outputs.clone());

            let context = ActionContext::new(ActionSource::Provenance);
            dispatcher.post_and_wait(handle, &context)?;
            if !context.is_success() {
                return Err(ReplayError::Failed {
                    step: index + 1,
                    command: step.command.clone(),
                    status: context.status(),
                    message: context.error_message(),
                });
            }
            produced.extend(context.output_provenance_ids());
        }
        log::info!(target: "provenance", "replayed {} steps", steps.len());
        Ok(produced)
    }
}

impl Default for Replayer {
    fn default() -> Self {
        Self::new(ActionFactory::with_builtins())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_comments_and_reads_outputs() {
        let steps = parse_script(
            "# trail\n\nnew_layer(name=a) -> 7\nrename_layer(layer=#7, name=b)\ncopy_layers(layers=[#7]) -> 8, 9\n",
        )
        .unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].outputs, vec![ProvenanceId::new(7)]);
        assert!(steps[1].outputs.is_empty());
        assert_eq!(steps[2].outputs, vec![ProvenanceId::new(8), ProvenanceId::new(9)]);
    }

    #[test]
    fn bad_output_id_reports_the_line() {
        let err = parse_script("new_layer(name=a) -> x").unwrap_err();
        assert!(matches!(err, ReplayError::Script { line: 1, .. }));
    }
}

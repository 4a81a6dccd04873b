//! Provenance: which action produced each piece of data.
//!
//! Every successful data-changing action in the live workspace appends a
//! [`ProvenanceRecord`] whose command string refers to its inputs by
//! `${n}` placeholders. Resolving the placeholders against the record's
//! input ids gives a script that reproduces the data, in any workspace,
//! with the same provenance ids.

mod replay;
mod translate;

pub use replay::{parse_script, ReplayError, ReplayStep, Replayer};
pub use translate::resolve_reference;

pub(crate) use translate::{export_provenance_string, translate, Translation};

use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use cairn_types::{ProvenanceId, ProvenanceStepId};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::signal::Signal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub step: ProvenanceStepId,
    /// Command string with `${n}` placeholders for input layers.
    pub action: String,
    pub inputs: Vec<ProvenanceId>,
    pub outputs: Vec<ProvenanceId>,
    pub deleted: Vec<ProvenanceId>,
    pub timestamp_ms: u64,
}

fn placeholder_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| match Regex::new(r"\$\{(\d+)\}") {
            Ok(re) => Some(re),
            Err(e) => {
                log::error!(target: "provenance", "placeholder pattern: {}", e);
                None
            }
        })
        .as_ref()
}

/// Byte ranges of the quoted literals in a command string.
fn quoted_spans(command: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut open: Option<(char, usize)> = None;
    let mut escaped = false;
    for (i, c) in command.char_indices() {
        match open {
            Some((quote, start)) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote {
                    spans.push((start, i));
                    open = None;
                }
            }
            None if c == '\'' || c == '"' => open = Some((c, i)),
            None => {}
        }
    }
    if let Some((_, start)) = open {
        spans.push((start, command.len()));
    }
    spans
}

impl ProvenanceRecord {
    /// The command with each `${n}` replaced by `#<input n>`. Quoted
    /// literals are left as written.
    pub fn resolved_action(&self) -> String {
        let Some(pattern) = placeholder_pattern() else {
            return self.action.clone();
        };
        let quoted = quoted_spans(&self.action);
        pattern
            .replace_all(&self.action, |caps: &regex::Captures<'_>| {
                let start = caps.get(0).map_or(0, |m| m.start());
                if quoted.iter().any(|(from, to)| *from < start && start < *to) {
                    return caps[0].to_string();
                }
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| self.inputs.get(n))
                    .map(|pid| format!("#{}", pid))
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// `command -> out1,out2`, the line format read back by [`parse_script`].
    pub fn to_script_line(&self) -> String {
        let outputs: Vec<String> = self.outputs.iter().map(ToString::to_string).collect();
        if outputs.is_empty() {
            self.resolved_action()
        } else {
            format!("{} -> {}", self.resolved_action(), outputs.join(","))
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Append-only provenance log. Undo retracts records instead of deleting
/// them so redo can bring them back.
pub struct ProvenanceLog {
    records: Vec<ProvenanceRecord>,
    retracted: HashSet<ProvenanceStepId>,
    next_step: i64,
    recorded: Signal<ProvenanceRecord>,
}

impl ProvenanceLog {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            retracted: HashSet::new(),
            next_step: 1,
            recorded: Signal::new(),
        }
    }

    pub(crate) fn from_parts(
        records: Vec<ProvenanceRecord>,
        retracted: impl IntoIterator<Item = ProvenanceStepId>,
    ) -> Self {
        let next_step = records.iter().map(|r| r.step.get()).max().unwrap_or(0) + 1;
        Self {
            records,
            retracted: retracted.into_iter().collect(),
            next_step,
            recorded: Signal::new(),
        }
    }

    /// Emitted for every appended record.
    pub fn recorded(&self) -> &Signal<ProvenanceRecord> {
        &self.recorded
    }

    pub fn append(
        &mut self,
        action: String,
        inputs: Vec<ProvenanceId>,
        outputs: Vec<ProvenanceId>,
        deleted: Vec<ProvenanceId>,
    ) -> ProvenanceStepId {
        let step = ProvenanceStepId::new(self.next_step);
        self.next_step += 1;
        let record = ProvenanceRecord {
            step,
            action,
            inputs,
            outputs,
            deleted,
            timestamp_ms: now_ms(),
        };
        log::debug!(target: "provenance", "step {}: {}", step, record.action);
        self.records.push(record.clone());
        self.recorded.emit(record);
        step
    }

    pub fn retract(&mut self, step: ProvenanceStepId) -> bool {
        self.retracted.insert(step)
    }

    pub fn reinstate(&mut self, step: ProvenanceStepId) -> bool {
        self.retracted.remove(&step)
    }

    pub fn is_active(&self, step: ProvenanceStepId) -> bool {
        !self.retracted.contains(&step) && self.records.iter().any(|r| r.step == step)
    }

    /// Active records in step order.
    pub fn records(&self) -> impl Iterator<Item = &ProvenanceRecord> + '_ {
        self.records
            .iter()
            .filter(move |r| !self.retracted.contains(&r.step))
    }

    /// Every record, including retracted ones.
    pub fn all_records(&self) -> &[ProvenanceRecord] {
        &self.records
    }

    pub fn retracted_steps(&self) -> impl Iterator<Item = ProvenanceStepId> + '_ {
        self.retracted.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.records().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, step: ProvenanceStepId) -> Option<&ProvenanceRecord> {
        self.records.iter().find(|r| r.step == step)
    }

    /// Latest active record that produced `pid`.
    pub fn producer_of(&self, pid: ProvenanceId) -> Option<&ProvenanceRecord> {
        self.records().filter(|r| r.outputs.contains(&pid)).last()
    }

    /// Every active record `pid` depends on, oldest first.
    pub fn trail(&self, pid: ProvenanceId) -> Vec<&ProvenanceRecord> {
        let mut steps = BTreeSet::new();
        let mut pending = vec![pid];
        let mut seen = HashSet::new();
        while let Some(current) = pending.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(record) = self.producer_of(current) {
                if steps.insert(record.step) {
                    pending.extend(record.inputs.iter().copied());
                }
            }
        }
        steps.into_iter().filter_map(|step| self.get(step)).collect()
    }

    /// Replayable script reproducing `pid`.
    pub fn export_script(&self, pid: ProvenanceId) -> String {
        let mut script = format!("# provenance trail for #{}\n", pid);
        for record in self.trail(pid) {
            script.push_str(&record.to_script_line());
            script.push('\n');
        }
        script
    }
}

impl Default for ProvenanceLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProvenanceLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvenanceLog")
            .field("records", &self.records.len())
            .field("retracted", &self.retracted.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pids(ids: &[i64]) -> Vec<ProvenanceId> {
        ids.iter().copied().map(ProvenanceId::new).collect()
    }

    #[test]
    fn resolves_placeholders_to_input_ids() {
        let mut log = ProvenanceLog::new();
        let step = log.append("smooth(layer=${0}, iterations=2)".into(), pids(&[3]), pids(&[4]), vec![]);
        let record = log.get(step).unwrap();
        assert_eq!(record.resolved_action(), "smooth(layer=#3, iterations=2)");
        assert_eq!(record.to_script_line(), "smooth(layer=#3, iterations=2) -> 4");
    }

    #[test]
    fn quoted_literals_keep_their_placeholder_text() {
        let mut log = ProvenanceLog::new();
        let step = log.append(
            r"copy_layers(layers=[${0}], suffix='_${0}\'s')".into(),
            pids(&[1]),
            pids(&[2]),
            vec![],
        );
        let record = log.get(step).unwrap();
        assert_eq!(
            record.resolved_action(),
            r"copy_layers(layers=[#1], suffix='_${0}\'s')"
        );
    }

    #[test]
    fn trail_follows_inputs_back_to_sources() {
        let mut log = ProvenanceLog::new();
        log.append("new_layer(name=a)".into(), vec![], pids(&[1]), vec![]);
        log.append("new_layer(name=b)".into(), vec![], pids(&[2]), vec![]);
        log.append("smooth(layer=${0})".into(), pids(&[1]), pids(&[3]), vec![]);
        log.append("copy_layers(layers=[${0}])".into(), pids(&[3]), pids(&[4]), vec![]);

        let steps: Vec<i64> = log.trail(ProvenanceId::new(4)).iter().map(|r| r.step.get()).collect();
        assert_eq!(steps, vec![1, 3, 4]);
    }

    #[test]
    fn retracted_records_leave_the_trail() {
        let mut log = ProvenanceLog::new();
        log.append("new_layer(name=a)".into(), vec![], pids(&[1]), vec![]);
        let step = log.append("fill_slice(layer=${0})".into(), pids(&[1]), pids(&[2]), vec![]);
        assert!(log.retract(step));
        assert!(log.trail(ProvenanceId::new(2)).is_empty());
        assert_eq!(log.len(), 1);

        assert!(log.reinstate(step));
        assert_eq!(log.trail(ProvenanceId::new(2)).len(), 2);
    }

    #[test]
    fn exported_script_parses_back() {
        let mut log = ProvenanceLog::new();
        log.append("new_layer(name=a, dims=[2,2,2], value=0)".into(), vec![], pids(&[1]), vec![]);
        log.append("smooth(layer=${0}, iterations=1)".into(), pids(&[1]), pids(&[2]), vec![]);
        let steps = parse_script(&log.export_script(ProvenanceId::new(2))).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].command, "smooth(layer=#1, iterations=1)");
        assert_eq!(steps[1].outputs, pids(&[2]));
    }
}

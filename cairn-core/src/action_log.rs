//! Append-only JSONL log of executed actions.
//!
//! Each session starts with a header line; every finished action adds one
//! entry with its command string, source and status. The file is tailable
//! with `tail -f`.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use cairn_types::{ActionSource, ActionStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::dispatch::{DispatchEvent, Dispatcher};
use crate::signal::ConnectionId;

#[derive(Debug, thiserror::Error)]
pub enum ActionLogError {
    #[error("action log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("action log JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct SessionHeader {
    event: &'static str,
    epoch_ms: u128,
    pid: u32,
}

/// One logged action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub t_ms: u64,
    pub seq: u64,
    pub tag: String,
    /// Absent for the completion entry of a deferred action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ActionSource>,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub deferred: bool,
}

struct LogWriter {
    writer: BufWriter<File>,
    session_start: Instant,
}

impl LogWriter {
    fn write_line<T: Serialize>(&mut self, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => {
                let _ = writeln!(self.writer, "{}", json);
                let _ = self.writer.flush();
            }
            Err(e) => log::warn!(target: "dispatch", "action log entry dropped: {}", e),
        }
    }
}

/// Shared handle to an open action log.
#[derive(Clone)]
pub struct ActionLog {
    inner: Arc<Mutex<LogWriter>>,
    path: PathBuf,
}

impl ActionLog {
    /// `<config dir>/cairn/actions.jsonl`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("cairn").join("actions.jsonl"))
    }

    pub fn open(path: &Path) -> Result<Self, ActionLogError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = LogWriter {
            writer: BufWriter::new(file),
            session_start: Instant::now(),
        };
        writer.write_line(&SessionHeader {
            event: "session_start",
            epoch_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
            pid: std::process::id(),
        });
        Ok(Self {
            inner: Arc::new(Mutex::new(writer)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `event` if it marks an action as finished; other events are
    /// ignored.
    pub fn record(&self, event: &DispatchEvent) {
        let mut inner = self.inner.lock();
        let t_ms = inner.session_start.elapsed().as_millis() as u64;
        let entry = match event {
            DispatchEvent::PostAction {
                seq,
                tag,
                command,
                source,
                status,
                message,
                deferred,
            } => ActionLogEntry {
                t_ms,
                seq: *seq,
                tag: tag.to_string(),
                command: Some(command.clone()),
                source: Some(*source),
                status: *status,
                message: message.clone(),
                deferred: *deferred,
            },
            DispatchEvent::DeferredDone {
                seq,
                tag,
                status,
                message,
            } => ActionLogEntry {
                t_ms,
                seq: *seq,
                tag: tag.to_string(),
                command: None,
                source: None,
                status: *status,
                message: message.clone(),
                deferred: true,
            },
            _ => return,
        };
        inner.write_line(&entry);
    }

    /// Log every action the dispatcher finishes from now on.
    pub fn attach(&self, dispatcher: &Dispatcher) -> ConnectionId {
        let log = self.clone();
        dispatcher.events().connect(move |event| log.record(event))
    }
}

impl std::fmt::Debug for ActionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionLog").field("path", &self.path).finish()
    }
}

/// Read back the entries of a log file. Session headers and lines that do
/// not parse are skipped.
pub fn read_entries(path: &Path) -> Result<Vec<ActionLogEntry>, ActionLogError> {
    let file = File::open(path)?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<ActionLogEntry>(&line) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

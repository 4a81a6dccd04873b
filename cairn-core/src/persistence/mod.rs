//! Project files: SQLite databases holding layers, project-data state and
//! the provenance log.

pub mod schema;

use std::path::Path;

use cairn_types::{ActionSource, ProvenanceId, ProvenanceStepId};
use rusqlite::{params, Connection};

use crate::layer::{LayerSnapshot, Volume};
use crate::project::Project;
use crate::provenance::{ProvenanceLog, ProvenanceRecord};

use schema::SCHEMA_VERSION;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("could not encode volume: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("could not decode volume of '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: rmp_serde::decode::Error,
    },
    #[error("bad id list in provenance step {step}: {source}")]
    IdList {
        step: i64,
        #[source]
        source: serde_json::Error,
    },
    #[error("not a project file (no schema_version table)")]
    NotAProject,
    #[error("project version {0} is newer than supported ({})", SCHEMA_VERSION)]
    TooNew(i32),
    #[error("could not restore layer '{key}': {reason}")]
    Layer { key: String, reason: String },
}

/// What [`load_project`] could not restore exactly.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadReport {
    pub layers: usize,
    pub records: usize,
    /// State ids with no matching cell or an unparseable value.
    pub failed_states: Vec<String>,
}

/// Write the live workspace and provenance log to `path`.
///
/// Uses WAL mode and one transaction, so a crash mid-save leaves the
/// previous contents intact.
pub fn save_project(path: &Path, project: &Project) -> Result<(), PersistenceError> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;

    let tx = conn.unchecked_transaction()?;
    schema::create_tables(&tx)?;
    schema::delete_all_data(&tx)?;
    tx.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
        params![SCHEMA_VERSION],
    )?;
    tx.execute(
        "INSERT INTO meta (id, next_provenance_id, next_layer_number) VALUES (1, ?1, ?2)",
        params![
            project.peek_next_provenance_id(),
            project.layers().next_layer_number() as i64
        ],
    )?;
    save_states(&tx, project)?;
    save_layers(&tx, project)?;
    save_provenance(&tx, project.provenance())?;
    tx.commit()?;

    log::info!(target: "persistence", "saved project to {}", path.display());
    Ok(())
}

fn save_states(conn: &Connection, project: &Project) -> Result<(), PersistenceError> {
    let mut stmt = conn.prepare("INSERT INTO states (id, value, ord) VALUES (?1, ?2, ?3)")?;
    for (ord, (id, value)) in project.registry().export_session().iter().enumerate() {
        stmt.execute(params![id, value, ord as i64])?;
    }
    Ok(())
}

fn save_layers(conn: &Connection, project: &Project) -> Result<(), PersistenceError> {
    let mut stmt = conn.prepare(
        "INSERT INTO layers (key, position, name, provenance_id, opacity, volume)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for snapshot in project.layers().snapshots() {
        let volume = rmp_serde::to_vec(&snapshot.volume)?;
        stmt.execute(params![
            snapshot.key,
            snapshot.position as i64,
            snapshot.name,
            snapshot.provenance_id.get(),
            snapshot.opacity,
            volume,
        ])?;
    }
    Ok(())
}

fn save_provenance(conn: &Connection, log: &ProvenanceLog) -> Result<(), PersistenceError> {
    let mut stmt = conn.prepare(
        "INSERT INTO provenance (step, action, inputs, outputs, deleted, timestamp_ms, retracted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for record in log.all_records() {
        let ids = |list: &[ProvenanceId]| -> Result<String, PersistenceError> {
            serde_json::to_string(list).map_err(|source| PersistenceError::IdList {
                step: record.step.get(),
                source,
            })
        };
        stmt.execute(params![
            record.step.get(),
            record.action,
            ids(&record.inputs)?,
            ids(&record.outputs)?,
            ids(&record.deleted)?,
            record.timestamp_ms as i64,
            !log.is_active(record.step) as i32,
        ])?;
    }
    Ok(())
}

/// Replace the live workspace and provenance log of `project` with the
/// contents of `path`. Sandboxes are left alone; undo history is cleared.
pub fn load_project(path: &Path, project: &mut Project) -> Result<LoadReport, PersistenceError> {
    let conn = Connection::open(path)?;

    let has_schema_version: bool = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get::<_, i64>(0),
    )? > 0;
    if !has_schema_version {
        return Err(PersistenceError::NotAProject);
    }
    let version: i32 = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, Option<i32>>(0).map(|v| v.unwrap_or(0))
    })?;
    if version > SCHEMA_VERSION {
        return Err(PersistenceError::TooNew(version));
    }

    let snapshots = load_layers(&conn)?;
    let states = load_states(&conn)?;
    let (records, retracted) = load_provenance(&conn)?;
    let (next_provenance_id, next_layer_number): (i64, i64) = conn.query_row(
        "SELECT next_provenance_id, next_layer_number FROM meta WHERE id = 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let layers = project.layers_mut();
    layers
        .replace_all(&snapshots)
        .map_err(|(key, e)| PersistenceError::Layer {
            key,
            reason: e.to_string(),
        })?;
    layers.set_next_layer_number(next_layer_number.max(0) as u64);

    let failed_states = project.registry().import_session(&states, ActionSource::None);
    if !failed_states.is_empty() {
        log::warn!(target: "persistence", "{} states not restored", failed_states.len());
    }

    let report = LoadReport {
        layers: snapshots.len(),
        records: records.len(),
        failed_states,
    };

    let highest = records
        .iter()
        .flat_map(|r| r.outputs.iter().copied())
        .chain(snapshots.iter().map(|s| s.provenance_id))
        .max();
    project.replace_provenance(ProvenanceLog::from_parts(records, retracted));
    project.observe_provenance_id(ProvenanceId::new(next_provenance_id - 1));
    if let Some(highest) = highest {
        project.observe_provenance_id(highest);
    }
    project.clear_undo();

    log::info!(
        target: "persistence",
        "loaded {} layers and {} provenance records from {}",
        report.layers,
        report.records,
        path.display()
    );
    Ok(report)
}

fn load_layers(conn: &Connection) -> Result<Vec<LayerSnapshot>, PersistenceError> {
    let mut stmt = conn.prepare(
        "SELECT key, position, name, provenance_id, opacity, volume FROM layers ORDER BY position",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, f64>(4)?,
            row.get::<_, Vec<u8>>(5)?,
        ))
    })?;

    let mut snapshots = Vec::new();
    for row in rows {
        let (key, position, name, provenance_id, opacity, blob) = row?;
        let volume: Volume = rmp_serde::from_slice(&blob).map_err(|source| {
            PersistenceError::Decode {
                key: key.clone(),
                source,
            }
        })?;
        snapshots.push(LayerSnapshot {
            key,
            position: position.max(0) as usize,
            name,
            provenance_id: ProvenanceId::new(provenance_id),
            opacity,
            volume,
        });
    }
    Ok(snapshots)
}

fn load_states(conn: &Connection) -> Result<Vec<(String, String)>, PersistenceError> {
    let mut stmt = conn.prepare("SELECT id, value FROM states ORDER BY ord")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut states = Vec::new();
    for row in rows {
        states.push(row?);
    }
    Ok(states)
}

fn load_provenance(
    conn: &Connection,
) -> Result<(Vec<ProvenanceRecord>, Vec<ProvenanceStepId>), PersistenceError> {
    let mut stmt = conn.prepare(
        "SELECT step, action, inputs, outputs, deleted, timestamp_ms, retracted
         FROM provenance ORDER BY step",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, i64>(5)?,
            row.get::<_, i32>(6)?,
        ))
    })?;

    let mut records = Vec::new();
    let mut retracted = Vec::new();
    for row in rows {
        let (step, action, inputs, outputs, deleted, timestamp_ms, is_retracted) = row?;
        let ids = |text: &str| -> Result<Vec<ProvenanceId>, PersistenceError> {
            serde_json::from_str(text).map_err(|source| PersistenceError::IdList { step, source })
        };
        let step_id = ProvenanceStepId::new(step);
        if is_retracted != 0 {
            retracted.push(step_id);
        }
        records.push(ProvenanceRecord {
            step: step_id,
            action,
            inputs: ids(&inputs)?,
            outputs: ids(&outputs)?,
            deleted: ids(&deleted)?,
            timestamp_ms: timestamp_ms.max(0) as u64,
        });
    }
    Ok((records, retracted))
}

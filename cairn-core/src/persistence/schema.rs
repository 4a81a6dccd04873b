use rusqlite::{Connection, Result as SqlResult};

/// Schema version of saved projects.
pub const SCHEMA_VERSION: i32 = 1;

pub fn create_tables(conn: &Connection) -> SqlResult<()> {
    conn.execute_batch(SCHEMA_SQL)
}

/// Delete all rows, keeping the tables.
pub fn delete_all_data(conn: &Connection) -> SqlResult<()> {
    conn.execute_batch(DELETE_ALL_SQL)
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    next_provenance_id INTEGER NOT NULL,
    next_layer_number INTEGER NOT NULL
);

-- project-data state cells, in registration order
CREATE TABLE IF NOT EXISTS states (
    id TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    ord INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS layers (
    key TEXT PRIMARY KEY,
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    provenance_id INTEGER NOT NULL,
    opacity REAL NOT NULL,
    -- msgpack-encoded volume
    volume BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS provenance (
    step INTEGER PRIMARY KEY,
    action TEXT NOT NULL,
    inputs TEXT NOT NULL,
    outputs TEXT NOT NULL,
    deleted TEXT NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    retracted INTEGER NOT NULL DEFAULT 0
);
";

const DELETE_ALL_SQL: &str = "
DELETE FROM schema_version;
DELETE FROM meta;
DELETE FROM states;
DELETE FROM layers;
DELETE FROM provenance;
";

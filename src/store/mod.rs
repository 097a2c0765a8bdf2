// src/store/mod.rs
//
// =============================================================================
// WORKCELL CORE: PERSISTENCE LAYER
// =============================================================================
//
// SQLite using the same "hybrid relational" pattern as the teacher's
// checkpoint store: high-traffic fields (status, accession ids, timestamps)
// are real columns so they can be indexed and filtered; complex or
// open-ended structures (config payloads, spatial coordinates, return
// values) are JSON text columns.
//
// Unlike the teacher's single flat `jobs` table, this schema spans several
// tables (definitions, assets, runs, calls, outputs) because the domain has
// real foreign-key relationships the lock manager and linker both rely on.

pub mod assets;
pub mod calls;
pub mod definitions;
pub mod outputs;
pub mod runs;

use crate::errors::CoreResult;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Opens a connection against the given database file and applies the
/// store's pragmas. Call sites that need a transaction open their own
/// connection via this helper rather than sharing one across threads —
/// rusqlite's `Connection` is not `Sync`, and workers each hold their own.
pub fn open(path: impl AsRef<Path>) -> CoreResult<Connection> {
    let conn = Connection::open(path)?;
    apply_pragmas(&conn)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA busy_timeout=10000;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

/// Opens (creating if necessary) the database at `path` and ensures the
/// full schema exists. Idempotent — safe to call on every process start.
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store.init()?;
        Ok(store)
    }

    pub fn conn(&self) -> CoreResult<Connection> {
        open(&self.path)
    }

    fn init(&self) -> CoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }
}

const SCHEMA: &str = "
BEGIN;

CREATE TABLE IF NOT EXISTS resource_definitions (
    name TEXT PRIMARY KEY,
    fqn TEXT UNIQUE,
    category TEXT NOT NULL,
    is_consumable INTEGER NOT NULL DEFAULT 0,
    definition_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS machine_definitions (
    name TEXT PRIMARY KEY,
    fqn TEXT UNIQUE,
    category TEXT NOT NULL,
    backend_type TEXT,
    definition_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS deck_definitions (
    name TEXT PRIMARY KEY,
    fqn TEXT UNIQUE,
    definition_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS deck_position_definitions (
    deck_name TEXT NOT NULL REFERENCES deck_definitions(name),
    position_name TEXT NOT NULL,
    definition_json TEXT NOT NULL,
    PRIMARY KEY (deck_name, position_name)
);

CREATE TABLE IF NOT EXISTS function_protocol_definitions (
    accession_id TEXT PRIMARY KEY,
    fqn TEXT UNIQUE,
    name TEXT NOT NULL,
    version TEXT NOT NULL,
    definition_json TEXT NOT NULL,
    UNIQUE(name, version)
);

CREATE TABLE IF NOT EXISTS assets (
    accession_id TEXT PRIMARY KEY,
    asset_type TEXT NOT NULL,
    name TEXT NOT NULL,
    definition_name TEXT NOT NULL,
    status TEXT NOT NULL,
    current_protocol_run_accession_id TEXT REFERENCES protocol_runs(accession_id),
    lock_reservation_id TEXT,
    linked_counterpart_accession_id TEXT REFERENCES assets(accession_id),
    parent_deck_accession_id TEXT REFERENCES assets(accession_id),
    current_deck_position_name TEXT,
    properties_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_assets_type_status ON assets(asset_type, status);

CREATE TABLE IF NOT EXISTS protocol_runs (
    accession_id TEXT PRIMARY KEY,
    protocol_definition_accession_id TEXT NOT NULL REFERENCES function_protocol_definitions(accession_id),
    status TEXT NOT NULL,
    input_parameters_json TEXT NOT NULL DEFAULT '{}',
    output_data_json TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_protocol_runs_status ON protocol_runs(status);

CREATE TABLE IF NOT EXISTS function_call_logs (
    accession_id TEXT PRIMARY KEY,
    protocol_run_accession_id TEXT NOT NULL REFERENCES protocol_runs(accession_id),
    parent_function_call_log_accession_id TEXT REFERENCES function_call_logs(accession_id),
    sequence_in_run INTEGER NOT NULL,
    function_name TEXT NOT NULL,
    status TEXT NOT NULL,
    args_json TEXT NOT NULL DEFAULT '{}',
    return_value_json TEXT,
    error_message TEXT,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    UNIQUE(protocol_run_accession_id, sequence_in_run)
);
CREATE INDEX IF NOT EXISTS idx_call_logs_run ON function_call_logs(protocol_run_accession_id);
CREATE INDEX IF NOT EXISTS idx_call_logs_parent ON function_call_logs(parent_function_call_log_accession_id);

CREATE TABLE IF NOT EXISTS function_data_outputs (
    accession_id TEXT PRIMARY KEY,
    protocol_run_accession_id TEXT NOT NULL REFERENCES protocol_runs(accession_id),
    function_call_log_accession_id TEXT NOT NULL REFERENCES function_call_logs(accession_id),
    resource_accession_id TEXT REFERENCES assets(accession_id),
    data_type TEXT NOT NULL,
    data_key TEXT NOT NULL,
    spatial_context TEXT NOT NULL,
    data_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_data_outputs_call ON function_data_outputs(function_call_log_accession_id);
CREATE INDEX IF NOT EXISTS idx_data_outputs_resource ON function_data_outputs(resource_accession_id);

CREATE TABLE IF NOT EXISTS well_data_outputs (
    accession_id TEXT PRIMARY KEY,
    function_data_output_accession_id TEXT NOT NULL REFERENCES function_data_outputs(accession_id),
    well_name TEXT NOT NULL,
    well_index INTEGER NOT NULL,
    value REAL,
    value_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_well_outputs_parent ON well_data_outputs(function_data_output_accession_id);

COMMIT;
";

#[cfg(test)]
pub(crate) mod test_support {
    use super::Store;

    /// Opens a freshly-initialized store backed by a temp file. Returns the
    /// `TempDir` alongside it so the caller keeps it alive for as long as
    /// the store is in use.
    pub fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(&path).unwrap();
        (dir, store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(&path).unwrap();
        // Re-opening must not fail on the CREATE TABLE IF NOT EXISTS statements.
        Store::open(&path).unwrap();
        let conn = store.conn().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(count >= 9);
    }
}

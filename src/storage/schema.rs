//! Database schema definitions
//!
//! Two tables: `runs` holds one row per supervisor incarnation, `resources`
//! holds the checkpoint of every resource ever claimed.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per process incarnation
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    incarnation INTEGER NOT NULL DEFAULT 0,
    outcome TEXT
);

-- Resource checkpoints, keyed by the stable resource id
CREATE TABLE IF NOT EXISTS resources (
    id TEXT PRIMARY KEY,
    locator TEXT NOT NULL,
    size_hint INTEGER,
    state TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    detail TEXT,
    claimed_at TEXT,
    finished_at TEXT,
    last_run INTEGER REFERENCES runs(id)
);

CREATE INDEX IF NOT EXISTS idx_resources_state ON resources(state);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

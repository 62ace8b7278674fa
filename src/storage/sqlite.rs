//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the ResultSink trait.

use crate::source::Resource;
use crate::state::ResourceState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ResultSink, StorageError, StorageResult};
use crate::storage::{Checkpoint, ResourceRecord, RunRecord, RunStatus};
use crate::supervisor::BatchOutcome;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const RESOURCE_COLUMNS: &str =
    "id, locator, size_hint, state, attempts, detail, claimed_at, finished_at";

/// SQLite result sink
///
/// One connection guarded by a mutex; every consumer thread shares it.
pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    /// Opens or creates the database at `path`
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Concurrent readers (stats) while a run is writing
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn resource_from_row(row: &Row<'_>) -> rusqlite::Result<ResourceRecord> {
    Ok(ResourceRecord {
        id: row.get(0)?,
        locator: row.get(1)?,
        size_hint: row.get::<_, Option<i64>>(2)?.map(|v| v.max(0) as u64),
        state: ResourceState::from_db_string(&row.get::<_, String>(3)?)
            .unwrap_or(ResourceState::Claimed),
        attempts: row.get(4)?,
        detail: row.get(5)?,
        claimed_at: row.get(6)?,
        finished_at: row.get(7)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        incarnation: row.get(4)?,
        status: RunStatus::from_db_string(row.get::<_, Option<String>>(5)?.as_deref()),
    })
}

impl ResultSink for SqliteSink {
    // ===== Run Management =====

    fn begin_run(&self, config_hash: &str, incarnation: u32) -> StorageResult<i64> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, incarnation) VALUES (?1, ?2, ?3)",
            params![now, config_hash, incarnation],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn finish_run(&self, run_id: i64, outcome: BatchOutcome) -> StorageResult<()> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        let updated = conn.execute(
            "UPDATE runs SET outcome = ?1, finished_at = ?2 WHERE id = ?3",
            params![outcome.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn list_runs(&self) -> StorageResult<Vec<RunRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, started_at, finished_at, config_hash, incarnation, outcome
             FROM runs ORDER BY id",
        )?;
        let runs = stmt
            .query_map([], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    // ===== Checkpoints =====

    fn checkpoint(&self, resource_id: &str) -> StorageResult<Option<Checkpoint>> {
        Ok(self.get_resource(resource_id)?.map(|r| r.checkpoint()))
    }

    fn mark_claimed(&self, run_id: i64, resource: &Resource) -> StorageResult<()> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        let size_hint = resource.size_hint.map(|v| v.min(i64::MAX as u64) as i64);
        conn.execute(
            "INSERT INTO resources (id, locator, size_hint, state, attempts, claimed_at, last_run)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                attempts = attempts + 1,
                detail = NULL,
                claimed_at = excluded.claimed_at,
                finished_at = NULL,
                last_run = excluded.last_run",
            params![
                resource.id,
                resource.locator.to_string_lossy().into_owned(),
                size_hint,
                ResourceState::Claimed.to_db_string(),
                now,
                run_id
            ],
        )?;
        Ok(())
    }

    fn mark_finished(
        &self,
        resource_id: &str,
        state: ResourceState,
        detail: Option<&str>,
    ) -> StorageResult<()> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE resources SET state = ?1, detail = ?2, finished_at = ?3 WHERE id = ?4",
            params![state.to_db_string(), detail, now, resource_id],
        )?;
        Ok(())
    }

    fn get_resource(&self, resource_id: &str) -> StorageResult<Option<ResourceRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!("SELECT {} FROM resources WHERE id = ?1", RESOURCE_COLUMNS),
                params![resource_id],
                resource_from_row,
            )
            .optional()?;
        Ok(record)
    }

    // ===== Statistics =====

    fn count_by_state(&self, state: ResourceState) -> StorageResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM resources WHERE state = ?1",
            params![state.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn recent_failures(&self, limit: usize) -> StorageResult<Vec<ResourceRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM resources
             WHERE state IN (?1, ?2, ?3)
             ORDER BY finished_at DESC
             LIMIT ?4",
            RESOURCE_COLUMNS
        ))?;
        let records = stmt
            .query_map(
                params![
                    ResourceState::Failed.to_db_string(),
                    ResourceState::TimedOut.to_db_string(),
                    ResourceState::Abandoned.to_db_string(),
                    limit as i64
                ],
                resource_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

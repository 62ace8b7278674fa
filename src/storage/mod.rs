//! Storage module for persisting batch progress
//!
//! This module handles the result sink, including:
//! - SQLite database initialization and schema management
//! - Per-resource checkpoints used to resume after a crash
//! - Run tracking with the outcome of every incarnation

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemorySink;
pub use sqlite::SqliteSink;
pub use traits::{ResultSink, StorageError, StorageResult};

use crate::state::ResourceState;
use crate::supervisor::BatchOutcome;

use std::path::Path;

/// Opens or creates the SQLite result sink at `path`
pub fn open_storage(path: &Path) -> StorageResult<SqliteSink> {
    SqliteSink::open(path)
}

/// Progress recorded for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub state: ResourceState,
    /// Number of times any incarnation claimed the resource
    pub attempts: u32,
}

/// Represents a resource row in the database
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    pub id: String,
    pub locator: String,
    pub size_hint: Option<u64>,
    pub state: ResourceState,
    pub attempts: u32,
    pub detail: Option<String>,
    pub claimed_at: Option<String>,
    pub finished_at: Option<String>,
}

impl ResourceRecord {
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            state: self.state,
            attempts: self.attempts,
        }
    }
}

/// Represents one supervisor incarnation
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub incarnation: u32,
    pub status: RunStatus,
}

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Still running, or the process died before recording an outcome
    Running,
    Finished(BatchOutcome),
}

impl RunStatus {
    pub fn to_db_string(&self) -> Option<&'static str> {
        match self {
            Self::Running => None,
            Self::Finished(outcome) => Some(outcome.to_db_string()),
        }
    }

    pub fn from_db_string(s: Option<&str>) -> Self {
        match s.and_then(BatchOutcome::from_db_string) {
            Some(outcome) => Self::Finished(outcome),
            None => Self::Running,
        }
    }

    pub fn label(&self) -> &'static str {
        self.to_db_string().unwrap_or("running")
    }
}

//! Result sink trait and error types

use crate::source::Resource;
use crate::state::ResourceState;
use crate::storage::{Checkpoint, ResourceRecord, RunRecord};
use crate::supervisor::BatchOutcome;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence for per-resource outcomes and run history
///
/// Shared by the crawler, every consumer and the monitor, so implementations
/// synchronize internally. A resource is checkpointed `claimed` before the
/// extractor sees it and moved to a terminal state afterwards; a resource left
/// `claimed` after a crash is what the next incarnation retries.
pub trait ResultSink: Send + Sync {
    // ===== Run Management =====

    /// Records the start of an incarnation and returns its run id
    fn begin_run(&self, config_hash: &str, incarnation: u32) -> StorageResult<i64>;

    /// Records the final outcome of an incarnation
    fn finish_run(&self, run_id: i64, outcome: BatchOutcome) -> StorageResult<()>;

    /// All runs, oldest first
    fn list_runs(&self) -> StorageResult<Vec<RunRecord>>;

    // ===== Checkpoints =====

    /// Last recorded progress for a resource, if any
    fn checkpoint(&self, resource_id: &str) -> StorageResult<Option<Checkpoint>>;

    /// Marks the resource claimed and bumps its attempt counter
    fn mark_claimed(&self, run_id: i64, resource: &Resource) -> StorageResult<()>;

    /// Moves the resource to `state`, recording an optional detail line
    fn mark_finished(
        &self,
        resource_id: &str,
        state: ResourceState,
        detail: Option<&str>,
    ) -> StorageResult<()>;

    /// Full record for a resource
    fn get_resource(&self, resource_id: &str) -> StorageResult<Option<ResourceRecord>>;

    // ===== Statistics =====

    /// Counts resources by state
    fn count_by_state(&self, state: ResourceState) -> StorageResult<u64>;

    /// Most recent failures, newest first
    fn recent_failures(&self, limit: usize) -> StorageResult<Vec<ResourceRecord>>;
}

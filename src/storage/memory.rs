//! In-process result sink
//!
//! Keeps everything in memory. Useful for library callers that persist
//! results themselves, and for tests.

use crate::source::Resource;
use crate::state::ResourceState;
use crate::storage::traits::{ResultSink, StorageError, StorageResult};
use crate::storage::{Checkpoint, ResourceRecord, RunRecord, RunStatus};
use crate::supervisor::BatchOutcome;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Inner {
    runs: Vec<RunRecord>,
    resources: HashMap<String, ResourceRecord>,
    /// Resource ids in the order they reached a terminal state
    finish_order: Vec<String>,
}

/// Result sink backed by a mutex-guarded map
#[derive(Debug, Default)]
pub struct MemorySink {
    inner: Mutex<Inner>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every resource record, sorted by id
    pub fn resources(&self) -> Vec<ResourceRecord> {
        let inner = self.inner.lock();
        let mut records: Vec<_> = inner.resources.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

impl ResultSink for MemorySink {
    fn begin_run(&self, config_hash: &str, incarnation: u32) -> StorageResult<i64> {
        let mut inner = self.inner.lock();
        let id = inner.runs.len() as i64 + 1;
        inner.runs.push(RunRecord {
            id,
            started_at: Utc::now().to_rfc3339(),
            finished_at: None,
            config_hash: config_hash.to_string(),
            incarnation,
            status: RunStatus::Running,
        });
        Ok(id)
    }

    fn finish_run(&self, run_id: i64, outcome: BatchOutcome) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or(StorageError::RunNotFound(run_id))?;
        run.status = RunStatus::Finished(outcome);
        run.finished_at = Some(Utc::now().to_rfc3339());
        Ok(())
    }

    fn list_runs(&self) -> StorageResult<Vec<RunRecord>> {
        Ok(self.inner.lock().runs.clone())
    }

    fn checkpoint(&self, resource_id: &str) -> StorageResult<Option<Checkpoint>> {
        Ok(self
            .inner
            .lock()
            .resources
            .get(resource_id)
            .map(ResourceRecord::checkpoint))
    }

    fn mark_claimed(&self, _run_id: i64, resource: &Resource) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let now = Utc::now().to_rfc3339();
        let record = inner
            .resources
            .entry(resource.id.clone())
            .or_insert_with(|| ResourceRecord {
                id: resource.id.clone(),
                locator: resource.locator.to_string_lossy().into_owned(),
                size_hint: resource.size_hint,
                state: ResourceState::Claimed,
                attempts: 0,
                detail: None,
                claimed_at: None,
                finished_at: None,
            });
        record.state = ResourceState::Claimed;
        record.attempts += 1;
        record.detail = None;
        record.claimed_at = Some(now);
        record.finished_at = None;
        Ok(())
    }

    fn mark_finished(
        &self,
        resource_id: &str,
        state: ResourceState,
        detail: Option<&str>,
    ) -> StorageResult<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(record) = inner.resources.get_mut(resource_id) {
            record.state = state;
            record.detail = detail.map(str::to_string);
            record.finished_at = Some(Utc::now().to_rfc3339());
            inner.finish_order.push(resource_id.to_string());
        }
        Ok(())
    }

    fn get_resource(&self, resource_id: &str) -> StorageResult<Option<ResourceRecord>> {
        Ok(self.inner.lock().resources.get(resource_id).cloned())
    }

    fn count_by_state(&self, state: ResourceState) -> StorageResult<u64> {
        Ok(self
            .inner
            .lock()
            .resources
            .values()
            .filter(|r| r.state == state)
            .count() as u64)
    }

    fn recent_failures(&self, limit: usize) -> StorageResult<Vec<ResourceRecord>> {
        let inner = self.inner.lock();
        let mut seen = std::collections::HashSet::new();
        let failures = inner
            .finish_order
            .iter()
            .rev()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| inner.resources.get(id))
            .filter(|r| r.state.is_error())
            .take(limit)
            .cloned()
            .collect();
        Ok(failures)
    }
}

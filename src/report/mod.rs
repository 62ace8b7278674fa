//! Status reporting
//!
//! Reporters receive read-only snapshots of the supervisor on their own
//! schedule. Reporting is strictly best-effort: errors and panics raised by a
//! reporter are swallowed by [`report_safely`] and can never change the batch
//! outcome.

mod json_file;
mod log;

pub use self::json_file::JsonFileReporter;
pub use self::log::LogReporter;

use crate::config::ReporterConfig;
use crate::state::{ConsumerSnapshot, ConsumerState};
use crate::supervisor::MonitorPhase;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

/// Errors a reporter may raise; always discarded by the caller
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Read-only view of the supervisor at one instant
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub taken_at: DateTime<Utc>,
    pub phase: MonitorPhase,
    pub elapsed_millis: u64,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub crawler_exhausted: bool,
    pub enqueued: u64,
    pub skipped: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub unexpected: u64,
    pub consumers: Vec<ConsumerSnapshot>,
}

impl StatusSnapshot {
    /// Number of consumers currently inside the extraction capability
    pub fn active_consumers(&self) -> usize {
        self.consumers
            .iter()
            .filter(|c| c.state == ConsumerState::Active)
            .count()
    }

    /// Resources finished per second since the start
    pub fn rate(&self) -> f64 {
        let finished = self.completed + self.failed;
        if self.elapsed_millis == 0 {
            0.0
        } else {
            finished as f64 * 1000.0 / self.elapsed_millis as f64
        }
    }
}

/// Sink for status snapshots
pub trait StatusReporter: Send {
    fn report(&mut self, snapshot: &StatusSnapshot) -> Result<(), ReportError>;
}

/// Invokes the reporter, discarding any error or panic
pub fn report_safely(reporter: &mut dyn StatusReporter, snapshot: &StatusSnapshot) {
    match catch_unwind(AssertUnwindSafe(|| reporter.report(snapshot))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "status reporter failed; ignoring"),
        Err(_) => tracing::debug!("status reporter panicked; ignoring"),
    }
}

/// Builds the configured reporter, if any
pub fn build_reporter(config: &ReporterConfig) -> Option<Box<dyn StatusReporter>> {
    match config {
        ReporterConfig::None => None,
        ReporterConfig::Log => Some(Box::new(LogReporter::new())),
        ReporterConfig::JsonFile { path } => Some(Box::new(JsonFileReporter::new(path.clone()))),
    }
}

#[cfg(test)]
pub(crate) fn sample_snapshot() -> StatusSnapshot {
    StatusSnapshot {
        taken_at: Utc::now(),
        phase: MonitorPhase::Running,
        elapsed_millis: 2000,
        queue_depth: 3,
        queue_capacity: 10,
        crawler_exhausted: false,
        enqueued: 12,
        skipped: 0,
        completed: 8,
        failed: 2,
        timed_out: 1,
        unexpected: 0,
        consumers: vec![
            ConsumerSnapshot {
                id: 0,
                state: ConsumerState::Active,
                current_resource: Some("a.pdf".to_string()),
                heartbeat_age_millis: 15,
                completed: 5,
            },
            ConsumerSnapshot {
                id: 1,
                state: ConsumerState::Idle,
                current_resource: None,
                heartbeat_age_millis: 3,
                completed: 3,
            },
        ],
    }
}

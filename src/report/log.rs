use crate::report::{ReportError, StatusReporter, StatusSnapshot};

/// Writes each snapshot as one structured log line
#[derive(Debug, Default)]
pub struct LogReporter;

impl LogReporter {
    pub fn new() -> Self {
        Self
    }
}

impl StatusReporter for LogReporter {
    fn report(&mut self, snapshot: &StatusSnapshot) -> Result<(), ReportError> {
        tracing::info!(
            phase = %snapshot.phase,
            queued = snapshot.queue_depth,
            active = snapshot.active_consumers(),
            completed = snapshot.completed,
            failed = snapshot.failed,
            timed_out = snapshot.timed_out,
            "Progress: {} completed, {} failed, {:.2} resources/sec",
            snapshot.completed,
            snapshot.failed,
            snapshot.rate()
        );
        Ok(())
    }
}

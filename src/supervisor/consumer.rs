//! Consumer pool
//!
//! Each worker loops: take a resource, checkpoint it claimed, run the
//! extractor, record the outcome. Workers are plain threads that are never
//! joined; a worker the monitor abandons may stay blocked inside the
//! extractor until the process exits.

use crate::extract::{ExtractError, Extracted, Extractor};
use crate::source::Resource;
use crate::state::{ConsumerStatus, ResourceState};
use crate::supervisor::context::SupervisorContext;
use crate::supervisor::BatchOutcome;
use crate::BatchError;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Upper bound on how long an idle worker waits before re-checking the phase
const TAKE_TIMEOUT: Duration = Duration::from_millis(100);

/// What one extraction call amounted to
#[derive(Debug)]
enum Classified {
    Completed(Extracted),
    Failed(String),
    Unexpected(String),
    NoRestart(String),
}

/// Spawns and replaces consumer workers
#[derive(Clone)]
pub(crate) struct ConsumerPool {
    ctx: Arc<SupervisorContext>,
    extractor: Arc<dyn Extractor>,
}

impl ConsumerPool {
    pub(crate) fn new(ctx: Arc<SupervisorContext>, extractor: Arc<dyn Extractor>) -> Self {
        Self { ctx, extractor }
    }

    /// Starts the configured number of workers
    pub(crate) fn start(&self) -> Result<(), BatchError> {
        for _ in 0..self.ctx.config().num_consumers {
            self.spawn_worker()?;
        }
        tracing::info!(
            consumers = self.ctx.config().num_consumers,
            extractor = self.extractor.name(),
            "Consumer pool started"
        );
        Ok(())
    }

    /// Registers a status record and starts a worker thread for it
    pub(crate) fn spawn_worker(&self) -> Result<Arc<ConsumerStatus>, BatchError> {
        let status = self.ctx.register_consumer();
        let worker_status = Arc::clone(&status);
        let ctx = Arc::clone(&self.ctx);
        let extractor = Arc::clone(&self.extractor);

        thread::Builder::new()
            .name(format!("consumer-{}", status.id()))
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    worker_loop(&ctx, extractor.as_ref(), &worker_status)
                }));

                if let Err(payload) = outcome {
                    let message = panic_message(payload.as_ref());
                    worker_status.mark_crashed();
                    ctx.request_abort(
                        BatchOutcome::CrashedRestartable,
                        format!("consumer {} panicked: {}", worker_status.id(), message),
                    );
                }
            })
            .map_err(|source| BatchError::ThreadSpawn {
                role: format!("consumer-{}", status.id()),
                source,
            })?;

        Ok(status)
    }
}

fn worker_loop(ctx: &SupervisorContext, extractor: &dyn Extractor, status: &ConsumerStatus) {
    let take_timeout = ctx.config().timeout_check_pulse.min(TAKE_TIMEOUT);

    while ctx.is_running() {
        let Some(resource) = ctx.queue().take(take_timeout) else {
            continue;
        };

        // The phase may have changed while we were waiting
        if !ctx.is_running() {
            tracing::debug!(
                consumer = status.id(),
                resource = %resource.id,
                "Pool no longer running; leaving resource unclaimed"
            );
            break;
        }

        status.begin(&resource.id);
        if let Err(e) = ctx.sink().mark_claimed(ctx.run_id(), &resource) {
            tracing::warn!(resource = %resource.id, error = %e, "Failed to checkpoint claim");
        }

        let result = catch_unwind(AssertUnwindSafe(|| {
            extractor.extract(&resource, status.cancel_signal())
        }));
        let classified = classify(result);

        let succeeded = matches!(classified, Classified::Completed(_));
        if !status.finish(succeeded) {
            // The monitor already recorded this resource as timed out
            tracing::debug!(
                consumer = status.id(),
                resource = %resource.id,
                "Returned after being abandoned; discarding result"
            );
            return;
        }

        if !record(ctx, status, &resource, classified) {
            break;
        }
    }

    tracing::debug!(consumer = status.id(), "Consumer exiting");
}

fn classify(result: thread::Result<Result<Extracted, ExtractError>>) -> Classified {
    match result {
        Ok(Ok(extracted)) => Classified::Completed(extracted),
        Ok(Err(ExtractError::NoRestart { detail, .. })) => Classified::NoRestart(detail),
        Ok(Err(ExtractError::Recoverable { detail, .. })) => Classified::Failed(detail),
        Ok(Err(err @ ExtractError::Cancelled { .. })) => Classified::Failed(err.to_string()),
        Err(payload) => Classified::Unexpected(panic_message(payload.as_ref())),
    }
}

/// Updates the sink and counters; returns false if the worker must stop
fn record(
    ctx: &SupervisorContext,
    status: &ConsumerStatus,
    resource: &Resource,
    classified: Classified,
) -> bool {
    let (state, detail) = match &classified {
        Classified::Completed(extracted) => (ResourceState::Completed, extracted.detail.clone()),
        Classified::Failed(detail) | Classified::NoRestart(detail) => {
            (ResourceState::Failed, Some(detail.clone()))
        }
        Classified::Unexpected(message) => {
            (ResourceState::Failed, Some(format!("panic: {}", message)))
        }
    };

    // Sink first: anything counted as settled is already recorded
    if let Err(e) = ctx.sink().mark_finished(&resource.id, state, detail.as_deref()) {
        tracing::warn!(resource = %resource.id, error = %e, "Failed to record outcome");
    }

    match classified {
        Classified::Completed(_) => {
            ctx.record_completed();
            tracing::debug!(consumer = status.id(), resource = %resource.id, "Completed");
            true
        }
        Classified::Failed(detail) => {
            ctx.record_failed(false);
            tracing::warn!(consumer = status.id(), resource = %resource.id, "Extraction failed: {}", detail);
            true
        }
        Classified::Unexpected(message) => {
            ctx.record_failed(true);
            tracing::error!(
                consumer = status.id(),
                resource = %resource.id,
                "Extractor panicked: {}",
                message
            );
            true
        }
        Classified::NoRestart(detail) => {
            ctx.record_failed(false);
            ctx.request_abort(
                BatchOutcome::CrashedNoRestart,
                format!("no-restart error on {}: {}", resource.id, detail),
            );
            false
        }
    }
}

/// Extracts a readable message from a panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

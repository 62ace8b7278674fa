//! Crawler: enumerates resources into the bounded queue

use crate::source::{Resource, ResourceSource};
use crate::state::ResourceState;
use crate::supervisor::consumer::panic_message;
use crate::supervisor::context::SupervisorContext;
use crate::supervisor::BatchOutcome;
use crate::BatchError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Starts the crawler thread
///
/// A panic inside the source is caught and turned into a restartable abort.
pub(crate) fn spawn_crawler(
    ctx: Arc<SupervisorContext>,
    source: Box<dyn ResourceSource>,
) -> Result<JoinHandle<()>, BatchError> {
    thread::Builder::new()
        .name("crawler".to_string())
        .spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| crawl(&ctx, source.as_ref())));
            if let Err(payload) = outcome {
                ctx.request_abort(
                    BatchOutcome::CrashedRestartable,
                    format!("crawler panicked: {}", panic_message(payload.as_ref())),
                );
            }
        })
        .map_err(|source| BatchError::ThreadSpawn {
            role: "crawler".to_string(),
            source,
        })
}

fn crawl(ctx: &SupervisorContext, source: &dyn ResourceSource) {
    tracing::info!("Enumerating resources from {}", source.describe());

    let entries = match source.scan() {
        Ok(entries) => entries,
        Err(e) => {
            ctx.request_abort(
                BatchOutcome::CrashedNoRestart,
                format!("cannot enumerate {}: {}", source.describe(), e),
            );
            return;
        }
    };

    for entry in entries {
        if !ctx.is_running() {
            tracing::info!("Pool stopped; crawler leaving remaining resources");
            return;
        }

        let resource = match entry {
            Ok(resource) => resource,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if !should_enqueue(ctx, &resource) {
            ctx.record_skipped();
            continue;
        }

        match ctx.queue().put(resource, || ctx.is_running()) {
            Ok(()) => ctx.record_enqueued(),
            Err(resource) => {
                tracing::debug!(resource = %resource.id, "Pool stopped while queue was full");
                return;
            }
        }
    }

    ctx.mark_crawler_exhausted();
    tracing::info!(
        enqueued = ctx.counts().enqueued,
        skipped = ctx.counts().skipped,
        "Crawler exhausted"
    );
}

/// Consults the sink checkpoint to decide whether a resource still needs work
///
/// Finished resources are skipped. A resource claimed `max_resource_attempts`
/// times without ever finishing most likely takes the process down with it, so
/// it is recorded abandoned and skipped from then on.
fn should_enqueue(ctx: &SupervisorContext, resource: &Resource) -> bool {
    let checkpoint = match ctx.sink().checkpoint(&resource.id) {
        Ok(checkpoint) => checkpoint,
        Err(e) => {
            // Reprocessing is acceptable; losing a resource is not
            tracing::warn!(resource = %resource.id, error = %e, "Checkpoint lookup failed");
            return true;
        }
    };

    match checkpoint {
        None => true,
        Some(checkpoint) if checkpoint.state.is_terminal() => false,
        Some(checkpoint) if checkpoint.attempts >= ctx.config().max_resource_attempts => {
            tracing::warn!(
                resource = %resource.id,
                attempts = checkpoint.attempts,
                "Resource never finished; abandoning"
            );
            let detail = format!(
                "claimed {} times without finishing",
                checkpoint.attempts
            );
            if let Err(e) =
                ctx.sink()
                    .mark_finished(&resource.id, ResourceState::Abandoned, Some(&detail))
            {
                tracing::warn!(resource = %resource.id, error = %e, "Failed to record abandonment");
            }
            false
        }
        Some(checkpoint) => {
            tracing::info!(
                resource = %resource.id,
                attempts = checkpoint.attempts,
                "Retrying resource left in flight by an earlier run"
            );
            true
        }
    }
}

//! Timeout monitor
//!
//! Runs on the calling thread, waking once per pulse. It is the only component
//! that decides the batch outcome:
//!
//! ```text
//! RUNNING --stop requested--> DRAINING --no active consumers--> DONE (INTERRUPTED)
//!    |                            |
//!    |--all work settled--> DONE (COMPLETE)
//!    |                            |
//!    +--abort cause---------------+--> ABORTING --> DONE (cause's outcome)
//! ```

use crate::interrupt::Interrupter;
use crate::state::{ConsumerState, ResourceState};
use crate::supervisor::consumer::ConsumerPool;
use crate::supervisor::context::SupervisorContext;
use crate::supervisor::{BatchOutcome, MonitorPhase};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

pub(crate) struct TimeoutMonitor<'a> {
    ctx: Arc<SupervisorContext>,
    pool: ConsumerPool,
    interrupter: &'a dyn Interrupter,
}

impl<'a> TimeoutMonitor<'a> {
    pub(crate) fn new(
        ctx: Arc<SupervisorContext>,
        pool: ConsumerPool,
        interrupter: &'a dyn Interrupter,
    ) -> Self {
        Self {
            ctx,
            pool,
            interrupter,
        }
    }

    /// Pulses until an outcome is reached; leaves the context in DONE
    pub(crate) fn run(&self) -> BatchOutcome {
        let pulse = self.ctx.config().timeout_check_pulse;
        loop {
            thread::sleep(pulse);
            if let Some(outcome) = self.step() {
                self.ctx.mark_done();
                tracing::info!(outcome = %outcome, "Monitor finished");
                return outcome;
            }
        }
    }

    /// One monitor iteration
    pub(crate) fn step(&self) -> Option<BatchOutcome> {
        if let Some(outcome) = self.aborted() {
            return Some(outcome);
        }

        // 1. operator stop
        if self.ctx.is_running() && self.interrupter.stop_requested() {
            if self.ctx.begin_drain() {
                tracing::warn!(
                    active = self.ctx.active_consumers(),
                    "Stop requested; draining in-flight work"
                );
            }
        }

        // 2. hung consumers
        self.detect_timeouts();

        // 3. too many hung consumers
        let timed_out = self.ctx.timed_out_count();
        let limit = self.ctx.config().max_timed_out_consumers;
        if timed_out > limit {
            self.ctx.request_abort(
                BatchOutcome::TimedOutProcess,
                format!("{} consumers timed out (limit {})", timed_out, limit),
            );
        }
        if let Some(outcome) = self.aborted() {
            return Some(outcome);
        }

        // 4. natural completion, or the end of a drain
        match self.ctx.phase() {
            MonitorPhase::Running if self.work_complete() => {
                thread::sleep(self.ctx.config().pause_on_early_termination);
                if self.ctx.is_running() && self.work_complete() {
                    return Some(BatchOutcome::Complete);
                }
                tracing::debug!("Completion not confirmed after pause");
            }
            MonitorPhase::Draining if self.ctx.active_consumers() == 0 => {
                return Some(BatchOutcome::Interrupted);
            }
            _ => {}
        }

        // 5. global watchdog
        if let Some(max_alive) = self.ctx.config().max_alive_time {
            let elapsed = self.ctx.elapsed();
            if elapsed > max_alive {
                self.ctx.request_abort(
                    BatchOutcome::TimedOutProcess,
                    format!(
                        "alive for {}s, longer than the {}s limit",
                        elapsed.as_secs(),
                        max_alive.as_secs()
                    ),
                );
            }
        }

        self.aborted()
    }

    fn aborted(&self) -> Option<BatchOutcome> {
        if self.ctx.phase() != MonitorPhase::Aborting {
            return None;
        }
        // A cause is always recorded before the phase flips
        Some(
            self.ctx
                .abort_cause()
                .map(|cause| cause.outcome)
                .unwrap_or(BatchOutcome::CrashedRestartable),
        )
    }

    fn work_complete(&self) -> bool {
        self.ctx.crawler_exhausted()
            && self.ctx.queue().is_empty()
            && self.ctx.all_settled()
            && self
                .ctx
                .statuses()
                .iter()
                .filter(|s| s.state().is_live())
                .all(|s| s.state() == ConsumerState::Idle)
    }

    fn detect_timeouts(&self) {
        let now = Instant::now();
        let threshold = self.ctx.config().timeout_threshold;

        for status in self.ctx.statuses() {
            if status.state() != ConsumerState::Active || status.heartbeat_age(now) <= threshold {
                continue;
            }
            // Lost the race: the worker returned on its own
            if !status.mark_timed_out() {
                continue;
            }

            let total = self.ctx.record_timed_out();
            let resource = status.current_resource();
            tracing::warn!(
                consumer = status.id(),
                resource = resource.as_deref().unwrap_or("-"),
                timed_out = total,
                "Consumer exceeded {}ms without a heartbeat; abandoning it",
                threshold.as_millis()
            );

            if let Some(resource_id) = resource {
                let detail = format!("no heartbeat for {}ms", threshold.as_millis());
                if let Err(e) =
                    self.ctx
                        .sink()
                        .mark_finished(&resource_id, ResourceState::TimedOut, Some(&detail))
                {
                    tracing::warn!(resource = %resource_id, error = %e, "Failed to record timeout");
                }
            }

            // A draining pool admits no new work
            if self.ctx.is_running() {
                if let Err(e) = self.pool.spawn_worker() {
                    self.ctx.request_abort(
                        BatchOutcome::CrashedRestartable,
                        format!("cannot replace timed-out consumer: {}", e),
                    );
                }
            }
        }
    }
}

use crate::relaunch::{interpret_exit, IncarnationEnd, LaunchSpec, RelaunchPolicy};
use crate::supervisor::BatchOutcome;
use crate::BatchError;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Why the loop stopped launching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The last incarnation ended with a terminal outcome
    Finished,
    RestartLimit,
    TimeLimit,
    /// The operator interrupted the loop itself
    OperatorStop,
}

#[derive(Debug, Clone)]
pub struct IncarnationRecord {
    pub number: u32,
    pub end: IncarnationEnd,
    pub elapsed: Duration,
}

/// Result of a full relaunch loop
#[derive(Debug, Clone)]
pub struct RelaunchSummary {
    pub incarnations: Vec<IncarnationRecord>,
    pub stop_reason: StopReason,
    pub elapsed: Duration,
}

impl RelaunchSummary {
    /// Outcome of the last incarnation
    pub fn final_outcome(&self) -> BatchOutcome {
        self.incarnations
            .last()
            .map(|record| record.end.outcome())
            .unwrap_or(BatchOutcome::CrashedRestartable)
    }

    pub fn restarts(&self) -> usize {
        self.incarnations.len().saturating_sub(1)
    }
}

/// Launches incarnations until one ends terminally or a cap is hit
pub struct RelaunchLoop {
    spec: LaunchSpec,
    policy: RelaunchPolicy,
}

impl RelaunchLoop {
    pub fn new(spec: LaunchSpec, policy: RelaunchPolicy) -> Self {
        Self { spec, policy }
    }

    /// Runs the loop, treating Ctrl-C as an operator stop
    ///
    /// The child shares the terminal's process group, so it receives the same
    /// signal and drains on its own; the loop only declines to relaunch.
    pub async fn run(&self) -> Result<RelaunchSummary, BatchError> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let listener = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received; no further incarnations will be launched");
                let _ = stop_tx.send(true);
            }
        });

        let result = self.run_until(stop_rx).await;
        listener.abort();
        result
    }

    /// Runs the loop until `stop` turns true
    pub async fn run_until(&self, mut stop: watch::Receiver<bool>) -> Result<RelaunchSummary, BatchError> {
        let started = Instant::now();
        let mut incarnations = Vec::new();
        let mut number: u32 = 0;

        let stop_reason = loop {
            let incarnation_started = Instant::now();
            tracing::info!(
                incarnation = number,
                program = %self.spec.program.display(),
                "Launching incarnation"
            );

            let end = self.run_incarnation(number, &mut stop).await?;
            let outcome = end.outcome();
            let elapsed = incarnation_started.elapsed();

            if outcome.should_relaunch() {
                tracing::warn!(incarnation = number, outcome = %outcome, "Incarnation ended: {}", end.describe());
            } else {
                tracing::info!(incarnation = number, outcome = %outcome, "Incarnation ended: {}", end.describe());
            }
            incarnations.push(IncarnationRecord {
                number,
                end,
                elapsed,
            });

            if *stop.borrow() {
                break StopReason::OperatorStop;
            }
            if !outcome.should_relaunch() {
                break StopReason::Finished;
            }
            if number >= self.policy.max_restarts {
                tracing::error!(
                    restarts = number,
                    "Restart limit reached; giving up"
                );
                break StopReason::RestartLimit;
            }
            if let Some(max_total) = self.policy.max_total {
                if started.elapsed() >= max_total {
                    tracing::error!("Total time budget of {}s spent; giving up", max_total.as_secs());
                    break StopReason::TimeLimit;
                }
            }

            if !self.policy.restart_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.policy.restart_delay) => {}
                    _ = wait_for_stop(&mut stop) => break StopReason::OperatorStop,
                }
            }
            number += 1;
        };

        Ok(RelaunchSummary {
            incarnations,
            stop_reason,
            elapsed: started.elapsed(),
        })
    }

    async fn run_incarnation(
        &self,
        number: u32,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<IncarnationEnd, BatchError> {
        let mut child = self.spec.command(number).spawn().map_err(|e| {
            BatchError::Relaunch(format!(
                "cannot start {}: {}",
                self.spec.program.display(),
                e
            ))
        })?;

        let kill_timer = async {
            match self.policy.kill_after {
                Some(deadline) => tokio::time::sleep(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(kill_timer);

        let mut stop_seen = *stop.borrow();
        loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status?;
                    return Ok(interpret_exit(status));
                }
                _ = &mut kill_timer => {
                    tracing::error!(
                        incarnation = number,
                        "Child outlived its deadline; killing it"
                    );
                    child.kill().await?;
                    return Ok(IncarnationEnd::Killed);
                }
                _ = wait_for_stop(stop), if !stop_seen => {
                    stop_seen = true;
                    tracing::info!(incarnation = number, "Waiting for the child to drain");
                }
            }
        }
    }
}

/// Resolves once the stop flag is true; never resolves if the sender is gone
async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

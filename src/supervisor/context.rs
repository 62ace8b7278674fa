//! State shared by every supervisor thread for one incarnation

use crate::config::SupervisorConfig;
use crate::report::StatusSnapshot;
use crate::state::{ConsumerState, ConsumerStatus};
use crate::storage::ResultSink;
use crate::supervisor::queue::ResourceQueue;
use crate::supervisor::{BatchOutcome, MonitorPhase};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why the pool was forced into ABORTING
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortCause {
    pub outcome: BatchOutcome,
    pub reason: String,
}

/// Running totals for one incarnation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    /// Resources handed to the queue
    pub enqueued: u64,
    /// Resources the crawler skipped because an earlier run finished them
    pub skipped: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Failures caused by a panic inside the extractor (also counted in `failed`)
    pub unexpected: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    skipped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    unexpected: AtomicU64,
    /// Enqueued resources that reached an outcome (completed, failed or timed out)
    settled: AtomicU64,
}

/// Per-incarnation context, `Arc`-shared with the crawler, consumers and reporter
pub struct SupervisorContext {
    config: SupervisorConfig,
    started: Instant,
    run_id: i64,
    queue: ResourceQueue,
    sink: Arc<dyn ResultSink>,
    phase: AtomicU8,
    abort: Mutex<Option<AbortCause>>,
    crawler_exhausted: AtomicBool,
    statuses: RwLock<Vec<Arc<ConsumerStatus>>>,
    next_consumer_id: AtomicUsize,
    counters: Counters,
}

impl SupervisorContext {
    pub fn new(config: SupervisorConfig, run_id: i64, sink: Arc<dyn ResultSink>) -> Self {
        let queue = ResourceQueue::new(config.max_queue_size);
        Self {
            config,
            started: Instant::now(),
            run_id,
            queue,
            sink,
            phase: AtomicU8::new(MonitorPhase::Running.as_u8()),
            abort: Mutex::new(None),
            crawler_exhausted: AtomicBool::new(false),
            statuses: RwLock::new(Vec::new()),
            next_consumer_id: AtomicUsize::new(0),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn queue(&self) -> &ResourceQueue {
        &self.queue
    }

    pub fn sink(&self) -> &dyn ResultSink {
        self.sink.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    // ===== Phase =====

    pub fn phase(&self) -> MonitorPhase {
        MonitorPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// True while new work may be enumerated and claimed
    pub fn is_running(&self) -> bool {
        self.phase() == MonitorPhase::Running
    }

    /// RUNNING -> DRAINING; returns false if the pool already left RUNNING
    pub(crate) fn begin_drain(&self) -> bool {
        self.transition(MonitorPhase::Running, MonitorPhase::Draining)
    }

    pub(crate) fn mark_done(&self) {
        self.phase.store(MonitorPhase::Done.as_u8(), Ordering::SeqCst);
    }

    fn transition(&self, from: MonitorPhase, to: MonitorPhase) -> bool {
        self.phase
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Records an abort cause and switches the pool to ABORTING
    ///
    /// The first cause wins; later ones are logged and dropped. Returns true if
    /// this call's cause was recorded.
    pub fn request_abort(&self, outcome: BatchOutcome, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let recorded = {
            let mut slot = self.abort.lock();
            if slot.is_some() {
                false
            } else {
                *slot = Some(AbortCause {
                    outcome,
                    reason: reason.clone(),
                });
                true
            }
        };

        if recorded {
            tracing::error!(outcome = %outcome, "Aborting batch: {}", reason);
            // Never overwrite DONE
            let _ = self.transition(MonitorPhase::Running, MonitorPhase::Aborting)
                || self.transition(MonitorPhase::Draining, MonitorPhase::Aborting);
        } else {
            tracing::debug!(outcome = %outcome, "Abort already requested; ignoring: {}", reason);
        }
        recorded
    }

    pub fn abort_cause(&self) -> Option<AbortCause> {
        self.abort.lock().clone()
    }

    // ===== Crawler =====

    pub fn crawler_exhausted(&self) -> bool {
        self.crawler_exhausted.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_crawler_exhausted(&self) {
        self.crawler_exhausted.store(true, Ordering::SeqCst);
    }

    // ===== Consumers =====

    /// Creates and registers a status record for a new worker
    pub(crate) fn register_consumer(&self) -> Arc<ConsumerStatus> {
        let id = self.next_consumer_id.fetch_add(1, Ordering::SeqCst);
        let status = Arc::new(ConsumerStatus::new(id, self.started));
        self.statuses.write().push(Arc::clone(&status));
        status
    }

    /// Every status record ever registered, in registration order
    pub fn statuses(&self) -> Vec<Arc<ConsumerStatus>> {
        self.statuses.read().clone()
    }

    pub fn live_consumers(&self) -> usize {
        self.statuses
            .read()
            .iter()
            .filter(|s| s.state().is_live())
            .count()
    }

    pub fn active_consumers(&self) -> usize {
        self.statuses
            .read()
            .iter()
            .filter(|s| s.state() == ConsumerState::Active)
            .count()
    }

    // ===== Counters =====

    pub(crate) fn record_enqueued(&self) {
        self.counters.enqueued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_skipped(&self) {
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        self.counters.settled.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_failed(&self, unexpected: bool) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        if unexpected {
            self.counters.unexpected.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.settled.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the new timed-out total
    pub(crate) fn record_timed_out(&self) -> u64 {
        self.counters.settled.fetch_add(1, Ordering::SeqCst);
        self.counters.timed_out.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn timed_out_count(&self) -> u64 {
        self.counters.timed_out.load(Ordering::SeqCst)
    }

    /// True when every enqueued resource has reached an outcome
    ///
    /// Covers the window in which a worker has taken a resource off the queue
    /// but not yet marked itself active.
    pub(crate) fn all_settled(&self) -> bool {
        self.counters.settled.load(Ordering::SeqCst) >= self.counters.enqueued.load(Ordering::SeqCst)
    }

    pub fn counts(&self) -> BatchCounts {
        BatchCounts {
            enqueued: self.counters.enqueued.load(Ordering::SeqCst),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::SeqCst),
            unexpected: self.counters.unexpected.load(Ordering::Relaxed),
        }
    }

    /// Read-only view for status reporters
    pub fn snapshot(&self) -> StatusSnapshot {
        let now = Instant::now();
        let counts = self.counts();
        StatusSnapshot {
            taken_at: Utc::now(),
            phase: self.phase(),
            elapsed_millis: self.elapsed().as_millis() as u64,
            queue_depth: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            crawler_exhausted: self.crawler_exhausted(),
            enqueued: counts.enqueued,
            skipped: counts.skipped,
            completed: counts.completed,
            failed: counts.failed,
            timed_out: counts.timed_out,
            unexpected: counts.unexpected,
            consumers: self.statuses().iter().map(|s| s.snapshot(now)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySink;

    fn context() -> SupervisorContext {
        SupervisorContext::new(SupervisorConfig::default(), 1, Arc::new(MemorySink::new()))
    }

    #[test]
    fn test_first_abort_cause_wins() {
        let ctx = context();
        assert!(ctx.request_abort(BatchOutcome::CrashedNoRestart, "disk gone"));
        assert!(!ctx.request_abort(BatchOutcome::TimedOutProcess, "too many hangs"));

        let cause = ctx.abort_cause().unwrap();
        assert_eq!(cause.outcome, BatchOutcome::CrashedNoRestart);
        assert_eq!(cause.reason, "disk gone");
        assert_eq!(ctx.phase(), MonitorPhase::Aborting);
    }

    #[test]
    fn test_abort_from_draining() {
        let ctx = context();
        assert!(ctx.begin_drain());
        assert!(!ctx.begin_drain());
        ctx.request_abort(BatchOutcome::TimedOutProcess, "watchdog");
        assert_eq!(ctx.phase(), MonitorPhase::Aborting);
    }

    #[test]
    fn test_abort_never_overwrites_done() {
        let ctx = context();
        ctx.mark_done();
        ctx.request_abort(BatchOutcome::CrashedRestartable, "late panic");
        assert_eq!(ctx.phase(), MonitorPhase::Done);
    }

    #[test]
    fn test_settled_accounting() {
        let ctx = context();
        assert!(ctx.all_settled());

        ctx.record_enqueued();
        ctx.record_enqueued();
        ctx.record_enqueued();
        assert!(!ctx.all_settled());

        ctx.record_completed();
        ctx.record_failed(true);
        assert_eq!(ctx.record_timed_out(), 1);
        assert!(ctx.all_settled());

        let counts = ctx.counts();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.unexpected, 1);
        assert_eq!(counts.timed_out, 1);
    }

    #[test]
    fn test_snapshot_lists_consumers() {
        let ctx = context();
        let first = ctx.register_consumer();
        let second = ctx.register_consumer();
        first.begin("a.pdf");

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.consumers.len(), 2);
        assert_eq!(snapshot.consumers[0].id, first.id());
        assert_eq!(snapshot.consumers[1].id, second.id());
        assert_eq!(snapshot.active_consumers(), 1);
        assert_eq!(ctx.live_consumers(), 2);
        assert_eq!(ctx.active_consumers(), 1);
    }
}

//! Batch processing supervisor
//!
//! One [`Supervisor::run`] call is one process incarnation: a crawler thread
//! feeds a bounded queue, a fixed pool of consumer threads drains it through
//! the extractor, a reporter thread publishes snapshots, and the timeout
//! monitor on the calling thread decides the [`BatchOutcome`].

mod consumer;
mod context;
mod crawler;
mod monitor;
mod outcome;
mod queue;

pub use context::{AbortCause, BatchCounts, SupervisorContext};
pub use outcome::{BatchOutcome, MonitorPhase};
pub use queue::ResourceQueue;

use crate::config::{Config, SupervisorConfig};
use crate::extract::{build_extractor, Extractor};
use crate::interrupt::{build_interrupter, Interrupter, NeverInterrupt};
use crate::report::{build_reporter, report_safely, StatusReporter};
use crate::source::{build_source, ResourceSource};
use crate::storage::ResultSink;
use crate::BatchError;
use consumer::ConsumerPool;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use monitor::TimeoutMonitor;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Summary of a finished incarnation
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcome: BatchOutcome,
    pub run_id: i64,
    pub counts: BatchCounts,
    pub elapsed: Duration,
}

/// Wires the collaborators together and runs one incarnation
pub struct Supervisor {
    config: SupervisorConfig,
    source: Box<dyn ResourceSource>,
    extractor: Arc<dyn Extractor>,
    sink: Arc<dyn ResultSink>,
    interrupter: Box<dyn Interrupter>,
    reporter: Option<Box<dyn StatusReporter>>,
    config_hash: String,
    incarnation: u32,
}

impl Supervisor {
    /// Creates a supervisor that is never interrupted and reports nothing
    pub fn new(
        config: SupervisorConfig,
        source: Box<dyn ResourceSource>,
        extractor: Arc<dyn Extractor>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            config,
            source,
            extractor,
            sink,
            interrupter: Box::new(NeverInterrupt),
            reporter: None,
            config_hash: String::new(),
            incarnation: 0,
        }
    }

    /// Builds every collaborator named in the configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Loaded and validated configuration
    /// * `sink` - Result sink shared by the crawler, consumers and monitor
    ///
    /// # Returns
    ///
    /// * `Ok(Supervisor)` - Ready to [`run`](Self::run)
    /// * `Err(BatchError::Signal)` - The signal interrupter could not be installed
    pub fn from_config(config: &Config, sink: Arc<dyn ResultSink>) -> Result<Self, BatchError> {
        let mut supervisor = Self::new(
            config.supervisor(),
            build_source(&config.source),
            build_extractor(&config.extractor),
            sink,
        )
        .with_interrupter(build_interrupter(&config.interrupter)?);

        if let Some(reporter) = build_reporter(&config.reporter) {
            supervisor = supervisor.with_reporter(reporter);
        }
        Ok(supervisor)
    }

    pub fn with_interrupter(mut self, interrupter: Box<dyn Interrupter>) -> Self {
        self.interrupter = interrupter;
        self
    }

    pub fn with_reporter(mut self, reporter: Box<dyn StatusReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Tags the run record with the launching configuration and incarnation
    pub fn with_run_identity(mut self, config_hash: impl Into<String>, incarnation: u32) -> Self {
        self.config_hash = config_hash.into();
        self.incarnation = incarnation;
        self
    }

    /// Runs until the monitor reaches an outcome
    ///
    /// Consumer and crawler threads are not joined: an abandoned consumer may
    /// still be blocked in the extractor when this returns.
    ///
    /// # Returns
    ///
    /// * `Ok(BatchReport)` - The outcome and counters of this incarnation; the
    ///   caller exits with `report.outcome.exit_code()`
    /// * `Err(BatchError)` - The run record or a worker thread could not be created
    ///
    /// # Example
    ///
    /// ```no_run
    /// use batchward::config::load_config;
    /// use batchward::storage::open_storage;
    /// use batchward::Supervisor;
    /// use std::path::Path;
    /// use std::sync::Arc;
    ///
    /// let config = load_config(Path::new("batch.toml")).unwrap();
    /// let sink = open_storage(Path::new(&config.output.database_path)).unwrap();
    /// let report = Supervisor::from_config(&config, Arc::new(sink))
    ///     .unwrap()
    ///     .run()
    ///     .unwrap();
    /// std::process::exit(report.outcome.exit_code());
    /// ```
    pub fn run(self) -> Result<BatchReport, BatchError> {
        let Self {
            config,
            source,
            extractor,
            sink,
            interrupter,
            reporter,
            config_hash,
            incarnation,
        } = self;

        let run_id = sink.begin_run(&config_hash, incarnation)?;
        tracing::info!(
            run_id,
            incarnation,
            consumers = config.num_consumers,
            queue = config.max_queue_size,
            "Starting batch"
        );

        let report_interval = config.status_report_interval;
        let ctx = Arc::new(SupervisorContext::new(config, run_id, Arc::clone(&sink)));
        let pool = ConsumerPool::new(Arc::clone(&ctx), extractor);

        // Threads already started exit once the phase leaves RUNNING
        let started = pool
            .start()
            .and_then(|()| crawler::spawn_crawler(Arc::clone(&ctx), source));
        if let Err(e) = started {
            ctx.mark_done();
            return Err(e);
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let reporter_handle = match reporter {
            Some(reporter) => {
                match spawn_reporter(Arc::clone(&ctx), reporter, report_interval, stop_rx) {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        ctx.mark_done();
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        let outcome = TimeoutMonitor::new(Arc::clone(&ctx), pool, interrupter.as_ref()).run();

        drop(stop_tx);
        if let Some(handle) = reporter_handle {
            let _ = handle.join();
        }

        if let Err(e) = sink.finish_run(run_id, outcome) {
            tracing::warn!(run_id, error = %e, "Failed to record run outcome");
        }

        let report = BatchReport {
            outcome,
            run_id,
            counts: ctx.counts(),
            elapsed: ctx.elapsed(),
        };
        tracing::info!(
            outcome = %report.outcome,
            completed = report.counts.completed,
            failed = report.counts.failed,
            timed_out = report.counts.timed_out,
            skipped = report.counts.skipped,
            "Batch finished in {:.1}s",
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }
}

/// Publishes a snapshot every `interval` and once more when stopped
fn spawn_reporter(
    ctx: Arc<SupervisorContext>,
    mut reporter: Box<dyn StatusReporter>,
    interval: Duration,
    stop: Receiver<()>,
) -> Result<JoinHandle<()>, BatchError> {
    thread::Builder::new()
        .name("status-reporter".to_string())
        .spawn(move || {
            loop {
                match stop.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        report_safely(reporter.as_mut(), &ctx.snapshot());
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            report_safely(reporter.as_mut(), &ctx.snapshot());
        })
        .map_err(|source| BatchError::ThreadSpawn {
            role: "status-reporter".to_string(),
            source,
        })
}

//! End-to-end supervisor runs

use batchward::config::{load_config, SupervisorConfig};
use batchward::extract::{CancelSignal, ExtractError, Extracted, Extractor};
use batchward::interrupt::FlagInterrupter;
use batchward::report::{JsonFileReporter, ReportError, StatusReporter, StatusSnapshot};
use batchward::source::{Resource, StaticSource};
use batchward::storage::{MemorySink, ResultSink, RunStatus, SqliteSink};
use batchward::{BatchOutcome, ResourceState, Supervisor};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Behaves according to the resource id prefix
///
/// `ok` succeeds, `slow` succeeds after a few milliseconds, `fail` fails
/// recoverably, `fatal` fails with a no-restart error, `panic` panics and
/// `hang` blocks until cancelled.
struct Scripted;

impl Extractor for Scripted {
    fn extract(&self, resource: &Resource, cancel: &CancelSignal) -> Result<Extracted, ExtractError> {
        let id = resource.id.as_str();
        if id.starts_with("slow") {
            thread::sleep(Duration::from_millis(5));
        } else if id.starts_with("fail") {
            return Err(ExtractError::recoverable(resource, "unparseable"));
        } else if id.starts_with("fatal") {
            return Err(ExtractError::no_restart(resource, "output volume is read-only"));
        } else if id.starts_with("panic") {
            panic!("extractor bug on {}", id);
        } else if id.starts_with("hang") {
            while !cancel.is_raised() {
                thread::sleep(Duration::from_millis(5));
            }
            return Err(ExtractError::Cancelled {
                resource: resource.id.clone(),
            });
        }
        Ok(Extracted::with_detail(format!("processed {}", id)))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Records the highest number of extractions in flight at once
#[derive(Default)]
struct Counting {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Extractor for Counting {
    fn extract(&self, _resource: &Resource, _cancel: &CancelSignal) -> Result<Extracted, ExtractError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Extracted::default())
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

fn fast_config(num_consumers: usize, max_queue_size: usize) -> SupervisorConfig {
    SupervisorConfig {
        num_consumers,
        max_queue_size,
        timeout_threshold: Duration::from_millis(200),
        timeout_check_pulse: Duration::from_millis(20),
        max_timed_out_consumers: 10,
        max_alive_time: None,
        pause_on_early_termination: Duration::from_millis(20),
        status_report_interval: Duration::from_millis(10),
        ..SupervisorConfig::default()
    }
}

fn resources(ids: &[&str]) -> Vec<Resource> {
    ids.iter()
        .map(|id| Resource::new(*id, format!("/corpus/{}", id)))
        .collect()
}

fn supervisor(config: SupervisorConfig, ids: &[&str], sink: Arc<dyn ResultSink>) -> Supervisor {
    Supervisor::new(
        config,
        Box::new(StaticSource::new(resources(ids))),
        Arc::new(Scripted),
        sink,
    )
}

/// Keeps queue depth readings from every snapshot
struct QueueDepths(Arc<Mutex<Vec<(usize, usize)>>>);

impl StatusReporter for QueueDepths {
    fn report(&mut self, snapshot: &StatusSnapshot) -> Result<(), ReportError> {
        self.0
            .lock()
            .push((snapshot.queue_depth, snapshot.queue_capacity));
        Ok(())
    }
}

#[test]
fn test_all_resources_succeed() {
    let sink = Arc::new(MemorySink::new());
    let ids = ["ok-1", "ok-2", "ok-3", "ok-4", "ok-5"];

    let report = supervisor(fast_config(2, 10), &ids, sink.clone())
        .run()
        .unwrap();

    assert_eq!(report.outcome, BatchOutcome::Complete);
    assert_eq!(report.counts.completed, 5);
    assert_eq!(report.counts.timed_out, 0);
    assert_eq!(sink.count_by_state(ResourceState::Completed).unwrap(), 5);

    let record = sink.get_resource("ok-3").unwrap().unwrap();
    assert_eq!(record.detail.as_deref(), Some("processed ok-3"));
    assert_eq!(record.attempts, 1);
}

#[test]
fn test_hung_resource_times_out_the_process() {
    let config = SupervisorConfig {
        max_timed_out_consumers: 0,
        ..fast_config(2, 10)
    };
    // Detected on the first pulse past the threshold, allowing for scheduling
    let bound = config.timeout_threshold + config.timeout_check_pulse * 10;
    let sink = Arc::new(MemorySink::new());

    let started = Instant::now();
    let report = supervisor(config, &["hang-1", "ok-1"], sink.clone())
        .run()
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.outcome, BatchOutcome::TimedOutProcess);
    assert_eq!(report.counts.timed_out, 1);
    assert!(elapsed >= Duration::from_millis(200), "{:?}", elapsed);
    assert!(elapsed < bound, "{:?} not under {:?}", elapsed, bound);
    assert_eq!(
        sink.get_resource("hang-1").unwrap().unwrap().state,
        ResourceState::TimedOut
    );
}

#[test]
fn test_no_restart_error_stops_before_remaining_work() {
    let sink = Arc::new(MemorySink::new());

    let report = supervisor(
        fast_config(1, 10),
        &["fatal-1", "ok-1", "ok-2", "ok-3"],
        sink.clone(),
    )
    .run()
    .unwrap();

    assert_eq!(report.outcome, BatchOutcome::CrashedNoRestart);
    assert_eq!(
        sink.get_resource("fatal-1").unwrap().unwrap().state,
        ResourceState::Failed
    );
    for id in ["ok-1", "ok-2", "ok-3"] {
        assert!(sink.get_resource(id).unwrap().is_none(), "{} was claimed", id);
    }
}

#[test]
fn test_recoverable_failures_and_panics_do_not_stop_the_batch() {
    let sink = Arc::new(MemorySink::new());

    let report = supervisor(
        fast_config(2, 10),
        &["ok-1", "fail-1", "panic-1", "ok-2"],
        sink.clone(),
    )
    .run()
    .unwrap();

    assert_eq!(report.outcome, BatchOutcome::Complete);
    assert_eq!(report.counts.completed, 2);
    assert_eq!(report.counts.failed, 2);
    assert_eq!(report.counts.unexpected, 1);

    let panicked = sink.get_resource("panic-1").unwrap().unwrap();
    assert_eq!(panicked.state, ResourceState::Failed);
    assert!(panicked.detail.unwrap().contains("extractor bug"));
}

#[test]
fn test_hung_consumer_is_replaced_and_batch_completes() {
    let sink = Arc::new(MemorySink::new());

    let report = supervisor(fast_config(1, 10), &["hang-1", "ok-1", "ok-2"], sink.clone())
        .run()
        .unwrap();

    assert_eq!(report.outcome, BatchOutcome::Complete);
    assert_eq!(report.counts.timed_out, 1);
    assert_eq!(report.counts.completed, 2);
}

#[test]
fn test_stop_request_drains_to_interrupted() {
    let ids: Vec<String> = (0..50).map(|i| format!("slow-{}", i)).collect();
    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    let interrupter = FlagInterrupter::new();
    interrupter.request_stop();

    let report = supervisor(fast_config(2, 5), &ids, Arc::new(MemorySink::new()))
        .with_interrupter(Box::new(interrupter))
        .run()
        .unwrap();

    assert_eq!(report.outcome, BatchOutcome::Interrupted);
    assert!(report.counts.completed < 50);
}

#[test]
fn test_watchdog_ends_a_stuck_incarnation() {
    let config = SupervisorConfig {
        timeout_threshold: Duration::from_secs(60),
        max_alive_time: Some(Duration::from_millis(150)),
        ..fast_config(1, 10)
    };

    let started = Instant::now();
    let report = supervisor(config, &["hang-1"], Arc::new(MemorySink::new()))
        .run()
        .unwrap();

    assert_eq!(report.outcome, BatchOutcome::TimedOutProcess);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_queue_never_exceeds_capacity() {
    let ids: Vec<String> = (0..40).map(|i| format!("slow-{}", i)).collect();
    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    let depths = Arc::new(Mutex::new(Vec::new()));

    let report = supervisor(fast_config(2, 3), &ids, Arc::new(MemorySink::new()))
        .with_reporter(Box::new(QueueDepths(Arc::clone(&depths))))
        .run()
        .unwrap();

    assert_eq!(report.outcome, BatchOutcome::Complete);
    assert_eq!(report.counts.completed, 40);

    let depths = depths.lock();
    assert!(!depths.is_empty());
    assert!(depths.iter().all(|(depth, capacity)| depth <= capacity && *capacity == 3));
}

#[test]
fn test_second_run_resumes_from_sqlite() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("batch.db");

    let sink = Arc::new(SqliteSink::open(&db).unwrap());
    let first = supervisor(fast_config(2, 10), &["ok-a", "ok-b", "fail-c"], sink)
        .with_run_identity("hash-1", 0)
        .run()
        .unwrap();
    assert_eq!(first.outcome, BatchOutcome::Complete);

    // Reopen, as a new incarnation would
    let sink = Arc::new(SqliteSink::open(&db).unwrap());
    let second = supervisor(
        fast_config(2, 10),
        &["ok-a", "ok-b", "fail-c", "ok-d"],
        sink.clone(),
    )
    .with_run_identity("hash-1", 1)
    .run()
    .unwrap();

    assert_eq!(second.outcome, BatchOutcome::Complete);
    assert_eq!(second.counts.skipped, 3);
    assert_eq!(second.counts.enqueued, 1);
    assert_eq!(second.counts.completed, 1);

    let runs = sink.list_runs().unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs
        .iter()
        .all(|run| run.status == RunStatus::Finished(BatchOutcome::Complete)));
    assert!(runs.iter().any(|run| run.incarnation == 1));
}

#[test]
fn test_json_reporter_leaves_final_snapshot() {
    let dir = TempDir::new().unwrap();
    let status_path = dir.path().join("status.json");

    let report = supervisor(fast_config(2, 10), &["ok-1", "ok-2", "ok-3"], Arc::new(MemorySink::new()))
        .with_reporter(Box::new(JsonFileReporter::new(status_path.clone())))
        .run()
        .unwrap();
    assert_eq!(report.outcome, BatchOutcome::Complete);

    let body = std::fs::read_to_string(&status_path).unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(snapshot["phase"], "done");
    assert_eq!(snapshot["completed"], 3);
    assert_eq!(snapshot["crawler_exhausted"], true);
}

#[test]
fn test_configured_filesystem_digest_batch() {
    let dir = TempDir::new().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir_all(corpus.join("nested")).unwrap();
    std::fs::write(corpus.join("a.txt"), b"abc").unwrap();
    std::fs::write(corpus.join("nested/b.txt"), b"hello").unwrap();
    std::fs::write(corpus.join("skip.bin"), b"\x00\x01").unwrap();

    let db = dir.path().join("batch.db");
    let config_path = dir.path().join("batch.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[supervisor]
num-consumers = 2
timeout-check-pulse-millis = 20
pause-on-early-termination-millis = 20

[source]
kind = "filesystem"
root = "{}"
extensions = ["txt"]

[extractor]
kind = "digest"

[reporter]
kind = "none"

[interrupter]
kind = "none"

[output]
database-path = "{}"
"#,
            corpus.display(),
            db.display()
        ),
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    let sink = Arc::new(SqliteSink::open(&db).unwrap());
    let report = Supervisor::from_config(&config, sink.clone())
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(report.outcome, BatchOutcome::Complete);
    assert_eq!(report.counts.completed, 2);

    let record = sink.get_resource("a.txt").unwrap().unwrap();
    assert_eq!(
        record.detail.as_deref(),
        Some("sha256=ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad bytes=3")
    );
    assert!(sink.get_resource("nested/b.txt").unwrap().is_some());
    assert!(sink.get_resource("skip.bin").unwrap().is_none());
}

#[test]
fn test_active_consumers_never_exceed_pool_size() {
    let ids: Vec<String> = (0..60).map(|i| format!("r-{}", i)).collect();
    let extractor = Arc::new(Counting::default());

    let report = Supervisor::new(
        fast_config(3, 4),
        Box::new(StaticSource::new(resources(
            &ids.iter().map(String::as_str).collect::<Vec<_>>(),
        ))),
        extractor.clone(),
        Arc::new(MemorySink::new()),
    )
    .run()
    .unwrap();

    assert_eq!(report.outcome, BatchOutcome::Complete);
    assert_eq!(report.counts.completed, 60);
    let peak = extractor.peak.load(Ordering::SeqCst);
    assert!((1..=3).contains(&peak), "peak {}", peak);
}

#[test]
fn test_completion_waits_for_grace_pause() {
    let config = SupervisorConfig {
        pause_on_early_termination: Duration::from_millis(300),
        ..fast_config(2, 10)
    };

    let started = Instant::now();
    let report = supervisor(config, &["ok-1", "ok-2", "ok-3"], Arc::new(MemorySink::new()))
        .run()
        .unwrap();

    assert_eq!(report.outcome, BatchOutcome::Complete);
    assert!(
        started.elapsed() >= Duration::from_millis(300),
        "{:?}",
        started.elapsed()
    );
}

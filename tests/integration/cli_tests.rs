//! The compiled binary, end to end

use batchward::config::compute_config_hash;
use batchward::storage::{ResultSink, RunStatus, SqliteSink};
use batchward::{BatchOutcome, ResourceState};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn batchward(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_batchward"))
        .args(args)
        .env("RUST_LOG", "error")
        .output()
        .unwrap()
}

/// Writes a three-file corpus and a config that digests it
fn setup_batch(dir: &Path) -> (PathBuf, PathBuf) {
    let corpus = dir.join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    for (name, body) in [("one.txt", "1"), ("two.txt", "22"), ("three.txt", "333")] {
        std::fs::write(corpus.join(name), body).unwrap();
    }

    let db = dir.join("batch.db");
    let config_path = dir.join("batch.toml");
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

[reporter]
kind = "none"

[interrupter]
kind = "none"

[output]
database-path = "{}"

[relaunch]
max-restarts = 2
restart-delay-millis = 0
"#,
            corpus.display(),
            db.display()
        ),
    )
    .unwrap();

    (config_path, db)
}

#[test]
fn test_check_prints_resolved_settings() {
    let dir = TempDir::new().unwrap();
    let (config_path, _db) = setup_batch(dir.path());

    let output = batchward(&["check", "--config", config_path.to_str().unwrap()]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Consumers: 2"));
    assert!(stdout.contains("Max restarts: 2"));
    assert!(stdout.contains("Configuration is valid"));
}

#[test]
fn test_run_exits_with_outcome_code_and_records_results() {
    let dir = TempDir::new().unwrap();
    let (config_path, db) = setup_batch(dir.path());

    let output = batchward(&["run", "--config", config_path.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(BatchOutcome::Complete.exit_code()));
    let sink = SqliteSink::open(&db).unwrap();
    assert_eq!(sink.count_by_state(ResourceState::Completed).unwrap(), 3);

    let stats = batchward(&["stats", "--config", config_path.to_str().unwrap()]);
    assert!(stats.status.success());
    assert!(String::from_utf8_lossy(&stats.stdout).contains("3 / 3 resources completed"));
}

#[test]
fn test_run_refuses_an_edited_config() {
    let dir = TempDir::new().unwrap();
    let (config_path, db) = setup_batch(dir.path());

    let output = batchward(&[
        "run",
        "--config",
        config_path.to_str().unwrap(),
        "--config-hash",
        "0000",
    ]);

    assert_eq!(
        output.status.code(),
        Some(BatchOutcome::CrashedNoRestart.exit_code())
    );
    assert!(!db.exists());
}

#[test]
fn test_run_with_missing_config_does_not_ask_for_restart() {
    let output = batchward(&["run", "--config", "/nonexistent/batch.toml"]);
    assert_eq!(
        output.status.code(),
        Some(BatchOutcome::CrashedNoRestart.exit_code())
    );
}

#[test]
fn test_launch_runs_child_incarnations() {
    let dir = TempDir::new().unwrap();
    let (config_path, db) = setup_batch(dir.path());

    let output = batchward(&["launch", "--config", config_path.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(BatchOutcome::Complete.exit_code()));

    let sink = SqliteSink::open(&db).unwrap();
    let runs = sink.list_runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].incarnation, 0);
    assert_eq!(runs[0].status, RunStatus::Finished(BatchOutcome::Complete));
    assert_eq!(
        runs[0].config_hash,
        compute_config_hash(&config_path).unwrap()
    );
}

//! Outer relaunch loop driven by `sh` children

use batchward::relaunch::{IncarnationEnd, LaunchSpec, RelaunchLoop, RelaunchPolicy, StopReason};
use batchward::BatchOutcome;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// `$1`/`$2` inside the script are `--incarnation <n>`
fn sh(script: &str) -> LaunchSpec {
    LaunchSpec::new("sh").args(["-c", script, "child"])
}

fn policy(max_restarts: u32) -> RelaunchPolicy {
    RelaunchPolicy {
        max_restarts,
        restart_delay: Duration::ZERO,
        ..RelaunchPolicy::default()
    }
}

#[tokio::test]
async fn test_terminal_outcomes_are_not_relaunched() {
    for (code, outcome) in [
        (0, BatchOutcome::Complete),
        (250, BatchOutcome::Interrupted),
        (253, BatchOutcome::CrashedNoRestart),
    ] {
        let relaunch = RelaunchLoop::new(sh(&format!("exit {}", code)), policy(5));
        let (_tx, rx) = watch::channel(false);

        let summary = relaunch.run_until(rx).await.unwrap();

        assert_eq!(summary.incarnations.len(), 1, "exit {}", code);
        assert_eq!(summary.stop_reason, StopReason::Finished);
        assert_eq!(summary.final_outcome(), outcome);
    }
}

#[tokio::test]
async fn test_restartable_crash_relaunches_until_the_cap() {
    let relaunch = RelaunchLoop::new(sh("exit 252"), policy(2));
    let (_tx, rx) = watch::channel(false);

    let summary = relaunch.run_until(rx).await.unwrap();

    assert_eq!(summary.incarnations.len(), 3);
    assert_eq!(summary.stop_reason, StopReason::RestartLimit);
    assert_eq!(summary.final_outcome(), BatchOutcome::CrashedRestartable);
    let numbers: Vec<u32> = summary.incarnations.iter().map(|r| r.number).collect();
    assert_eq!(numbers, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_timed_out_process_is_relaunched_until_complete() {
    let relaunch = RelaunchLoop::new(sh(r#"[ "$2" -ge 1 ] && exit 0; exit 251"#), policy(5));
    let (_tx, rx) = watch::channel(false);

    let summary = relaunch.run_until(rx).await.unwrap();

    assert_eq!(summary.incarnations.len(), 2);
    assert_eq!(
        summary.incarnations[0].end,
        IncarnationEnd::Reported(BatchOutcome::TimedOutProcess)
    );
    assert_eq!(summary.stop_reason, StopReason::Finished);
    assert_eq!(summary.final_outcome(), BatchOutcome::Complete);
}

#[cfg(unix)]
#[tokio::test]
async fn test_signal_death_is_relaunched() {
    let relaunch = RelaunchLoop::new(sh("kill -9 $$"), policy(1));
    let (_tx, rx) = watch::channel(false);

    let summary = relaunch.run_until(rx).await.unwrap();

    assert_eq!(summary.incarnations.len(), 2);
    assert!(matches!(
        summary.incarnations[0].end,
        IncarnationEnd::Abrupt { signal: Some(9), .. }
    ));
    assert_eq!(summary.final_outcome(), BatchOutcome::CrashedRestartable);
}

#[tokio::test]
async fn test_unlisted_exit_code_is_relaunched() {
    let relaunch = RelaunchLoop::new(sh(r#"[ "$2" -ge 1 ] && exit 0; exit 101"#), policy(3));
    let (_tx, rx) = watch::channel(false);

    let summary = relaunch.run_until(rx).await.unwrap();

    assert_eq!(summary.restarts(), 1);
    assert_eq!(
        summary.incarnations[0].end,
        IncarnationEnd::Abrupt {
            code: Some(101),
            signal: None
        }
    );
}

#[tokio::test]
async fn test_child_outliving_its_deadline_is_killed() {
    let relaunch = RelaunchLoop::new(
        sh("sleep 30"),
        RelaunchPolicy {
            kill_after: Some(Duration::from_millis(200)),
            ..policy(0)
        },
    );
    let (_tx, rx) = watch::channel(false);

    let started = Instant::now();
    let summary = relaunch.run_until(rx).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(summary.incarnations[0].end, IncarnationEnd::Killed);
    assert_eq!(summary.final_outcome(), BatchOutcome::TimedOutProcess);
    assert_eq!(summary.stop_reason, StopReason::RestartLimit);
}

#[tokio::test]
async fn test_total_time_budget_stops_relaunching() {
    let relaunch = RelaunchLoop::new(
        sh("sleep 0.05; exit 252"),
        RelaunchPolicy {
            max_total: Some(Duration::from_millis(150)),
            ..policy(1_000)
        },
    );
    let (_tx, rx) = watch::channel(false);

    let summary = relaunch.run_until(rx).await.unwrap();

    assert_eq!(summary.stop_reason, StopReason::TimeLimit);
    assert!(summary.incarnations.len() >= 2);
    assert!(summary.incarnations.len() < 1_000);
}

#[tokio::test]
async fn test_operator_stop_waits_for_child_then_stops() {
    let relaunch = RelaunchLoop::new(sh("sleep 0.3; exit 252"), policy(10));
    let (tx, rx) = watch::channel(false);

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tx
    });

    let summary = relaunch.run_until(rx).await.unwrap();
    let _tx = stopper.await.unwrap();

    assert_eq!(summary.incarnations.len(), 1);
    assert_eq!(summary.stop_reason, StopReason::OperatorStop);
    assert_eq!(
        summary.incarnations[0].end,
        IncarnationEnd::Reported(BatchOutcome::CrashedRestartable)
    );
}

#[tokio::test]
async fn test_operator_stop_cuts_the_restart_delay_short() {
    let relaunch = RelaunchLoop::new(
        sh("exit 252"),
        RelaunchPolicy {
            restart_delay: Duration::from_secs(30),
            ..policy(10)
        },
    );
    let (tx, rx) = watch::channel(false);

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        tx
    });

    let started = Instant::now();
    let summary = relaunch.run_until(rx).await.unwrap();
    let _tx = stopper.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(summary.incarnations.len(), 1);
    assert_eq!(summary.stop_reason, StopReason::OperatorStop);
}

#[tokio::test]
async fn test_child_environment_is_cleared() {
    std::env::set_var("BATCHWARD_TEST_SECRET", "leaked");
    let relaunch = RelaunchLoop::new(
        sh(r#"[ -z "$BATCHWARD_TEST_SECRET" ] && [ -n "$PATH" ] && exit 0; exit 253"#),
        policy(0),
    );
    let (_tx, rx) = watch::channel(false);

    let summary = relaunch.run_until(rx).await.unwrap();

    assert_eq!(summary.final_outcome(), BatchOutcome::Complete);
}

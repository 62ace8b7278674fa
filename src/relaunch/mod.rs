//! Outer relaunch loop
//!
//! Conditions like memory exhaustion, native crashes or an extractor stuck in
//! uninterruptible I/O cannot be handled inside the process that suffers them.
//! The relaunch loop runs each supervisor incarnation as a child process,
//! reads the outcome from its exit code, and decides whether to start another.

mod runner;

pub use runner::{IncarnationRecord, RelaunchLoop, RelaunchSummary, StopReason};

use crate::config::{
    resolved, Config, DEFAULT_KILL_GRACE_SECONDS, DEFAULT_MAX_RESTARTS,
    DEFAULT_RESTART_DELAY_MILLIS,
};
use crate::supervisor::BatchOutcome;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

/// Environment variables passed through to every child
pub const DEFAULT_ENV_ALLOW_LIST: &[&str] = &["PATH", "RUST_LOG", "HOME"];

/// Limits governing how often, and for how long, children are relaunched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaunchPolicy {
    /// Relaunches allowed after the first incarnation
    pub max_restarts: u32,
    /// Wall-clock budget across all incarnations; `None` is unlimited
    pub max_total: Option<Duration>,
    pub restart_delay: Duration,
    /// A child still alive after this long is killed; `None` never kills
    pub kill_after: Option<Duration>,
}

impl RelaunchPolicy {
    /// Resolves the `[relaunch]` table, deriving the kill deadline from
    /// `max-alive-time-seconds` plus `kill-grace-seconds`
    pub fn from_config(config: &Config) -> Self {
        let raw = &config.relaunch;
        let grace = Duration::from_secs(
            resolved(raw.kill_grace_seconds).unwrap_or(DEFAULT_KILL_GRACE_SECONDS),
        );

        Self {
            max_restarts: resolved(raw.max_restarts)
                .map(|n| n.min(u32::MAX as u64) as u32)
                .unwrap_or(DEFAULT_MAX_RESTARTS),
            max_total: resolved(raw.max_total_seconds).map(Duration::from_secs),
            restart_delay: Duration::from_millis(
                resolved(raw.restart_delay_millis).unwrap_or(DEFAULT_RESTART_DELAY_MILLIS),
            ),
            kill_after: config.supervisor().max_alive_time.map(|alive| alive + grace),
        }
    }
}

impl Default for RelaunchPolicy {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
            max_total: None,
            restart_delay: Duration::from_millis(DEFAULT_RESTART_DELAY_MILLIS),
            kill_after: None,
        }
    }
}

/// How to start a child incarnation
///
/// The child gets `--incarnation <n>` appended to `args`, and an environment
/// cleared down to the allow-list so configuration travels only through
/// arguments.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env_allow_list: Vec<String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_allow_list: DEFAULT_ENV_ALLOW_LIST.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub(crate) fn command(&self, incarnation: u32) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--incarnation")
            .arg(incarnation.to_string())
            .env_clear()
            .kill_on_drop(true);

        for key in &self.env_allow_list {
            if let Some(value) = std::env::var_os(key) {
                command.env(key, value);
            }
        }
        command
    }
}

/// How a child incarnation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncarnationEnd {
    /// Exited with one of the outcome codes
    Reported(BatchOutcome),
    /// Any other exit code, or death by a signal
    Abrupt { code: Option<i32>, signal: Option<i32> },
    /// Killed by the loop after outliving its deadline
    Killed,
}

impl IncarnationEnd {
    /// The outcome the loop acts on
    pub fn outcome(&self) -> BatchOutcome {
        match self {
            Self::Reported(outcome) => *outcome,
            Self::Abrupt { .. } => BatchOutcome::CrashedRestartable,
            Self::Killed => BatchOutcome::TimedOutProcess,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Reported(outcome) => outcome.to_string(),
            Self::Abrupt {
                signal: Some(signal),
                ..
            } => format!("abrupt exit (signal {})", signal),
            Self::Abrupt {
                code: Some(code), ..
            } => format!("abrupt exit (code {})", code),
            Self::Abrupt { .. } => "abrupt exit".to_string(),
            Self::Killed => "killed after deadline".to_string(),
        }
    }
}

/// Maps a child's exit status to how its incarnation ended
pub fn interpret_exit(status: ExitStatus) -> IncarnationEnd {
    match status.code().and_then(BatchOutcome::from_exit_code) {
        Some(outcome) => IncarnationEnd::Reported(outcome),
        None => IncarnationEnd::Abrupt {
            code: status.code(),
            signal: termination_signal(&status),
        },
    }
}

#[cfg(unix)]
fn termination_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RelaunchSettings, SupervisorSettings};

    fn status_of(script: &str) -> ExitStatus {
        std::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .status()
            .unwrap()
    }

    #[test]
    fn test_interpret_outcome_codes() {
        assert_eq!(
            interpret_exit(status_of("exit 0")),
            IncarnationEnd::Reported(BatchOutcome::Complete)
        );
        assert_eq!(
            interpret_exit(status_of("exit 253")),
            IncarnationEnd::Reported(BatchOutcome::CrashedNoRestart)
        );
    }

    #[test]
    fn test_unlisted_code_is_abrupt_and_restartable() {
        let end = interpret_exit(status_of("exit 3"));
        assert_eq!(
            end,
            IncarnationEnd::Abrupt {
                code: Some(3),
                signal: None
            }
        );
        assert_eq!(end.outcome(), BatchOutcome::CrashedRestartable);
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_death_is_abrupt() {
        let end = interpret_exit(status_of("kill -9 $$"));
        assert!(matches!(end, IncarnationEnd::Abrupt { signal: Some(9), .. }));
        assert!(end.outcome().should_relaunch());
    }

    #[test]
    fn test_killed_counts_as_timed_out() {
        assert_eq!(IncarnationEnd::Killed.outcome(), BatchOutcome::TimedOutProcess);
    }

    #[test]
    fn test_policy_from_config() {
        let mut config: Config = toml::from_str(
            r#"
            [source]
            kind = "list"
            path = "files.txt"

            [output]
            database-path = "batch.db"
            "#,
        )
        .unwrap();

        let policy = RelaunchPolicy::from_config(&config);
        assert_eq!(policy, RelaunchPolicy::default());

        config.supervisor = SupervisorSettings {
            max_alive_time_seconds: 60,
            ..SupervisorSettings::default()
        };
        config.relaunch = RelaunchSettings {
            max_restarts: 2,
            max_total_seconds: 600,
            restart_delay_millis: 0,
            kill_grace_seconds: 5,
        };

        let policy = RelaunchPolicy::from_config(&config);
        assert_eq!(policy.max_restarts, 2);
        assert_eq!(policy.max_total, Some(Duration::from_secs(600)));
        assert_eq!(policy.restart_delay, Duration::ZERO);
        assert_eq!(policy.kill_after, Some(Duration::from_secs(65)));
    }

    #[test]
    fn test_launch_spec_builder() {
        let spec = LaunchSpec::new("batchward").arg("run").args(["--config", "a.toml"]);
        assert_eq!(spec.args, vec!["run", "--config", "a.toml"]);
        assert!(spec.env_allow_list.contains(&"PATH".to_string()));
    }
}

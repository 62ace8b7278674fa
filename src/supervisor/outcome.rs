//! Batch outcomes and monitor phases

use serde::Serialize;
use std::fmt;

/// Final verdict of one supervisor incarnation
///
/// Set exactly once by the timeout monitor and communicated to the relaunch
/// loop as the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Every resource was handled
    Complete,

    /// An operator asked to stop and in-flight work drained
    Interrupted,

    /// Too many hung consumers, or the global watchdog fired
    TimedOutProcess,

    /// Died in a way a fresh process may survive
    CrashedRestartable,

    /// The environment is broken; relaunching would fail the same way
    CrashedNoRestart,
}

impl BatchOutcome {
    pub const ALL: [BatchOutcome; 5] = [
        Self::Complete,
        Self::Interrupted,
        Self::TimedOutProcess,
        Self::CrashedRestartable,
        Self::CrashedNoRestart,
    ];

    /// Process exit code carrying this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Complete => 0,
            Self::Interrupted => 250,
            Self::TimedOutProcess => 251,
            Self::CrashedRestartable => 252,
            Self::CrashedNoRestart => 253,
        }
    }

    /// Maps an exit code back to an outcome; `None` for any unlisted code
    pub fn from_exit_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.exit_code() == code)
    }

    /// Whether the relaunch loop should start another incarnation
    pub fn should_relaunch(&self) -> bool {
        matches!(self, Self::TimedOutProcess | Self::CrashedRestartable)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Interrupted => "interrupted",
            Self::TimedOutProcess => "timed_out_process",
            Self::CrashedRestartable => "crashed_restartable",
            Self::CrashedNoRestart => "crashed_no_restart",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.to_db_string() == s)
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Complete => "COMPLETE",
            Self::Interrupted => "INTERRUPTED",
            Self::TimedOutProcess => "TIMED_OUT_PROCESS",
            Self::CrashedRestartable => "CRASHED_RESTARTABLE",
            Self::CrashedNoRestart => "CRASHED_NO_RESTART",
        };
        f.write_str(label)
    }
}

/// Phase of the timeout monitor's state machine, shared with the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    Running,
    Draining,
    Aborting,
    Done,
}

impl MonitorPhase {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Draining => 1,
            Self::Aborting => 2,
            Self::Done => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            2 => Self::Aborting,
            _ => Self::Done,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Aborting => "aborting",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for MonitorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

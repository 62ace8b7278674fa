/// Resource state definitions for checkpointing batch progress
///
/// A resource is checkpointed `Claimed` before the extraction capability is
/// invoked and moved to one terminal state afterwards. A resource still
/// `Claimed` when a process incarnation dies is retried by the next one.
use serde::Serialize;
use std::fmt;

/// Represents the checkpointed state of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    // ===== In-Flight State =====
    /// A consumer took the resource and is (or was, before a crash) processing it
    Claimed,

    // ===== Terminal Success State =====
    /// Extraction returned successfully
    Completed,

    // ===== Terminal Error States =====
    /// Extraction returned a recoverable error or panicked
    Failed,

    /// The consumer processing the resource stopped heart-beating and was abandoned
    TimedOut,

    /// Claimed too many times without ever finishing; never retried again
    Abandoned,
}

impl ResourceState {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Claimed)
    }

    /// Returns true if this represents a successful completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true if this represents an error state
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut | Self::Abandoned)
    }

    /// Converts the resource state to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Abandoned => "abandoned",
        }
    }

    /// Parses a resource state from a database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "claimed" => Some(Self::Claimed),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timed_out" => Some(Self::TimedOut),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }

    /// Returns all possible resource states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Claimed,
            Self::Completed,
            Self::Failed,
            Self::TimedOut,
            Self::Abandoned,
        ]
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

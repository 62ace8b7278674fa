//! Batchward: a crash-resilient batch processing supervisor
//!
//! This crate runs an opaque content-extraction capability over a large,
//! untrusted corpus of files. A bounded producer/consumer pipeline feeds a
//! fixed pool of workers, a pulse-driven monitor detects hung workers and
//! decides the terminal outcome, and an outer relaunch loop restarts the whole
//! process after failures nothing in-process can recover from.

pub mod config;
pub mod extract;
pub mod interrupt;
pub mod output;
pub mod relaunch;
pub mod report;
pub mod source;
pub mod state;
pub mod storage;
pub mod supervisor;

use thiserror::Error;

/// Main error type for Batchward operations
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn {role} thread: {source}")]
    ThreadSpawn {
        role: String,
        source: std::io::Error,
    },

    #[error("Failed to install signal handler: {0}")]
    Signal(String),

    #[error("Relaunch error: {0}")]
    Relaunch(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Config file changed since launch (expected hash {expected}, found {actual})")]
    HashMismatch { expected: String, actual: String },
}

/// Result type alias for Batchward operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{Config, SupervisorConfig};
pub use state::{ConsumerState, ResourceState};
pub use supervisor::{BatchOutcome, BatchReport, Supervisor};

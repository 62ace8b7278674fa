//! Configuration module for Batchward
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! and resolving the `-1`/unset convention into concrete defaults.
//!
//! # Example
//!
//! ```no_run
//! use batchward::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("batch.toml")).unwrap();
//! println!("Consumers: {}", config.supervisor().num_consumers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, ExtractorConfig, InterrupterConfig, OutputConfig, RelaunchSettings, ReporterConfig,
    SourceConfig, SupervisorConfig, SupervisorSettings, UNSET,
};

pub(crate) use types::{
    resolved, DEFAULT_KILL_GRACE_SECONDS, DEFAULT_MAX_RESTARTS, DEFAULT_RESTART_DELAY_MILLIS,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, verify_config_hash};

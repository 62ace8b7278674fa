//! Output module for summarizing batch progress
//!
//! This module reads the result sink after (or during) a batch and renders
//! per-state resource counts and the run history.

pub mod stats;

pub use stats::{load_statistics, print_statistics, BatchStatistics};

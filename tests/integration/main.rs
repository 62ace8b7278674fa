//! Integration tests for batchward
//!
//! Supervisor tests drive whole incarnations in-process with scripted
//! extractors; relaunch tests drive the outer loop with `sh` children; CLI
//! tests run the compiled binary end to end.

mod cli_tests;
mod relaunch_tests;
mod supervisor_tests;

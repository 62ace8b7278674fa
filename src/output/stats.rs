//! Statistics generation from the result sink
//!
//! This module provides functionality for extracting and displaying
//! batch statistics from the storage layer.

use crate::state::ResourceState;
use crate::storage::{ResourceRecord, ResultSink, RunRecord, RunStatus};
use crate::BatchError;
use std::collections::HashMap;

/// How many failed resources to list
const FAILURE_SAMPLE: usize = 10;

/// Batch statistics summary
#[derive(Debug, Clone)]
pub struct BatchStatistics {
    /// Total number of resources ever claimed
    pub total_resources: u64,

    /// Count of resources by state
    pub resources_by_state: HashMap<ResourceState, u64>,

    /// Every incarnation, oldest first
    pub runs: Vec<RunRecord>,

    /// Most recent failures, newest first
    pub recent_failures: Vec<ResourceRecord>,
}

impl BatchStatistics {
    pub fn count(&self, state: ResourceState) -> u64 {
        self.resources_by_state.get(&state).copied().unwrap_or(0)
    }

    /// Resources in any error state
    pub fn total_errors(&self) -> u64 {
        self.resources_by_state
            .iter()
            .filter(|(state, _)| state.is_error())
            .map(|(_, count)| count)
            .sum()
    }

    /// Percentage of claimed resources that completed
    pub fn success_rate(&self) -> f64 {
        if self.total_resources == 0 {
            0.0
        } else {
            self.count(ResourceState::Completed) as f64 / self.total_resources as f64 * 100.0
        }
    }
}

/// Loads statistics from the sink
pub fn load_statistics(sink: &dyn ResultSink) -> Result<BatchStatistics, BatchError> {
    let mut resources_by_state = HashMap::new();
    for state in ResourceState::all_states() {
        let count = sink.count_by_state(state)?;
        if count > 0 {
            resources_by_state.insert(state, count);
        }
    }

    Ok(BatchStatistics {
        total_resources: resources_by_state.values().sum(),
        resources_by_state,
        runs: sink.list_runs()?,
        recent_failures: sink.recent_failures(FAILURE_SAMPLE)?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &BatchStatistics) {
    println!("=== Batch Statistics ===\n");

    println!("Overview:");
    println!("  Resources claimed: {}", stats.total_resources);
    println!("  Incarnations: {}", stats.runs.len());
    println!();

    println!("Resources by State:");
    let mut state_counts: Vec<_> = stats.resources_by_state.iter().collect();
    state_counts.sort_by(|a, b| b.1.cmp(a.1));

    for (state, count) in state_counts {
        let percentage = if stats.total_resources > 0 {
            (*count as f64 / stats.total_resources as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", state, count, percentage);
    }
    println!();

    if !stats.runs.is_empty() {
        println!("Runs:");
        for run in &stats.runs {
            let finished = run.finished_at.as_deref().unwrap_or("-");
            let status = match run.status {
                RunStatus::Finished(outcome) => outcome.to_string(),
                RunStatus::Running => "RUNNING (or died without an outcome)".to_string(),
            };
            println!(
                "  #{} incarnation {}: {} [{} .. {}]",
                run.id, run.incarnation, status, run.started_at, finished
            );
        }
        println!();
    }

    if !stats.recent_failures.is_empty() {
        println!("Recent Failures:");
        for record in &stats.recent_failures {
            println!(
                "  {} ({}, {} attempts): {}",
                record.id,
                record.state,
                record.attempts,
                record.detail.as_deref().unwrap_or("-")
            );
        }
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} / {} resources completed, {} errors)",
        stats.success_rate(),
        stats.count(ResourceState::Completed),
        stats.total_resources,
        stats.total_errors()
    );
}

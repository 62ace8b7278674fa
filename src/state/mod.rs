//! State module for tracking batch progress
//!
//! This module provides the state records shared between the consumer pool,
//! the timeout monitor, the status reporter and the result sink.
//!
//! # Components
//!
//! - `ConsumerState` / `ConsumerStatus`: per-worker lifecycle and heartbeat
//! - `ResourceState`: checkpointed state of a single resource in the result sink

mod consumer_status;
mod resource_state;

// Re-export main types
pub use consumer_status::{ConsumerSnapshot, ConsumerState, ConsumerStatus};
pub use resource_state::ResourceState;

//! Per-consumer status records
//!
//! Each record is written by its owning worker and read by the monitor and the
//! reporter. The one exception is the `Active -> TimedOut` transition, which the
//! monitor performs with a compare-and-swap so that a worker returning at the
//! same moment and the monitor agree on a single winner.

use crate::extract::CancelSignal;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Lifecycle state of one consumer worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    /// Waiting for work
    Idle,

    /// Inside the extraction capability
    Active,

    /// Stopped heart-beating; abandoned by the monitor
    TimedOut,

    /// The worker thread died outside the extraction capability
    Crashed,
}

impl ConsumerState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Active => 1,
            Self::TimedOut => 2,
            Self::Crashed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Active,
            2 => Self::TimedOut,
            _ => Self::Crashed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::TimedOut => "timed_out",
            Self::Crashed => "crashed",
        }
    }

    /// Returns true if a worker in this state is still part of the pool
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Idle | Self::Active)
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status record for a single consumer worker
#[derive(Debug)]
pub struct ConsumerStatus {
    id: usize,
    origin: Instant,
    state: AtomicU8,
    current: Mutex<Option<String>>,
    /// Milliseconds since `origin`
    last_heartbeat: AtomicU64,
    completed: AtomicU64,
    cancel: CancelSignal,
}

/// Point-in-time copy of a status record
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerSnapshot {
    pub id: usize,
    pub state: ConsumerState,
    pub current_resource: Option<String>,
    pub heartbeat_age_millis: u64,
    pub completed: u64,
}

impl ConsumerStatus {
    /// Creates an idle status record; heartbeat offsets are measured from `origin`
    pub fn new(id: usize, origin: Instant) -> Self {
        let status = Self {
            id,
            origin,
            state: AtomicU8::new(ConsumerState::Idle.as_u8()),
            current: Mutex::new(None),
            last_heartbeat: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            cancel: CancelSignal::new(),
        };
        status.stamp_heartbeat();
        status
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn current_resource(&self) -> Option<String> {
        self.current.lock().clone()
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Cancellation signal raised when the monitor abandons this worker
    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn stamp_heartbeat(&self) {
        let offset = self.origin.elapsed().as_millis() as u64;
        self.last_heartbeat.store(offset, Ordering::SeqCst);
    }

    /// Time since the last heartbeat, measured at `now`
    pub fn heartbeat_age(&self, now: Instant) -> Duration {
        let stamped = self.origin + Duration::from_millis(self.last_heartbeat.load(Ordering::SeqCst));
        now.saturating_duration_since(stamped)
    }

    /// Marks the worker active on `resource_id`
    ///
    /// The heartbeat is stamped before the state flips so the monitor never
    /// observes an active record carrying a stale heartbeat.
    pub fn begin(&self, resource_id: &str) {
        *self.current.lock() = Some(resource_id.to_string());
        self.stamp_heartbeat();
        self.state
            .store(ConsumerState::Active.as_u8(), Ordering::SeqCst);
    }

    /// Marks the worker idle after the extraction call returned
    ///
    /// Returns false if the monitor already declared this worker timed out, in
    /// which case the caller must treat itself as abandoned.
    pub fn finish(&self, succeeded: bool) -> bool {
        self.stamp_heartbeat();
        let swapped = self
            .state
            .compare_exchange(
                ConsumerState::Active.as_u8(),
                ConsumerState::Idle.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();

        if swapped {
            *self.current.lock() = None;
            if succeeded {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
        }
        swapped
    }

    /// Declares the worker timed out if it is still active
    ///
    /// Raises the cancellation signal on success. Returns false if the worker
    /// returned to idle first.
    pub fn mark_timed_out(&self) -> bool {
        let swapped = self
            .state
            .compare_exchange(
                ConsumerState::Active.as_u8(),
                ConsumerState::TimedOut.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();

        if swapped {
            self.cancel.raise();
        }
        swapped
    }

    /// Records that the worker thread died outside the extraction call
    pub fn mark_crashed(&self) {
        self.state
            .store(ConsumerState::Crashed.as_u8(), Ordering::SeqCst);
    }

    pub fn snapshot(&self, now: Instant) -> ConsumerSnapshot {
        ConsumerSnapshot {
            id: self.id,
            state: self.state(),
            current_resource: self.current_resource(),
            heartbeat_age_millis: self.heartbeat_age(now).as_millis() as u64,
            completed: self.completed(),
        }
    }
}

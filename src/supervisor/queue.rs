//! Bounded FIFO between the crawler and the consumer pool
//!
//! The queue is the only backpressure mechanism: when it is full the crawler
//! blocks instead of dropping resources.

use crate::source::Resource;
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use std::time::Duration;

/// How long a blocked put waits before re-checking whether it should give up
const PUT_RECHECK: Duration = Duration::from_millis(50);

/// Bounded multi-consumer resource queue
pub struct ResourceQueue {
    /// Sender for adding resources
    sender: Sender<Resource>,

    /// Receiver for taking resources
    receiver: Receiver<Resource>,

    /// Queue capacity
    capacity: usize,
}

impl ResourceQueue {
    /// Create a new queue; a zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded(capacity);

        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Blocks until the resource is enqueued
    ///
    /// While blocked, `keep_waiting` is polled periodically; once it returns
    /// false the put gives up and hands the resource back.
    pub fn put(&self, resource: Resource, keep_waiting: impl Fn() -> bool) -> Result<(), Resource> {
        let mut pending = resource;
        loop {
            match self.sender.send_timeout(pending, PUT_RECHECK) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(resource)) => {
                    if !keep_waiting() {
                        return Err(resource);
                    }
                    pending = resource;
                }
                Err(SendTimeoutError::Disconnected(resource)) => return Err(resource),
            }
        }
    }

    /// Takes the oldest resource, waiting at most `timeout`
    pub fn take(&self, timeout: Duration) -> Option<Resource> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Get current queue length
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Get queue capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

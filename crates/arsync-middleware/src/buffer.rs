//! Size- and time-triggered update batching.
//!
//! [`UpdateBuffer::add`] never refuses an update; it is the caller's job to
//! check [`UpdateBuffer::should_flush`] and drain with
//! [`UpdateBuffer::flush`].  A flush always returns a `Vec` (empty when
//! nothing was buffered) and restarts the flush clock.

use std::time::{Duration, Instant};

use arsync_types::PositionUpdate;

#[derive(Debug)]
pub struct UpdateBuffer {
    updates: Vec<PositionUpdate>,
    capacity: usize,
    flush_interval: Duration,
    last_flush: Instant,
}

impl UpdateBuffer {
    /// `capacity` is raised to at least 1.
    pub fn new(capacity: usize, flush_interval: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            updates: Vec::with_capacity(capacity),
            capacity,
            flush_interval,
            last_flush: Instant::now(),
        }
    }

    pub fn add(&mut self, update: PositionUpdate) {
        self.updates.push(update);
    }

    /// `true` once the buffer is full or the flush interval has elapsed.
    pub fn should_flush(&self) -> bool {
        self.updates.len() >= self.capacity || self.last_flush.elapsed() >= self.flush_interval
    }

    /// Drain everything buffered, in insertion order, and restart the clock.
    pub fn flush(&mut self) -> Vec<PositionUpdate> {
        self.last_flush = Instant::now();
        std::mem::replace(&mut self.updates, Vec::with_capacity(self.capacity))
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }
}

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use crate::domain::Reading;

/// Unbounded concurrent holding area between broker adapters and the batch
/// flusher. Producers push lock-free and never block; at most one drain is
/// in flight at a time, enforced with an atomic flag so a losing drainer
/// backs off instead of waiting.
pub struct IngestBuffer {
    queue: SegQueue<Reading>,
    draining: AtomicBool,
    batch_size: usize,
}

impl IngestBuffer {
    pub fn new(batch_size: usize) -> Self {
        Self {
            queue: SegQueue::new(),
            draining: AtomicBool::new(false),
            batch_size,
        }
    }

    pub fn add(&self, reading: Reading) {
        self.queue.push(reading);
    }

    pub fn add_all(&self, readings: impl IntoIterator<Item = Reading>) {
        for reading in readings {
            self.queue.push(reading);
        }
    }

    /// Remove and return up to `max` readings. Arrival order is not
    /// preserved. Returns an empty batch immediately if another drain is
    /// already in progress.
    pub fn drain(&self, max: usize) -> Vec<Reading> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Vec::new();
        }

        let mut batch = Vec::with_capacity(max.min(self.queue.len()));
        while batch.len() < max {
            match self.queue.pop() {
                Some(reading) => batch.push(reading),
                None => break,
            }
        }

        self.draining.store(false, Ordering::Release);
        batch
    }

    /// Approximate count; only ever used as a flush trigger.
    pub fn size(&self) -> usize {
        self.queue.len()
    }

    pub fn should_flush(&self) -> bool {
        self.size() >= self.batch_size
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

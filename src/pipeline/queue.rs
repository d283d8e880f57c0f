//! Bounded FIFO of timestamped results, released against the sink clock.

use crate::pipeline::types::Timestamped;
use crossbeam_channel::Receiver;
use std::collections::VecDeque;
use std::time::Instant;

/// Fixed-capacity queue that hands out entries once their timestamp is due.
///
/// When full, pushing evicts the oldest entry.
#[derive(Debug)]
pub struct TimedDataQueue<T> {
    entries: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T: Timestamped> TimedDataQueue<T> {
    /// Creates a queue holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Appends an entry, returning the oldest one if it had to be evicted.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.entries.len() >= self.capacity {
            self.evicted += 1;
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(item);
        evicted
    }

    /// Removes and returns, in arrival order, entries stamped at or before `t`.
    ///
    /// Stops at the first newer entry even if older ones follow it.
    pub fn fetch_up_to(&mut self, t: Instant) -> Vec<T> {
        let due = self
            .entries
            .iter()
            .take_while(|entry| entry.timestamp() <= t)
            .count();
        self.entries.drain(..due).collect()
    }

    /// Like [`fetch_up_to`](Self::fetch_up_to) but keeps only the freshest due entry.
    pub fn fetch_latest_up_to(&mut self, t: Instant) -> Option<T> {
        self.fetch_up_to(t).pop()
    }

    /// Moves everything currently waiting in `rx` into the queue.
    ///
    /// Returns the number of entries received.
    pub fn drain_from(&mut self, rx: &Receiver<T>) -> usize {
        let mut received = 0;
        for item in rx.try_iter() {
            self.push(item);
            received += 1;
        }
        received
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of entries evicted because the queue was full.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

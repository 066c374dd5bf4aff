//! Bounded, insertion-ordered log buffer.
//!
//! Keeps the most recent `capacity` entries. Appending past capacity evicts
//! the oldest entry first (FIFO, entries are never re-accessed so there is no
//! recency to track).

use std::collections::vec_deque;
use std::collections::VecDeque;

use designer_types::{LevelFilter, LogEntry};

use crate::config::DEFAULT_LOG_CAPACITY;

#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    evicted_total: u64,
}

impl LogBuffer {
    /// Create an empty buffer. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            evicted_total: 0,
        }
    }

    /// Append at the tail, evicting the oldest entry when full.
    ///
    /// Returns the evicted entry, if any.
    pub fn append(&mut self, entry: LogEntry) -> Option<LogEntry> {
        let evicted = if self.entries.len() == self.capacity {
            self.evicted_total += 1;
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// Entries passing `filter`, in insertion order.
    #[must_use]
    pub fn filter(&self, filter: LevelFilter) -> Vec<LogEntry> {
        self.entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest to newest.
    pub fn iter(&self) -> vec_deque::Iter<'_, LogEntry> {
        self.entries.iter()
    }

    /// Every retained entry, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries evicted since creation.
    #[must_use]
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl<'a> IntoIterator for &'a LogBuffer {
    type Item = &'a LogEntry;
    type IntoIter = vec_deque::Iter<'a, LogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

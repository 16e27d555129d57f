//! Priority-ordered task queue.
//!
//! Entries pop strictly by priority (highest first); entries of equal
//! priority pop in the order they were pushed. Each push returns an
//! [`EntryId`] that can later remove the entry before it is dispatched.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Scheduling priority. Larger values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    /// Routine sweeps that may wait behind everything else.
    pub const BACKGROUND: Priority = Priority(-100);
    pub const NORMAL: Priority = Priority(0);
    /// Live spectrum frames.
    pub const HIGH: Priority = Priority(100);
    /// Re-tuning and other time-critical work.
    pub const URGENT: Priority = Priority(1_000);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority(value)
    }
}

/// Stable handle to a queued entry.
///
/// Orders the way the queue pops: higher priority first, then lower sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    priority: Priority,
    seq: u64,
}

impl EntryId {
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Submission sequence number, unique within one queue.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Ord for EntryId {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for EntryId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Stable max-priority queue with removal by id.
///
/// Not synchronised; callers share it behind a mutex.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    entries: BTreeMap<EntryId, T>,
    next_seq: u64,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, item: T, priority: Priority) -> EntryId {
        let id = EntryId {
            priority,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(id, item);
        id
    }

    /// Remove and return the highest-priority, earliest-pushed item.
    pub fn pop(&mut self) -> Option<T> {
        self.pop_entry().map(|(_, item)| item)
    }

    pub fn pop_entry(&mut self) -> Option<(EntryId, T)> {
        self.entries.pop_first()
    }

    /// Remove an entry that has not been popped yet.
    pub fn remove(&mut self, id: EntryId) -> Option<T> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn peek_priority(&self) -> Option<Priority> {
        self.entries.keys().next().map(|id| id.priority)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every queued item in pop order, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<T> {
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

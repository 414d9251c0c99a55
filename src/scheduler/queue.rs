//! Pending work queue.
//!
//! Ready items pop in priority order, FIFO within a priority. Items with an
//! earliest-eligible time wait in a separate delay heap and are promoted
//! once their time arrives.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tokio::time::Instant;

use super::work::{Priority, WorkItem};

/// Heap entry for ready items: max-heap, so "greater" pops first.
#[derive(Debug)]
struct ReadyEntry {
    priority: Priority,
    seq: u64,
    item: WorkItem,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; lower sequence number (older) first within
        // a priority.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Heap entry for delayed items: max-heap inverted so the earliest
/// eligibility time pops first.
#[derive(Debug)]
struct DelayedEntry {
    at: Instant,
    seq: u64,
    item: WorkItem,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority-then-FIFO queue with earliest-eligible gating.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    ready: BinaryHeap<ReadyEntry>,
    delayed: BinaryHeap<DelayedEntry>,
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds an item, routing by its earliest-eligible time.
    pub(crate) fn push(&mut self, item: WorkItem) {
        let seq = item.id.0;
        match item.not_before {
            Some(at) if at > Instant::now() => {
                self.delayed.push(DelayedEntry { at, seq, item });
            }
            _ => {
                self.ready.push(ReadyEntry {
                    priority: item.request.priority,
                    seq,
                    item,
                });
            }
        }
    }

    /// Pops the highest-priority ready item, promoting due delayed items
    /// first.
    pub(crate) fn pop_ready(&mut self, now: Instant) -> Option<WorkItem> {
        self.promote(now);
        self.ready.pop().map(|entry| entry.item)
    }

    /// When the next delayed item becomes eligible. `None` if nothing is
    /// delayed.
    pub(crate) fn next_wake(&self) -> Option<Instant> {
        self.delayed.peek().map(|entry| entry.at)
    }

    /// Whether any item (ready or delayed) is pending.
    pub(crate) fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.delayed.is_empty()
    }

    /// Total pending items.
    pub(crate) fn len(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    fn promote(&mut self, now: Instant) {
        while let Some(entry) = self.delayed.peek() {
            if entry.at > now {
                break;
            }
            if let Some(entry) = self.delayed.pop() {
                self.ready.push(ReadyEntry {
                    priority: entry.item.request.priority,
                    seq: entry.seq,
                    item: entry.item,
                });
            }
        }
    }
}

//! Request batching.
//!
//! Compatible work items (same action kind, same channel) are buffered for
//! a short window and released together, so one platform call covers many
//! targets and consumes a single unit of rate limit budget. A bucket is
//! flushed early when it reaches the maximum batch size; otherwise it
//! flushes when its window expires.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::scheduler::{ActionKind, WorkItem};

/// Grouping key for compatible work items.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    /// Action kind shared by every item in the batch.
    pub action: ActionKind,

    /// Channel shared by every item in the batch.
    pub channel: String,
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.action, self.channel)
    }
}

/// A group of compatible work items released for dispatch together.
#[derive(Debug, Clone)]
pub struct Batch {
    key: BatchKey,
    items: Vec<WorkItem>,
}

impl Batch {
    /// The batching key.
    #[must_use]
    pub const fn key(&self) -> &BatchKey {
        &self.key
    }

    /// Number of items in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the batch holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Target message ids, one per item.
    #[must_use]
    pub fn message_ids(&self) -> Vec<i64> {
        self.items.iter().map(|i| i.request().message_id).collect()
    }

    /// The batched items.
    pub(crate) fn items(&self) -> &[WorkItem] {
        &self.items
    }

    /// Removes and returns every item whose caller requested cancellation,
    /// keeping the rest in dispatch order.
    pub(crate) fn take_canceled(&mut self) -> Vec<WorkItem> {
        let (canceled, kept) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|item: &WorkItem| item.is_canceled());
        self.items = kept;
        canceled
    }

    /// Consumes the batch, yielding its items.
    pub(crate) fn into_items(self) -> Vec<WorkItem> {
        self.items
    }
}

/// One pending bucket: items plus the deadline set when it opened.
#[derive(Debug)]
struct Bucket {
    items: Vec<WorkItem>,
    deadline: Instant,
}

/// Buffers work items into batches by key.
///
/// Passive: the owner inserts items, polls `next_deadline` for its timer,
/// and collects due batches with `take_due`.
#[derive(Debug)]
pub struct BatchBuffer {
    window: Duration,
    max_size: usize,
    buckets: HashMap<BatchKey, Bucket>,
}

impl BatchBuffer {
    /// Creates a buffer with the given flush window and size cap.
    #[must_use]
    pub fn new(window: Duration, max_size: usize) -> Self {
        Self {
            window,
            max_size: max_size.max(1),
            buckets: HashMap::new(),
        }
    }

    /// Adds an item to its bucket.
    ///
    /// Returns the full batch when the bucket reaches the maximum size,
    /// flushing it early.
    pub fn insert(&mut self, item: WorkItem) -> Option<Batch> {
        let key = BatchKey {
            action: item.request().action,
            channel: item.request().channel.clone(),
        };

        let bucket = self.buckets.entry(key.clone()).or_insert_with(|| Bucket {
            items: Vec::new(),
            deadline: Instant::now() + self.window,
        });
        bucket.items.push(item);

        if bucket.items.len() >= self.max_size {
            let bucket = self.buckets.remove(&key)?;
            return Some(Batch {
                key,
                items: bucket.items,
            });
        }
        None
    }

    /// Earliest bucket deadline, if any bucket is pending.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.buckets.values().map(|b| b.deadline).min()
    }

    /// Removes and returns every bucket whose window has expired.
    pub fn take_due(&mut self, now: Instant) -> Vec<Batch> {
        let due: Vec<BatchKey> = self
            .buckets
            .iter()
            .filter(|(_, b)| b.deadline <= now)
            .map(|(k, _)| k.clone())
            .collect();

        due.into_iter()
            .filter_map(|key| {
                self.buckets.remove(&key).map(|bucket| Batch {
                    key,
                    items: bucket.items,
                })
            })
            .collect()
    }

    /// Removes and returns every pending bucket regardless of deadline.
    pub fn drain_all(&mut self) -> Vec<Batch> {
        self.buckets
            .drain()
            .map(|(key, bucket)| Batch {
                key,
                items: bucket.items,
            })
            .collect()
    }

    /// Total number of buffered items across all buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.values().map(|b| b.items.len()).sum()
    }

    /// Whether no items are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{WorkId, WorkRequest};

    fn item(id: u64, action: ActionKind, channel: &str, message_id: i64) -> WorkItem {
        let (item, _handle) =
            WorkItem::new(WorkId(id), WorkRequest::new(action, channel, message_id), None);
        item
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_early_at_max_size() {
        let mut buffer = BatchBuffer::new(Duration::from_millis(200), 3);

        assert!(buffer
            .insert(item(1, ActionKind::ViewBoost, "@news", 1))
            .is_none());
        assert!(buffer
            .insert(item(2, ActionKind::ViewBoost, "@news", 2))
            .is_none());

        let batch = buffer
            .insert(item(3, ActionKind::ViewBoost, "@news", 3))
            .unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.message_ids(), vec![1, 2, 3]);
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_flush() {
        let mut buffer = BatchBuffer::new(Duration::from_millis(200), 10);
        let start = Instant::now();

        assert!(buffer
            .insert(item(1, ActionKind::Reaction, "@news", 1))
            .is_none());

        assert!(buffer.take_due(start + Duration::from_millis(100)).is_empty());

        let due = buffer.take_due(start + Duration::from_millis(200));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].len(), 1);
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifteen_items_split_ten_then_five() {
        let mut buffer = BatchBuffer::new(Duration::from_millis(200), 10);
        let start = Instant::now();

        let mut flushed = Vec::new();
        for i in 0..15 {
            if let Some(batch) = buffer.insert(item(i, ActionKind::ViewBoost, "@news", i as i64)) {
                flushed.push(batch);
            }
        }

        // First ten flushed immediately on reaching max size.
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].len(), 10);
        assert_eq!(buffer.len(), 5);

        // Remaining five flush at window expiry.
        let due = buffer.take_due(start + Duration::from_millis(200));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incompatible_items_get_separate_buckets() {
        let mut buffer = BatchBuffer::new(Duration::from_millis(200), 10);

        buffer.insert(item(1, ActionKind::ViewBoost, "@news", 1));
        buffer.insert(item(2, ActionKind::Reaction, "@news", 1));
        buffer.insert(item(3, ActionKind::ViewBoost, "@other", 1));

        let all = buffer.drain_all();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_canceled_splits_batch() {
        let mut buffer = BatchBuffer::new(Duration::from_millis(200), 3);

        let (first, _first_handle) = WorkItem::new(
            WorkId(1),
            WorkRequest::new(ActionKind::ViewBoost, "@news", 1),
            None,
        );
        let (second, second_handle) = WorkItem::new(
            WorkId(2),
            WorkRequest::new(ActionKind::ViewBoost, "@news", 2),
            None,
        );
        let (third, _third_handle) = WorkItem::new(
            WorkId(3),
            WorkRequest::new(ActionKind::ViewBoost, "@news", 3),
            None,
        );

        buffer.insert(first);
        buffer.insert(second);
        second_handle.cancel();
        let mut batch = buffer.insert(third).unwrap();

        let canceled = batch.take_canceled();
        assert_eq!(canceled.len(), 1);
        assert_eq!(canceled[0].id(), WorkId(2));
        assert_eq!(batch.message_ids(), vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_deadline_tracks_earliest_bucket() {
        let mut buffer = BatchBuffer::new(Duration::from_millis(200), 10);
        let start = Instant::now();

        buffer.insert(item(1, ActionKind::ViewBoost, "@news", 1));
        tokio::time::advance(Duration::from_millis(50)).await;
        buffer.insert(item(2, ActionKind::Reaction, "@news", 1));

        assert_eq!(
            buffer.next_deadline(),
            Some(start + Duration::from_millis(200))
        );
    }
}

//! Work item types and status handles.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

/// Unique id of a submitted work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkId(pub(crate) u64);

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of automation action a work item requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Register a view on a channel post.
    ViewBoost,
    /// Add an emoji reaction to a post.
    Reaction,
    /// Join a live stream in a channel.
    LiveJoin,
    /// Vote in a channel poll.
    PollVote,
}

impl ActionKind {
    /// Stable string form, matching the workload file encoding.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ViewBoost => "view_boost",
            Self::Reaction => "reaction",
            Self::LiveJoin => "live_join",
            Self::PollVote => "poll_vote",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch priority. Higher priorities dequeue first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// A unit of requested automation action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRequest {
    /// What to do.
    pub action: ActionKind,

    /// Channel the target lives in (coarse batching group).
    pub channel: String,

    /// Target message within the channel.
    pub message_id: i64,

    /// Dispatch priority.
    #[serde(default)]
    pub priority: Priority,
}

impl WorkRequest {
    /// Creates a normal-priority request.
    #[must_use]
    pub fn new(action: ActionKind, channel: impl Into<String>, message_id: i64) -> Self {
        Self {
            action,
            channel: channel.into(),
            message_id,
            priority: Priority::Normal,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Lifecycle status of a work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkStatus {
    /// Waiting in the queue or batch buffer.
    Queued,
    /// Handed to an identity; call in flight.
    Dispatching,
    /// Failed transiently; waiting for the backoff delay.
    Retrying {
        /// Attempts made so far.
        attempt: u32,
    },
    /// Confirmed success. Terminal.
    Succeeded,
    /// Permanent failure or retry ceiling exceeded. Terminal.
    Failed {
        /// Human-readable failure reason.
        reason: String,
    },
    /// Canceled before completion. Terminal.
    Canceled,
}

impl WorkStatus {
    /// Whether the item will never change status again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. } | Self::Canceled)
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Dispatching => write!(f, "dispatching"),
            Self::Retrying { attempt } => write!(f, "retrying (attempt {attempt})"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Shared cell linking a work item to its handle.
#[derive(Debug)]
pub(crate) struct WorkCell {
    status: watch::Sender<WorkStatus>,
    canceled: AtomicBool,
}

/// A scheduled unit of work, owned by the scheduler.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub(crate) id: WorkId,
    pub(crate) request: WorkRequest,
    pub(crate) retries: u32,
    pub(crate) not_before: Option<Instant>,
    cell: Arc<WorkCell>,
}

impl WorkItem {
    /// Creates a work item and the caller-facing handle for it.
    pub(crate) fn new(
        id: WorkId,
        request: WorkRequest,
        not_before: Option<Instant>,
    ) -> (Self, WorkHandle) {
        let (status_tx, status_rx) = watch::channel(WorkStatus::Queued);
        let cell = Arc::new(WorkCell {
            status: status_tx,
            canceled: AtomicBool::new(false),
        });

        let item = Self {
            id,
            request,
            retries: 0,
            not_before,
            cell: Arc::clone(&cell),
        };
        let handle = WorkHandle {
            id,
            cell,
            status_rx,
        };
        (item, handle)
    }

    /// The item's id.
    #[must_use]
    pub const fn id(&self) -> WorkId {
        self.id
    }

    /// The originating request.
    #[must_use]
    pub const fn request(&self) -> &WorkRequest {
        &self.request
    }

    /// Publishes a new status to the handle.
    pub(crate) fn set_status(&self, status: WorkStatus) {
        self.cell.status.send_replace(status);
    }

    /// Whether the caller requested cancellation.
    pub(crate) fn is_canceled(&self) -> bool {
        self.cell.canceled.load(Ordering::SeqCst)
    }
}

/// Caller-side handle for polling status and requesting cancellation.
#[derive(Debug, Clone)]
pub struct WorkHandle {
    id: WorkId,
    cell: Arc<WorkCell>,
    status_rx: watch::Receiver<WorkStatus>,
}

impl WorkHandle {
    /// The id of the work item this handle tracks.
    #[must_use]
    pub const fn id(&self) -> WorkId {
        self.id
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> WorkStatus {
        self.status_rx.borrow().clone()
    }

    /// Requests best-effort cancellation.
    ///
    /// A queued item is dropped before dispatch; an in-flight call is not
    /// aborted but its result is discarded. Cancellation after success has
    /// no effect.
    pub fn cancel(&self) {
        self.cell.canceled.store(true, Ordering::SeqCst);
    }

    /// Waits until the item reaches a terminal status and returns it.
    pub async fn wait(&mut self) -> WorkStatus {
        loop {
            let status = self.status_rx.borrow_and_update().clone();
            if status.is_terminal() {
                return status;
            }
            if self.status_rx.changed().await.is_err() {
                // Scheduler dropped the item without a terminal status.
                return self.status_rx.borrow().clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!WorkStatus::Queued.is_terminal());
        assert!(!WorkStatus::Dispatching.is_terminal());
        assert!(!WorkStatus::Retrying { attempt: 1 }.is_terminal());
        assert!(WorkStatus::Succeeded.is_terminal());
        assert!(WorkStatus::Failed {
            reason: "x".to_owned()
        }
        .is_terminal());
        assert!(WorkStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_handle_observes_status_updates() {
        let request = WorkRequest::new(ActionKind::ViewBoost, "@news", 42);
        let (item, handle) = WorkItem::new(WorkId(1), request, None);

        assert_eq!(handle.status(), WorkStatus::Queued);
        item.set_status(WorkStatus::Dispatching);
        assert_eq!(handle.status(), WorkStatus::Dispatching);
    }

    #[test]
    fn test_cancel_flag_reaches_item() {
        let request = WorkRequest::new(ActionKind::Reaction, "@news", 42);
        let (item, handle) = WorkItem::new(WorkId(1), request, None);

        assert!(!item.is_canceled());
        handle.cancel();
        assert!(item.is_canceled());
    }

    #[test]
    fn test_action_kind_round_trip() {
        let json = serde_json::to_string(&ActionKind::ViewBoost).unwrap();
        assert_eq!(json, "\"view_boost\"");
        let back: ActionKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ActionKind::ViewBoost);
    }
}

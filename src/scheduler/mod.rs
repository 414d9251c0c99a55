//! Task scheduling.
//!
//! The scheduler owns the pending queue, the batch buffer, and the dispatch
//! loop; callers interact through a [`SchedulerHandle`] and per-item
//! [`WorkHandle`]s.

mod executor;
mod queue;
mod runner;
mod work;

pub use executor::{CallExecutor, DryRunExecutor};
pub use runner::{channel, SchedulerHandle, SchedulerMessage, SubmitError, TaskScheduler};
pub use work::{ActionKind, Priority, WorkHandle, WorkId, WorkItem, WorkRequest, WorkStatus};

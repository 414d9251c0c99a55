//! Workload file for the dry-run driver.
//!
//! A JSON list of requests, each optionally gated on a wall-clock time.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduler::{ActionKind, Priority, WorkRequest};

/// Errors that can occur loading a workload file.
#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("Failed to read workload file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse workload file: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// One requested action in the workload file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadEntry {
    /// What to do.
    pub action: ActionKind,

    /// Channel holding the target.
    pub channel: String,

    /// Target message id.
    pub message_id: i64,

    /// Dispatch priority.
    #[serde(default)]
    pub priority: Priority,

    /// Earliest time the request becomes eligible (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
}

impl WorkloadEntry {
    /// The scheduler request for this entry.
    #[must_use]
    pub fn to_request(&self) -> WorkRequest {
        WorkRequest::new(self.action, self.channel.clone(), self.message_id)
            .with_priority(self.priority)
    }

    /// Delay until the entry becomes eligible, if it lies in the future.
    #[must_use]
    pub fn delay_from(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let at = self.not_before?;
        (at > now).then(|| (at - now).to_std().unwrap_or_default())
    }
}

/// The full workload file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workload {
    /// Requests to submit, in file order.
    pub requests: Vec<WorkloadEntry>,
}

impl Workload {
    /// Loads a workload from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, WorkloadError> {
        let content = std::fs::read_to_string(path)?;
        let workload: Self = serde_json::from_str(&content)?;
        Ok(workload)
    }

    /// Saves the workload to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), WorkloadError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Number of requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the workload holds no requests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Creates an example workload for users to reference.
    #[must_use]
    pub fn example() -> Self {
        Self {
            requests: vec![
                WorkloadEntry {
                    action: ActionKind::ViewBoost,
                    channel: "@my_channel".to_owned(),
                    message_id: 1001,
                    priority: Priority::Normal,
                    not_before: None,
                },
                WorkloadEntry {
                    action: ActionKind::ViewBoost,
                    channel: "@my_channel".to_owned(),
                    message_id: 1002,
                    priority: Priority::Normal,
                    not_before: None,
                },
                WorkloadEntry {
                    action: ActionKind::Reaction,
                    channel: "@my_channel".to_owned(),
                    message_id: 1001,
                    priority: Priority::High,
                    not_before: None,
                },
            ],
        }
    }
}

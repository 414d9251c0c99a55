//! Executor boundary.
//!
//! The scheduler never speaks the platform protocol itself; it hands a
//! batch and an identity to a [`CallExecutor`] and interprets the result.
//! A real deployment implements this trait over a platform client; the
//! bundled [`DryRunExecutor`] only logs what would be sent.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::batcher::Batch;
use crate::error::CallError;
use crate::rotator::IdentityId;

/// Executes one batched platform call on behalf of an identity.
#[async_trait]
pub trait CallExecutor: Send + Sync {
    /// Performs the call. One invocation covers every item in the batch.
    async fn execute(&self, identity: &IdentityId, batch: &Batch) -> Result<(), CallError>;
}

/// Executor that logs each batch and reports success.
///
/// Used by the driver binary to rehearse rate limits and rotation without
/// touching the platform.
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    /// Simulated per-call latency.
    pub latency: Duration,
}

impl DryRunExecutor {
    /// Creates a dry-run executor with the given simulated latency.
    #[must_use]
    pub const fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl CallExecutor for DryRunExecutor {
    async fn execute(&self, identity: &IdentityId, batch: &Batch) -> Result<(), CallError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        info!(
            "[dry-run] {} would {} on {} targets in {}",
            identity,
            batch.key().action,
            batch.len(),
            batch.key().channel
        );
        Ok(())
    }
}

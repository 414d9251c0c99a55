//! Rate limiter for per-identity API call budgets.
//!
//! Tracks a per-minute and per-hour window for every identity and admits
//! calls only while both are below their caps. Admission check-and-increment
//! is one atomic step per identity, so concurrent dispatchers can never
//! overdraw a budget.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::budget::CallBudget;
use super::RateLimits;
use crate::rotator::IdentityId;

/// Outcome of a rate limit acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The call was admitted and counted against both windows.
    Allowed,

    /// The call was denied; capacity frees after `retry_after`.
    Denied {
        /// Time until the nearest window (or penalty) frees capacity.
        retry_after: Duration,
    },
}

/// Rate limiter enforcing per-identity call caps over rolling windows.
#[derive(Debug)]
pub struct RateLimiter {
    /// Window caps applied to every identity.
    limits: RateLimits,

    /// Per-identity budgets, created lazily on first use.
    budgets: Mutex<HashMap<IdentityId, CallBudget>>,
}

impl RateLimiter {
    /// Creates a rate limiter with the given caps.
    #[must_use]
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            budgets: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts to admit one call for the identity.
    ///
    /// Rolls any expired window first, then admits if both counters are
    /// below cap, incrementing them together.
    pub async fn try_acquire(&self, identity: &IdentityId) -> Admission {
        let now = Instant::now();
        let mut budgets = self.budgets.lock().await;
        let budget = budgets
            .entry(identity.clone())
            .or_insert_with(|| CallBudget::new(self.limits, now));

        match budget.try_consume(now) {
            Ok(()) => Admission::Allowed,
            Err(retry_after) => {
                debug!(
                    "Rate limit denied for {}: retry in {:?}",
                    identity, retry_after
                );
                Admission::Denied { retry_after }
            }
        }
    }

    /// Whether a call would currently be admitted, without consuming budget.
    pub async fn would_admit(&self, identity: &IdentityId) -> bool {
        let now = Instant::now();
        let mut budgets = self.budgets.lock().await;
        budgets
            .entry(identity.clone())
            .or_insert_with(|| CallBudget::new(self.limits, now))
            .would_admit(now)
    }

    /// Current window utilization for the identity (0.0 = idle, 1.0 = full).
    pub async fn utilization(&self, identity: &IdentityId) -> f64 {
        let now = Instant::now();
        let mut budgets = self.budgets.lock().await;
        budgets
            .entry(identity.clone())
            .or_insert_with(|| CallBudget::new(self.limits, now))
            .utilization(now)
    }

    /// Time until the identity can make another call (zero if now).
    pub async fn time_until_capacity(&self, identity: &IdentityId) -> Duration {
        let now = Instant::now();
        let budgets = self.budgets.lock().await;
        budgets
            .get(identity)
            .map_or(Duration::ZERO, |b| b.time_until_capacity(now))
    }

    /// Applies a server-imposed wait to the identity's budget.
    ///
    /// The budget stays closed until the wait elapses, regardless of window
    /// capacity.
    pub async fn penalize(&self, identity: &IdentityId, wait: Duration) {
        warn!("Penalizing {} for {:?} (flood wait)", identity, wait);
        let now = Instant::now();
        let mut budgets = self.budgets.lock().await;
        budgets
            .entry(identity.clone())
            .or_insert_with(|| CallBudget::new(self.limits, now))
            .penalize(now, wait);
    }

    /// Resets the identity's budget, allowing immediate calls.
    pub async fn reset(&self, identity: &IdentityId) {
        let now = Instant::now();
        let mut budgets = self.budgets.lock().await;
        if let Some(budget) = budgets.get_mut(identity) {
            budget.reset(now);
        }
    }

    /// The caps this limiter enforces.
    #[must_use]
    pub const fn limits(&self) -> RateLimits {
        self.limits
    }
}

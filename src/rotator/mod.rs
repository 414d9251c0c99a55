//! Identity pool and rotation policy.
//!
//! The rotator picks which credentialed identity executes the next unit of
//! work: lowest window utilization first, ties broken least-recently-used,
//! skipping identities that are disabled, cooling down, breaker-blocked, or
//! out of budget. When nobody qualifies it reports backpressure with a hint
//! for when capacity next frees up.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::breaker::CircuitBreaker;
use crate::limiter::RateLimiter;

/// Unique identifier of a credentialed execution context (one account).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    /// Creates an identity id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One identity in the rotation pool.
#[derive(Debug, Clone)]
pub struct Identity {
    id: IdentityId,
    enabled: bool,
    cooldown_until: Option<Instant>,
    last_used: Option<Instant>,
}

impl Identity {
    /// Creates a pool entry for the identity.
    #[must_use]
    pub const fn new(id: IdentityId, enabled: bool) -> Self {
        Self {
            id,
            enabled,
            cooldown_until: None,
            last_used: None,
        }
    }

    /// The identity's id.
    #[must_use]
    pub const fn id(&self) -> &IdentityId {
        &self.id
    }

    /// Whether the operator has this identity enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// No identity can take work right now; backpressure.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("no identity available")]
pub struct NoCapacity {
    /// When the nearest identity frees up, if the wait is clock-driven.
    pub retry_after: Option<Duration>,
}

/// Picks the identity that should execute the next call.
#[derive(Debug)]
pub struct AccountRotator {
    pool: Mutex<Vec<Identity>>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
}

impl AccountRotator {
    /// Creates a rotator over the given pool.
    #[must_use]
    pub fn new(
        identities: Vec<Identity>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            pool: Mutex::new(identities),
            limiter,
            breaker,
        }
    }

    /// Selects an identity for the next call and marks it used.
    ///
    /// Eligible identities are enabled, past any cooldown, accepted by
    /// their breaker, and within budget. Among those, lowest current
    /// utilization wins; ties go to the least recently used.
    ///
    /// # Errors
    ///
    /// Returns [`NoCapacity`] when every identity is blocked, with the
    /// shortest clock-driven wait observed (if any) as a resume hint.
    pub async fn select_identity(&self) -> Result<IdentityId, NoCapacity> {
        let now = Instant::now();
        let mut pool = self.pool.lock().await;

        let mut best: Option<(f64, Option<Instant>, usize)> = None;
        let mut nearest: Option<Duration> = None;

        for (index, identity) in pool.iter().enumerate() {
            if !identity.enabled {
                continue;
            }

            if let Some(until) = identity.cooldown_until
                && until > now
            {
                merge_hint(&mut nearest, until.saturating_duration_since(now));
                continue;
            }

            if !self.breaker.is_available(&identity.id).await {
                if let Some(wait) = self.breaker.time_until_trial(&identity.id).await {
                    merge_hint(&mut nearest, wait);
                }
                continue;
            }

            if !self.limiter.would_admit(&identity.id).await {
                merge_hint(
                    &mut nearest,
                    self.limiter.time_until_capacity(&identity.id).await,
                );
                continue;
            }

            let utilization = self.limiter.utilization(&identity.id).await;
            let candidate = (utilization, identity.last_used, index);
            let better = match &best {
                None => true,
                Some((best_util, best_used, _)) => {
                    utilization < *best_util
                        || (utilization <= *best_util && identity.last_used < *best_used)
                }
            };
            if better {
                best = Some(candidate);
            }
        }

        match best {
            Some((utilization, _, index)) => {
                let identity = &mut pool[index];
                identity.last_used = Some(now);
                debug!(
                    "Selected identity {} (utilization {:.2})",
                    identity.id, utilization
                );
                Ok(identity.id.clone())
            }
            None => {
                debug!("No identity available, retry hint: {:?}", nearest);
                Err(NoCapacity {
                    retry_after: nearest,
                })
            }
        }
    }

    /// Enables or disables an identity. Returns false if unknown.
    pub async fn set_enabled(&self, id: &IdentityId, enabled: bool) -> bool {
        let mut pool = self.pool.lock().await;
        match pool.iter_mut().find(|i| &i.id == id) {
            Some(identity) => {
                identity.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Puts an identity on cooldown; it is skipped until the wait elapses.
    pub async fn apply_cooldown(&self, id: &IdentityId, wait: Duration) {
        let mut pool = self.pool.lock().await;
        if let Some(identity) = pool.iter_mut().find(|i| &i.id == id) {
            identity.cooldown_until = Some(Instant::now() + wait);
        }
    }

    /// Ids of every identity in the pool.
    pub async fn identities(&self) -> Vec<IdentityId> {
        self.pool.lock().await.iter().map(|i| i.id.clone()).collect()
    }

    /// Number of identities in the pool.
    pub async fn len(&self) -> usize {
        self.pool.lock().await.len()
    }

    /// Whether the pool is empty.
    pub async fn is_empty(&self) -> bool {
        self.pool.lock().await.is_empty()
    }
}

/// Keeps the smaller of two wake-up hints.
fn merge_hint(nearest: &mut Option<Duration>, wait: Duration) {
    *nearest = Some(nearest.map_or(wait, |cur| cur.min(wait)));
}

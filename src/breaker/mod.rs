//! Circuit breaker isolating failing identities.
//!
//! Each identity gets an independent breaker. Repeated transient failures
//! open it; while open all calls fail fast. After the cooldown elapses one
//! trial call is allowed through: success closes the breaker, failure
//! reopens it. Permanent failures (bad target, missing permission) never
//! move the breaker.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::CallError;
use crate::rotator::IdentityId;

/// Breaker tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Consecutive transient failures before the breaker opens.
    pub failure_threshold: u32,

    /// How long an open breaker waits before allowing a trial call.
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Call rejected because the identity's breaker is open.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("circuit breaker open: retry in {retry_after:?}")]
pub struct BreakerOpen {
    /// Time until a trial call will be allowed (zero when a trial is
    /// already in flight).
    pub retry_after: Duration,
}

/// Error from a guarded call: short-circuited or failed in execution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error(transparent)]
    Open(#[from] BreakerOpen),

    #[error(transparent)]
    Call(#[from] CallError),
}

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Failing fast; no calls allowed.
    Open,
    /// Cooldown elapsed; a single trial call decides the next state.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Per-identity breaker bookkeeping.
#[derive(Debug, Clone, Copy)]
enum Inner {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { trial_inflight: bool },
}

impl Default for Inner {
    fn default() -> Self {
        Self::Closed { failures: 0 }
    }
}

/// Breaker statistics for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u64,
}

/// Circuit breaker tracking every identity's failure state.
#[derive(Debug)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    states: Mutex<HashMap<IdentityId, (Inner, u64)>>,
}

impl CircuitBreaker {
    /// Creates a breaker with the given settings.
    #[must_use]
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Checks whether a call may proceed for the identity.
    ///
    /// An open breaker whose cooldown has elapsed transitions to half-open
    /// here and admits the caller as the single trial; concurrent callers
    /// are rejected until the trial resolves.
    pub async fn check(&self, identity: &IdentityId) -> Result<(), BreakerOpen> {
        let now = Instant::now();
        let mut states = self.states.lock().await;
        let (inner, _) = states.entry(identity.clone()).or_default();

        match *inner {
            Inner::Closed { .. } => Ok(()),
            Inner::Open { since } => {
                let elapsed = now.saturating_duration_since(since);
                if elapsed >= self.settings.cooldown {
                    info!("Breaker for {} half-open, allowing trial call", identity);
                    *inner = Inner::HalfOpen {
                        trial_inflight: true,
                    };
                    Ok(())
                } else {
                    Err(BreakerOpen {
                        retry_after: self.settings.cooldown - elapsed,
                    })
                }
            }
            Inner::HalfOpen { trial_inflight } => {
                if trial_inflight {
                    Err(BreakerOpen {
                        retry_after: Duration::ZERO,
                    })
                } else {
                    *inner = Inner::HalfOpen {
                        trial_inflight: true,
                    };
                    Ok(())
                }
            }
        }
    }

    /// Records a successful call, closing a half-open breaker.
    pub async fn record_success(&self, identity: &IdentityId) {
        let mut states = self.states.lock().await;
        let (inner, successes) = states.entry(identity.clone()).or_default();
        *successes += 1;

        match *inner {
            Inner::HalfOpen { .. } => {
                info!("Breaker for {} recovered, closing", identity);
                *inner = Inner::Closed { failures: 0 };
            }
            Inner::Closed { .. } => {
                *inner = Inner::Closed { failures: 0 };
            }
            Inner::Open { .. } => {
                // Late success from a call that was in flight when the
                // breaker opened; the cooldown still applies.
            }
        }
    }

    /// Records a transient failure, opening the breaker at the threshold.
    ///
    /// Callers must classify first: permanent failures do not belong here.
    pub async fn record_failure(&self, identity: &IdentityId) {
        let now = Instant::now();
        let mut states = self.states.lock().await;
        let (inner, _) = states.entry(identity.clone()).or_default();

        match *inner {
            Inner::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.settings.failure_threshold {
                    warn!(
                        "Breaker for {} opening after {} consecutive failures",
                        identity, failures
                    );
                    *inner = Inner::Open { since: now };
                } else {
                    *inner = Inner::Closed { failures };
                }
            }
            Inner::HalfOpen { .. } => {
                warn!("Breaker for {} trial call failed, reopening", identity);
                *inner = Inner::Open { since: now };
            }
            Inner::Open { .. } => {
                *inner = Inner::Open { since: now };
            }
        }
    }

    /// Runs an operation under breaker protection.
    ///
    /// Transient failures are recorded against the breaker; permanent ones
    /// pass straight through.
    pub async fn guard<F, Fut, T>(
        &self,
        identity: &IdentityId,
        operation: F,
    ) -> Result<T, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.check(identity).await?;

        match operation().await {
            Ok(value) => {
                self.record_success(identity).await;
                Ok(value)
            }
            Err(err) => {
                if err.is_transient() {
                    self.record_failure(identity).await;
                }
                Err(GuardError::Call(err))
            }
        }
    }

    /// Current state snapshot for the identity.
    pub async fn state(&self, identity: &IdentityId) -> BreakerState {
        let states = self.states.lock().await;
        match states.get(identity).map(|(inner, _)| *inner) {
            None | Some(Inner::Closed { .. }) => BreakerState::Closed,
            Some(Inner::Open { .. }) => BreakerState::Open,
            Some(Inner::HalfOpen { .. }) => BreakerState::HalfOpen,
        }
    }

    /// Whether the identity can take a call right now (closed, trial slot
    /// free, or open with cooldown elapsed).
    pub async fn is_available(&self, identity: &IdentityId) -> bool {
        let now = Instant::now();
        let states = self.states.lock().await;
        match states.get(identity).map(|(inner, _)| *inner) {
            None | Some(Inner::Closed { .. }) => true,
            Some(Inner::Open { since }) => {
                now.saturating_duration_since(since) >= self.settings.cooldown
            }
            Some(Inner::HalfOpen { trial_inflight }) => !trial_inflight,
        }
    }

    /// Time until an unavailable identity will accept a trial call.
    ///
    /// `None` when the identity is available now, or when the wait depends
    /// on an in-flight trial rather than the clock.
    pub async fn time_until_trial(&self, identity: &IdentityId) -> Option<Duration> {
        let now = Instant::now();
        let states = self.states.lock().await;
        match states.get(identity).map(|(inner, _)| *inner) {
            Some(Inner::Open { since }) => {
                let elapsed = now.saturating_duration_since(since);
                (elapsed < self.settings.cooldown).then(|| self.settings.cooldown - elapsed)
            }
            _ => None,
        }
    }

    /// Statistics snapshot for the identity.
    pub async fn stats(&self, identity: &IdentityId) -> BreakerStats {
        let states = self.states.lock().await;
        let (inner, successes) = states
            .get(identity)
            .map_or((Inner::default(), 0), |(inner, s)| (*inner, *s));

        let (state, failure_count) = match inner {
            Inner::Closed { failures } => (BreakerState::Closed, failures),
            Inner::Open { .. } => (BreakerState::Open, self.settings.failure_threshold),
            Inner::HalfOpen { .. } => (BreakerState::HalfOpen, self.settings.failure_threshold),
        };

        BreakerStats {
            state,
            failure_count,
            success_count: successes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> IdentityId {
        IdentityId::new(name)
    }

    fn breaker(threshold: u32, cooldown_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerSettings {
            failure_threshold: threshold,
            cooldown: Duration::from_secs(cooldown_secs),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold() {
        let cb = breaker(5, 60);
        let acc = id("acc1");

        for _ in 0..4 {
            cb.record_failure(&acc).await;
            assert_eq!(cb.state(&acc).await, BreakerState::Closed);
        }
        cb.record_failure(&acc).await;
        assert_eq!(cb.state(&acc).await, BreakerState::Open);

        let err = cb.check(&acc).await.unwrap_err();
        assert!(err.retry_after > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let cb = breaker(3, 60);
        let acc = id("acc1");

        cb.record_failure(&acc).await;
        cb.record_failure(&acc).await;
        cb.record_success(&acc).await;
        cb.record_failure(&acc).await;
        cb.record_failure(&acc).await;
        assert_eq!(cb.state(&acc).await, BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_single_trial_then_close() {
        let cb = breaker(1, 30);
        let acc = id("acc1");

        cb.record_failure(&acc).await;
        assert_eq!(cb.state(&acc).await, BreakerState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;

        // First caller gets the trial, second is rejected.
        assert!(cb.check(&acc).await.is_ok());
        assert_eq!(cb.state(&acc).await, BreakerState::HalfOpen);
        assert!(cb.check(&acc).await.is_err());

        cb.record_success(&acc).await;
        assert_eq!(cb.state(&acc).await, BreakerState::Closed);
        assert!(cb.check(&acc).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_failure_reopens() {
        let cb = breaker(1, 30);
        let acc = id("acc1");

        cb.record_failure(&acc).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.check(&acc).await.is_ok());

        cb.record_failure(&acc).await;
        assert_eq!(cb.state(&acc).await, BreakerState::Open);
        assert!(cb.check(&acc).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_for_full_cooldown() {
        let cb = breaker(1, 30);
        let acc = id("acc1");

        cb.record_failure(&acc).await;

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cb.check(&acc).await.is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cb.check(&acc).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_counts_only_transient_failures() {
        let cb = breaker(1, 60);
        let acc = id("acc1");

        let result: Result<(), GuardError> = cb
            .guard(&acc, || async {
                Err(CallError::InvalidTarget("@gone".to_owned()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(cb.state(&acc).await, BreakerState::Closed);

        let result: Result<(), GuardError> =
            cb.guard(&acc, || async { Err(CallError::Timeout) }).await;
        assert!(result.is_err());
        assert_eq!(cb.state(&acc).await, BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_short_circuits_when_open() {
        let cb = breaker(1, 60);
        let acc = id("acc1");

        cb.record_failure(&acc).await;

        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_inner = std::sync::Arc::clone(&ran);
        let result: Result<(), GuardError> = cb
            .guard(&acc, || async move {
                ran_inner.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(GuardError::Open(_))));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_snapshot() {
        let cb = breaker(2, 60);
        let acc = id("acc1");

        cb.record_success(&acc).await;
        cb.record_failure(&acc).await;

        let stats = cb.stats(&acc).await;
        assert_eq!(stats.state, BreakerState::Closed);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.success_count, 1);
    }
}

//! Task scheduler runner.
//!
//! A single logical loop coordinates many in-flight calls:
//! 1. Ready items are popped in priority-then-FIFO order and buffered into
//!    batches.
//! 2. A batch that fills up, or whose window expires, is dispatched: the
//!    rotator picks an identity, the limiter admits the call, the breaker
//!    is consulted, and the executor runs on a spawned task.
//! 3. Outcomes come back through the join set: success resolves every item
//!    in the batch, a transient failure re-enqueues them with backoff, a
//!    permanent failure resolves them as failed.
//!
//! When no identity has capacity the loop stops dequeuing and sleeps until
//! the nearest budget or breaker frees up. Calls on the same identity are
//! serialized through a per-identity lock; calls across identities run
//! concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::executor::CallExecutor;
use super::queue::PendingQueue;
use super::work::{WorkHandle, WorkId, WorkItem, WorkRequest, WorkStatus};
use crate::batcher::{Batch, BatchBuffer};
use crate::breaker::CircuitBreaker;
use crate::config::SchedulerSettings;
use crate::error::CallError;
use crate::limiter::{Admission, RateLimiter};
use crate::rotator::{AccountRotator, Identity, IdentityId, NoCapacity};

/// Messages that can be sent to the scheduler.
#[derive(Debug)]
pub enum SchedulerMessage {
    /// Enqueue a new work item.
    Submit(Box<WorkItem>),
    /// Stop the scheduler.
    Shutdown,
}

/// Error submitting work to the scheduler.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("scheduler is not running")]
    Closed,
}

/// Caller-side handle for submitting work.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerMessage>,
    next_id: Arc<AtomicU64>,
}

/// Creates the scheduler command channel and its submission handle.
#[must_use]
pub fn channel(capacity: usize) -> (SchedulerHandle, mpsc::Receiver<SchedulerMessage>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        SchedulerHandle {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        },
        rx,
    )
}

impl SchedulerHandle {
    /// Enqueues a request, returning a handle for status and cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Closed`] if the scheduler has stopped.
    pub async fn submit(&self, request: WorkRequest) -> Result<WorkHandle, SubmitError> {
        self.submit_after(request, Duration::ZERO).await
    }

    /// Enqueues a request that becomes eligible only after the delay.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Closed`] if the scheduler has stopped.
    pub async fn submit_after(
        &self,
        request: WorkRequest,
        delay: Duration,
    ) -> Result<WorkHandle, SubmitError> {
        let id = WorkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let not_before = (!delay.is_zero()).then(|| Instant::now() + delay);
        let (item, handle) = WorkItem::new(id, request, not_before);

        self.tx
            .send(SchedulerMessage::Submit(Box::new(item)))
            .await
            .map_err(|_| SubmitError::Closed)?;
        Ok(handle)
    }

    /// Asks the scheduler to stop after draining in-flight calls.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(SchedulerMessage::Shutdown).await;
    }
}

/// Result of one dispatched batch, reported back to the loop.
struct DispatchOutcome {
    batch: Batch,
    identity: IdentityId,
    result: Result<(), CallError>,
}

/// Multi-account call scheduler.
pub struct TaskScheduler {
    settings: SchedulerSettings,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    rotator: Arc<AccountRotator>,
    executor: Arc<dyn CallExecutor>,

    queue: PendingQueue,
    batches: BatchBuffer,

    /// Batches that could not be dispatched for lack of capacity.
    blocked: Vec<Batch>,

    /// Dequeuing is suspended until this instant.
    stalled_until: Option<Instant>,

    /// Per-identity locks serializing calls on one credentialed session.
    session_locks: HashMap<IdentityId, Arc<Mutex<()>>>,

    /// Fallback poll interval while work is blocked without a clock hint.
    check_interval: Duration,
}

impl TaskScheduler {
    /// Creates a scheduler over the given identity pool and executor.
    #[must_use]
    pub fn new(
        settings: SchedulerSettings,
        pool: Vec<Identity>,
        executor: Arc<dyn CallExecutor>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(settings.rate_limits()));
        let breaker = Arc::new(CircuitBreaker::new(settings.breaker_settings()));
        let rotator = Arc::new(AccountRotator::new(
            pool,
            Arc::clone(&limiter),
            Arc::clone(&breaker),
        ));
        let batches = BatchBuffer::new(settings.batch_window(), settings.batch.max_size);

        Self {
            settings,
            limiter,
            breaker,
            rotator,
            executor,
            queue: PendingQueue::new(),
            batches,
            blocked: Vec::new(),
            stalled_until: None,
            session_locks: HashMap::new(),
            check_interval: Duration::from_secs(1),
        }
    }

    /// The rotator, for operator actions (enable/disable, cooldowns).
    #[must_use]
    pub fn rotator(&self) -> &Arc<AccountRotator> {
        &self.rotator
    }

    /// The circuit breaker, for stats snapshots.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// The rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Runs the scheduler loop until shutdown.
    pub async fn run(mut self, mut rx: mpsc::Receiver<SchedulerMessage>) {
        info!(
            "Task scheduler started ({} identities)",
            self.rotator.len().await
        );

        let mut tasks: JoinSet<DispatchOutcome> = JoinSet::new();

        loop {
            self.pump(&mut tasks).await;

            let wake = self
                .next_wake()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(SchedulerMessage::Submit(item)) => {
                            debug!("Work item {} submitted", item.id());
                            self.queue.push(*item);
                        }
                        Some(SchedulerMessage::Shutdown) | None => {
                            info!("Scheduler shutting down");
                            break;
                        }
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok(outcome) => self.apply_outcome(outcome).await,
                        Err(e) => error!("Dispatch task failed: {}", e),
                    }
                }
                () = tokio::time::sleep_until(wake) => {}
            }
        }

        self.drain(tasks).await;
    }

    /// Moves ready work into batches and dispatches everything due.
    async fn pump(&mut self, tasks: &mut JoinSet<DispatchOutcome>) {
        let now = Instant::now();

        if self.stalled_until.is_some_and(|until| until > now) {
            return;
        }
        self.stalled_until = None;

        let mut due: Vec<Batch> = std::mem::take(&mut self.blocked);

        while let Some(item) = self.queue.pop_ready(now) {
            if item.is_canceled() {
                debug!("Work item {} canceled before dispatch", item.id());
                item.set_status(WorkStatus::Canceled);
                continue;
            }
            if let Some(full) = self.batches.insert(item) {
                due.push(full);
            }
        }

        due.extend(self.batches.take_due(now));

        for batch in due {
            if self
                .stalled_until
                .is_some_and(|until| until > Instant::now())
            {
                self.blocked.push(batch);
                continue;
            }
            self.dispatch(batch, tasks).await;
        }
    }

    /// Dispatches one batch on a freshly selected identity.
    ///
    /// Items canceled while they sat in the batch buffer are dropped here,
    /// before the platform call, and never reach the executor.
    async fn dispatch(&mut self, mut batch: Batch, tasks: &mut JoinSet<DispatchOutcome>) {
        for item in batch.take_canceled() {
            debug!("Work item {} canceled before dispatch", item.id());
            item.set_status(WorkStatus::Canceled);
        }
        if batch.is_empty() {
            return;
        }

        let identity = match self.rotator.select_identity().await {
            Ok(identity) => identity,
            Err(NoCapacity { retry_after }) => {
                debug!(
                    "Backpressure: no identity available for {} ({} items)",
                    batch.key(),
                    batch.len()
                );
                self.stall(batch, retry_after);
                return;
            }
        };

        match self.limiter.try_acquire(&identity).await {
            Admission::Allowed => {}
            Admission::Denied { retry_after } => {
                self.stall(batch, Some(retry_after));
                return;
            }
        }

        if let Err(open) = self.breaker.check(&identity).await {
            self.stall(
                batch,
                (!open.retry_after.is_zero()).then_some(open.retry_after),
            );
            return;
        }

        debug!(
            "Dispatching {} ({} items) on {}",
            batch.key(),
            batch.len(),
            identity
        );
        for item in batch.items() {
            if !item.is_canceled() {
                item.set_status(WorkStatus::Dispatching);
            }
        }

        let lock = Arc::clone(self.session_locks.entry(identity.clone()).or_default());
        let executor = Arc::clone(&self.executor);
        tasks.spawn(async move {
            // Calls on one identity are serialized; other identities
            // proceed concurrently.
            let _session = lock.lock().await;
            let result = executor.execute(&identity, &batch).await;
            DispatchOutcome {
                batch,
                identity,
                result,
            }
        });
    }

    /// Parks a batch and suspends dequeuing until capacity frees.
    fn stall(&mut self, batch: Batch, retry_after: Option<Duration>) {
        self.blocked.push(batch);
        if let Some(wait) = retry_after {
            let until = Instant::now() + wait;
            self.stalled_until = Some(self.stalled_until.map_or(until, |cur| cur.min(until)));
        }
    }

    /// Applies one dispatch outcome to every item of the batch.
    async fn apply_outcome(&mut self, outcome: DispatchOutcome) {
        let DispatchOutcome {
            batch,
            identity,
            result,
        } = outcome;

        match result {
            Ok(()) => {
                self.breaker.record_success(&identity).await;
                debug!("Batch {} succeeded on {}", batch.key(), identity);
                for item in batch.into_items() {
                    if item.is_canceled() {
                        // The call already ran; its result is discarded.
                        item.set_status(WorkStatus::Canceled);
                    } else {
                        item.set_status(WorkStatus::Succeeded);
                    }
                }
            }
            Err(err) if err.is_transient() => {
                warn!("Batch {} failed on {}: {}", batch.key(), identity, err);
                self.breaker.record_failure(&identity).await;
                if let Some(penalty) = err.penalty() {
                    self.limiter.penalize(&identity, penalty).await;
                    self.rotator.apply_cooldown(&identity, penalty).await;
                }

                let now = Instant::now();
                for mut item in batch.into_items() {
                    if item.is_canceled() {
                        item.set_status(WorkStatus::Canceled);
                        continue;
                    }

                    item.retries += 1;
                    if item.retries > self.settings.retry.max_retries {
                        warn!(
                            "Work item {} exhausted {} retries",
                            item.id(),
                            self.settings.retry.max_retries
                        );
                        item.set_status(WorkStatus::Failed {
                            reason: err.to_string(),
                        });
                    } else {
                        let delay = self.settings.retry.delay(item.retries);
                        item.not_before = Some(now + delay);
                        item.set_status(WorkStatus::Retrying {
                            attempt: item.retries,
                        });
                        self.queue.push(item);
                    }
                }
            }
            Err(err) => {
                warn!(
                    "Batch {} permanently failed on {}: {}",
                    batch.key(),
                    identity,
                    err
                );
                for item in batch.into_items() {
                    if item.is_canceled() {
                        item.set_status(WorkStatus::Canceled);
                    } else {
                        item.set_status(WorkStatus::Failed {
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Next instant the loop must wake up at, if any.
    fn next_wake(&self) -> Option<Instant> {
        let mut wake = self.queue.next_wake();
        for candidate in [self.batches.next_deadline(), self.stalled_until] {
            wake = match (wake, candidate) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }

        if wake.is_none() && (!self.blocked.is_empty() || !self.batches.is_empty()) {
            wake = Some(Instant::now() + self.check_interval);
        }
        wake
    }

    /// Waits for in-flight calls to finish and reports what never ran.
    async fn drain(&mut self, mut tasks: JoinSet<DispatchOutcome>) {
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => self.apply_outcome(outcome).await,
                Err(e) => error!("Dispatch task failed during drain: {}", e),
            }
        }

        let pending = self.queue.len()
            + self.batches.len()
            + self.blocked.iter().map(Batch::len).sum::<usize>();
        if pending > 0 {
            info!("Scheduler stopped with {} items still pending", pending);
        }
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("settings", &self.settings)
            .field("queued", &self.queue.len())
            .field("buffered", &self.batches.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;

    use super::*;
    use crate::config::{BatchTuning, BreakerTuning, RateSettings, RetryTuning};
    use crate::scheduler::{ActionKind, Priority};

    /// One observed executor invocation.
    #[derive(Debug, Clone)]
    struct Call {
        identity: IdentityId,
        channel: String,
        size: usize,
        at: Instant,
    }

    /// Records every call and answers from a scripted list of outcomes;
    /// once the script runs out, every call succeeds.
    struct ScriptedExecutor {
        calls: Mutex<Vec<Call>>,
        script: Mutex<Vec<Result<(), CallError>>>,
    }

    impl ScriptedExecutor {
        fn new(script: Vec<Result<(), CallError>>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                script: Mutex::new(script),
            }
        }

        fn always_ok() -> Self {
            Self::new(Vec::new())
        }

        async fn calls(&self) -> Vec<Call> {
            self.calls.lock().await.clone()
        }
    }

    #[async_trait]
    impl CallExecutor for ScriptedExecutor {
        async fn execute(&self, identity: &IdentityId, batch: &Batch) -> Result<(), CallError> {
            self.calls.lock().await.push(Call {
                identity: identity.clone(),
                channel: batch.key().channel.clone(),
                size: batch.len(),
                at: Instant::now(),
            });

            let mut script = self.script.lock().await;
            if script.is_empty() {
                Ok(())
            } else {
                script.remove(0)
            }
        }
    }

    /// Succeeds after a fixed in-call delay.
    struct SlowExecutor {
        latency: Duration,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CallExecutor for SlowExecutor {
        async fn execute(&self, _identity: &IdentityId, _batch: &Batch) -> Result<(), CallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            Ok(())
        }
    }

    /// Fails transiently a fixed number of times, then succeeds.
    struct FlakyExecutor {
        remaining_failures: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyExecutor {
        fn new(failures: u32) -> Self {
            Self {
                remaining_failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl CallExecutor for FlakyExecutor {
        async fn execute(&self, _identity: &IdentityId, _batch: &Batch) -> Result<(), CallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.remaining_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.remaining_failures.store(left - 1, Ordering::SeqCst);
                Err(CallError::Timeout)
            } else {
                Ok(())
            }
        }
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            rate: RateSettings {
                per_minute: 100,
                per_hour: 1000,
            },
            breaker: BreakerTuning {
                failure_threshold: 50,
                cooldown_secs: 5,
            },
            batch: BatchTuning {
                window_ms: 50,
                max_size: 10,
            },
            retry: RetryTuning {
                max_retries: 3,
                backoff_base_ms: 100,
                backoff_multiplier: 2.0,
                backoff_max_secs: 10,
                jitter: 0.0,
            },
        }
    }

    fn pool(names: &[&str]) -> Vec<Identity> {
        names
            .iter()
            .map(|n| Identity::new(IdentityId::new(*n), true))
            .collect()
    }

    fn spawn_scheduler(
        settings: SchedulerSettings,
        pool: Vec<Identity>,
        executor: Arc<impl CallExecutor + 'static>,
    ) -> SchedulerHandle {
        let (handle, rx) = channel(64);
        let scheduler = TaskScheduler::new(settings, pool, executor);
        tokio::spawn(scheduler.run(rx));
        handle
    }

    fn request(channel_name: &str, message_id: i64) -> WorkRequest {
        WorkRequest::new(ActionKind::ViewBoost, channel_name, message_id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_compatible_items_dispatch_as_one_batch() {
        let executor = Arc::new(ScriptedExecutor::always_ok());
        let handle = spawn_scheduler(settings(), pool(&["a"]), Arc::clone(&executor));

        let mut handles = Vec::new();
        for i in 0..3 {
            handles.push(handle.submit(request("@news", i)).await.unwrap());
        }
        for h in &mut handles {
            assert_eq!(h.wait().await, WorkStatus::Succeeded);
        }

        let calls = executor.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].size, 3);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_minute_cap_delays_third_call() {
        let mut cfg = settings();
        cfg.rate.per_minute = 2;
        cfg.batch.max_size = 1;

        let executor = Arc::new(ScriptedExecutor::always_ok());
        let handle = spawn_scheduler(cfg, pool(&["a"]), Arc::clone(&executor));

        let mut handles = Vec::new();
        for i in 0..3 {
            handles.push(handle.submit(request("@news", i)).await.unwrap());
        }
        for h in &mut handles {
            assert_eq!(h.wait().await, WorkStatus::Succeeded);
        }

        let calls = executor.calls().await;
        assert_eq!(calls.len(), 3);
        // The third call had to wait for the minute window to roll.
        let gap = calls[2].at.duration_since(calls[0].at);
        assert!(gap >= Duration::from_secs(59), "gap was {gap:?}");

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retry_then_succeed() {
        let executor = Arc::new(FlakyExecutor::new(2));
        let handle = spawn_scheduler(settings(), pool(&["a"]), Arc::clone(&executor));

        let mut h = handle.submit(request("@news", 1)).await.unwrap();
        assert_eq!(h.wait().await, WorkStatus::Succeeded);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ceiling_ends_failed_terminal() {
        let mut cfg = settings();
        cfg.retry.max_retries = 2;

        let executor = Arc::new(FlakyExecutor::new(u32::MAX));
        let handle = spawn_scheduler(cfg, pool(&["a"]), Arc::clone(&executor));

        let mut h = handle.submit(request("@news", 1)).await.unwrap();
        let status = h.wait().await;
        assert!(matches!(status, WorkStatus::Failed { .. }), "{status}");
        // Initial attempt plus two retries.
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_surfaces_immediately() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Err(CallError::InvalidTarget(
            "@gone".to_owned(),
        ))]));
        let handle = spawn_scheduler(settings(), pool(&["a"]), Arc::clone(&executor));

        let mut h = handle.submit(request("@gone", 1)).await.unwrap();
        let status = h.wait().await;
        assert!(matches!(status, WorkStatus::Failed { .. }));
        assert_eq!(executor.calls().await.len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_dispatch() {
        let executor = Arc::new(ScriptedExecutor::always_ok());
        let handle = spawn_scheduler(settings(), pool(&["a"]), Arc::clone(&executor));

        let mut h = handle
            .submit_after(request("@news", 1), Duration::from_secs(30))
            .await
            .unwrap();
        h.cancel();

        assert_eq!(h.wait().await, WorkStatus::Canceled);
        assert!(executor.calls().await.is_empty());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_in_buffer_excluded_from_batch() {
        let executor = Arc::new(ScriptedExecutor::always_ok());
        let handle = spawn_scheduler(settings(), pool(&["a"]), Arc::clone(&executor));

        let mut kept = handle.submit(request("@news", 1)).await.unwrap();
        let mut dropped = handle.submit(request("@news", 2)).await.unwrap();

        // Both items sit in the same batch bucket; cancel one before the
        // window flushes.
        tokio::time::sleep(Duration::from_millis(10)).await;
        dropped.cancel();

        assert_eq!(kept.wait().await, WorkStatus::Succeeded);
        assert_eq!(dropped.wait().await, WorkStatus::Canceled);

        // The call went out without the canceled target.
        let calls = executor.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].size, 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_in_flight_discards_result() {
        let executor = Arc::new(SlowExecutor {
            latency: Duration::from_secs(1),
            calls: AtomicU32::new(0),
        });
        let handle = spawn_scheduler(settings(), pool(&["a"]), Arc::clone(&executor));

        let mut h = handle.submit(request("@news", 1)).await.unwrap();

        // Cancel while the call is in flight: the call is not aborted, but
        // its result is discarded.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.status(), WorkStatus::Dispatching);
        h.cancel();

        assert_eq!(h.wait().await, WorkStatus::Canceled);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_uses_multiple_identities() {
        let mut cfg = settings();
        cfg.batch.max_size = 1;
        cfg.batch.window_ms = 1;

        let executor = Arc::new(ScriptedExecutor::always_ok());
        let handle = spawn_scheduler(cfg, pool(&["a", "b"]), Arc::clone(&executor));

        let mut handles = Vec::new();
        for i in 0..4 {
            // Different channels so items never share a batch.
            handles.push(handle.submit(request(&format!("@ch{i}"), i)).await.unwrap());
        }
        for h in &mut handles {
            assert_eq!(h.wait().await, WorkStatus::Succeeded);
        }

        let used: std::collections::HashSet<IdentityId> = executor
            .calls()
            .await
            .into_iter()
            .map(|call| call.identity)
            .collect();
        assert_eq!(used.len(), 2);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_after_threshold_and_recovers() {
        let mut cfg = settings();
        cfg.breaker.failure_threshold = 2;
        cfg.breaker.cooldown_secs = 5;
        cfg.retry.max_retries = 10;

        // Two transient failures open the breaker; the next attempt waits
        // out the cooldown and succeeds as the half-open trial.
        let executor = Arc::new(FlakyExecutor::new(2));
        let handle = spawn_scheduler(cfg, pool(&["a"]), Arc::clone(&executor));

        let mut h = handle.submit(request("@news", 1)).await.unwrap();
        assert_eq!(h.wait().await, WorkStatus::Succeeded);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_urgent_dispatches_before_low() {
        let mut cfg = settings();
        cfg.batch.max_size = 1;

        let executor = Arc::new(ScriptedExecutor::always_ok());
        let handle = spawn_scheduler(cfg, pool(&["a"]), Arc::clone(&executor));

        // Delay both so they become eligible in the same pass; the queue
        // must release the urgent one first.
        let delay = Duration::from_secs(1);
        let mut low = handle
            .submit_after(request("@low", 1).with_priority(Priority::Low), delay)
            .await
            .unwrap();
        let mut urgent = handle
            .submit_after(request("@urgent", 2).with_priority(Priority::Urgent), delay)
            .await
            .unwrap();

        assert_eq!(urgent.wait().await, WorkStatus::Succeeded);
        assert_eq!(low.wait().await, WorkStatus::Succeeded);

        let calls = executor.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].channel, "@urgent");
        assert_eq!(calls[1].channel, "@low");

        handle.shutdown().await;
    }
}

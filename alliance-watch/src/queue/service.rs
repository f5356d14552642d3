//! The single-worker request queue.
//!
//! Every operation that talks to the player API goes through here, so at
//! most one API-using operation is in flight at any time and operations
//! run in the order they were enqueued.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::operation::{Operation, OperationSummary};
use super::rate_limiter::{BackoffPolicy, RateLimitState, RateLimiter};
use crate::notification::{StatusBroadcaster, StatusEvent};
use crate::{Error, Result};

/// Executes dequeued operations.
///
/// The worker owns the handler and the rate limiter, so neither needs
/// locking.
#[async_trait]
pub trait OperationHandler: Send + 'static {
    async fn execute(&mut self, operation: Operation, limiter: &mut RateLimiter) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Pause between two operations.
    pub operation_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            operation_delay: Duration::from_secs(1),
        }
    }
}

/// Point-in-time queue status.
#[derive(Debug, Clone, Serialize)]
pub struct QueueInfo {
    pub queue_size: usize,
    pub current_operation: Option<OperationSummary>,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Operation>,
    current: Option<OperationSummary>,
}

struct Inner {
    config: QueueConfig,
    /// Pending list and current operation share one lock so a dequeue and
    /// the matching `current` update are observed together.
    state: Mutex<QueueState>,
    notify: Notify,
    started: AtomicBool,
    cancel: CancellationToken,
    completed: AtomicU64,
    failed: AtomicU64,
    /// Taken by the worker when it starts.
    limiter: Mutex<Option<RateLimiter>>,
    rate_limit_rx: watch::Receiver<RateLimitState>,
    events: StatusBroadcaster,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the request queue. Cloning is cheap.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<Inner>,
}

impl RequestQueue {
    pub fn new(config: QueueConfig, policy: BackoffPolicy, events: StatusBroadcaster) -> Self {
        let limiter = RateLimiter::new(policy);
        let rate_limit_rx = limiter.subscribe();
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                limiter: Mutex::new(Some(limiter)),
                rate_limit_rx,
                events,
                worker: Mutex::new(None),
            }),
        }
    }

    /// Append an operation to the back of the queue.
    ///
    /// Never waits for the operation to run.
    pub fn enqueue(&self, operation: Operation) -> Result<Uuid> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::queue(format!(
                "queue is shut down, dropping '{}'",
                operation.description
            )));
        }

        let id = operation.id;
        let queue_size = {
            let mut state = self.inner.state.lock();
            debug!(
                operation_id = %id,
                kind = operation.kind.label(),
                "Enqueued: {}",
                operation.description
            );
            state.pending.push_back(operation);
            state.pending.len()
        };
        self.inner.notify.notify_one();

        if queue_size > 1 {
            debug!(queue_size, "Operations waiting in queue");
        }
        Ok(id)
    }

    pub fn queue_info(&self) -> QueueInfo {
        let state = self.inner.state.lock();
        QueueInfo {
            queue_size: state.pending.len(),
            current_operation: state.current.clone(),
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }

    /// Summaries of the waiting operations, front first.
    pub fn pending(&self) -> Vec<OperationSummary> {
        self.inner
            .state
            .lock()
            .pending
            .iter()
            .map(Operation::summary)
            .collect()
    }

    pub fn rate_limit_state(&self) -> RateLimitState {
        self.inner.rate_limit_rx.borrow().clone()
    }

    pub fn subscribe_rate_limit(&self) -> watch::Receiver<RateLimitState> {
        self.inner.rate_limit_rx.clone()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        state.pending.is_empty() && state.current.is_none()
    }

    /// Poll until nothing is pending or running. Returns `false` on timeout.
    pub async fn wait_until_idle(&self, poll: Duration, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_idle() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Spawn the worker. Only the first call has any effect.
    pub fn start_worker<H: OperationHandler>(&self, handler: H) -> bool {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            debug!("Queue worker already running");
            return false;
        }
        let Some(limiter) = self.inner.limiter.lock().take() else {
            warn!("Queue worker cannot start without a rate limiter");
            return false;
        };

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            run_worker(inner, handler, limiter).await;
        });
        *self.inner.worker.lock() = Some(handle);
        info!("Queue worker started");
        true
    }

    /// Stop accepting operations and wait for the worker to exit.
    ///
    /// The operation in flight is abandoned; pending ones are dropped.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!("Queue worker ended abnormally: {}", e);
        }

        let dropped = {
            let mut state = self.inner.state.lock();
            state.current = None;
            std::mem::take(&mut state.pending).len()
        };
        if dropped > 0 {
            warn!(dropped, "Dropped pending operations on shutdown");
        }
        info!("Request queue shut down");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn run_worker<H: OperationHandler>(inner: Arc<Inner>, mut handler: H, mut limiter: RateLimiter) {
    loop {
        let next = {
            let mut state = inner.state.lock();
            let next = state.pending.pop_front();
            if let Some(op) = &next {
                let mut summary = op.summary();
                summary.started_at = Some(Utc::now());
                state.current = Some(summary);
            }
            next
        };

        let Some(operation) = next else {
            tokio::select! {
                _ = inner.cancel.cancelled() => break,
                _ = inner.notify.notified() => {}
            }
            continue;
        };

        let id = operation.id;
        let description = operation.description.clone();
        debug!(operation_id = %id, "Running: {}", description);

        let outcome = tokio::select! {
            _ = inner.cancel.cancelled() => {
                info!(operation_id = %id, "Abandoning '{}' on shutdown", description);
                break;
            }
            outcome = AssertUnwindSafe(handler.execute(operation, &mut limiter)).catch_unwind() => outcome,
        };

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
        };

        match failure {
            None => {
                inner.completed.fetch_add(1, Ordering::Relaxed);
                debug!(operation_id = %id, "Completed: {}", description);
            }
            Some(reason) => {
                inner.failed.fetch_add(1, Ordering::Relaxed);
                error!(operation_id = %id, "Operation '{}' failed: {}", description, reason);
                inner.events.publish(StatusEvent::OperationFailed {
                    operation_id: id.to_string(),
                    description,
                    error: reason,
                    timestamp: Utc::now(),
                });
            }
        }

        inner.state.lock().current = None;

        if !inner.config.operation_delay.is_zero() {
            tokio::select! {
                _ = inner.cancel.cancelled() => break,
                _ = tokio::time::sleep(inner.config.operation_delay) => {}
            }
        }
    }

    inner.state.lock().current = None;
    debug!("Queue worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::OperationKind;
    use player_api::PlayerResult;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Probe {
        order: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    struct RecordingHandler {
        probe: Arc<Probe>,
        work: Duration,
    }

    #[async_trait]
    impl OperationHandler for RecordingHandler {
        async fn execute(&mut self, operation: Operation, _limiter: &mut RateLimiter) -> Result<()> {
            let now = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.probe.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.probe.order.lock().push(operation.description.clone());
            match operation.description.as_str() {
                "fail" => Err(Error::Other("boom".to_string())),
                "panic" => panic!("handler exploded"),
                _ => {
                    if let OperationKind::PlayerLookup { reply, .. } = operation.kind {
                        let _ = reply.send(PlayerResult::NotFound);
                    }
                    Ok(())
                }
            }
        }
    }

    fn queue(delay: Duration) -> RequestQueue {
        RequestQueue::new(
            QueueConfig {
                operation_delay: delay,
            },
            BackoffPolicy::default(),
            StatusBroadcaster::new(),
        )
    }

    fn named(description: &str) -> Operation {
        Operation::probe_providers().with_description(description)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_without_overlap() {
        let queue = queue(Duration::from_millis(100));
        let probe = Arc::new(Probe::default());

        for i in 0..5 {
            queue.enqueue(named(&format!("op-{i}"))).unwrap();
        }
        assert_eq!(queue.queue_info().queue_size, 5);

        assert!(queue.start_worker(RecordingHandler {
            probe: probe.clone(),
            work: Duration::from_millis(250),
        }));
        // Enqueued while the worker is busy.
        queue.enqueue(named("op-5")).unwrap();

        assert!(
            queue
                .wait_until_idle(Duration::from_millis(50), Duration::from_secs(10))
                .await
        );

        let order = probe.order.lock().clone();
        let expected: Vec<String> = (0..6).map(|i| format!("op-{i}")).collect();
        assert_eq!(order, expected);
        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);

        let info = queue.queue_info();
        assert_eq!(info.completed, 6);
        assert_eq!(info.failed, 0);
        assert!(info.current_operation.is_none());
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_worker() {
        let events = StatusBroadcaster::new();
        let mut rx = events.subscribe();
        let queue = RequestQueue::new(
            QueueConfig {
                operation_delay: Duration::ZERO,
            },
            BackoffPolicy::default(),
            events,
        );
        let probe = Arc::new(Probe::default());
        queue.start_worker(RecordingHandler {
            probe: probe.clone(),
            work: Duration::from_millis(10),
        });

        queue.enqueue(named("fail")).unwrap();
        queue.enqueue(named("panic")).unwrap();
        let (lookup, reply) = Operation::player_lookup(42, None);
        queue.enqueue(lookup.with_description("after")).unwrap();

        assert_eq!(reply.await.unwrap(), PlayerResult::NotFound);
        assert!(
            queue
                .wait_until_idle(Duration::from_millis(10), Duration::from_secs(5))
                .await
        );

        let info = queue.queue_info();
        assert_eq!(info.completed, 1);
        assert_eq!(info.failed, 2);

        let mut failed = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let StatusEvent::OperationFailed { description, error, .. } = event {
                failed.push((description, error));
            }
        }
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].0, "fail");
        assert!(failed[1].1.contains("handler exploded"));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_worker_is_idempotent() {
        let queue = queue(Duration::ZERO);
        let probe = Arc::new(Probe::default());
        assert!(queue.start_worker(RecordingHandler {
            probe: probe.clone(),
            work: Duration::ZERO,
        }));
        assert!(!queue.start_worker(RecordingHandler {
            probe,
            work: Duration::ZERO,
        }));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_rejected() {
        let queue = queue(Duration::ZERO);
        queue.shutdown().await;
        assert!(matches!(
            queue.enqueue(Operation::probe_providers()),
            Err(Error::Queue(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_operation_is_reported() {
        let queue = queue(Duration::ZERO);
        let probe = Arc::new(Probe::default());
        queue.start_worker(RecordingHandler {
            probe,
            work: Duration::from_secs(5),
        });
        let id = queue.enqueue(Operation::alliance_check(9)).unwrap();
        queue.enqueue(Operation::member_refresh(None)).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let info = queue.queue_info();
        let current = info.current_operation.expect("operation in flight");
        assert_eq!(current.id, id);
        assert_eq!(current.alliance_id, Some(9));
        assert!(current.started_at.is_some());
        assert_eq!(info.queue_size, 1);
        assert_eq!(queue.pending()[0].kind, "member_refresh");
        assert!(!queue.is_idle());

        queue.shutdown().await;
        assert!(queue.is_idle());
    }
}

//! Integration tests for the delivery queue and retry scheduler.
//!
//! Uses an in-memory scripted transport, so no mail server is needed:
//!
//! ```bash
//! cargo test -p adminbridge-notifier --test integration
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use adminbridge_common::error::AppError;
use adminbridge_notifier::{
    DeliveryError, DeliveryEvent, DeliveryQueue, Identity, ImmediateOutcome, MailTransport,
    Notification, RetryPolicy, RetryScheduler, SchedulerState,
};

// ============================================================
// Helpers
// ============================================================

/// Transport whose behavior is switched at runtime.
struct ScriptedTransport {
    succeed: AtomicBool,
    calls: AtomicUsize,
    delay: Duration,
    valid_config: bool,
    reject_credentials: AtomicBool,
}

impl ScriptedTransport {
    fn new(succeed: bool) -> Arc<Self> {
        Self::build(succeed, Duration::ZERO, true)
    }

    fn build(succeed: bool, delay: Duration, valid_config: bool) -> Arc<Self> {
        Arc::new(Self {
            succeed: AtomicBool::new(succeed),
            calls: AtomicUsize::new(0),
            delay,
            valid_config,
            reject_credentials: AtomicBool::new(false),
        })
    }

    fn set_succeed(&self, succeed: bool) {
        self.succeed.store(succeed, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn validate(&self) -> Result<(), DeliveryError> {
        if self.valid_config {
            Ok(())
        } else {
            Err(DeliveryError::Configuration(
                "EMAIL_USER is missing or still a placeholder".to_string(),
            ))
        }
    }

    async fn deliver(&self, _notification: &Notification) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.reject_credentials.load(Ordering::SeqCst) {
            return Err(DeliveryError::Configuration("535 bad credentials".to_string()));
        }
        if self.succeed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeliveryError::Transient("connection refused".to_string()))
        }
    }
}

fn policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        delivery_timeout: Duration::from_secs(30),
    }
}

fn queue_with(transport: &Arc<ScriptedTransport>, max_retries: u32) -> Arc<DeliveryQueue> {
    Arc::new(DeliveryQueue::new(transport.clone(), policy(max_retries)))
}

fn notification(recipient: &str) -> Notification {
    Notification::new(
        recipient,
        "Your AdminBridge Login Credentials",
        "Email: ...\nPassword: ...",
    )
    .unwrap()
}

fn identity(raw: &str) -> Identity {
    Identity::parse(raw).unwrap()
}

fn assert_exclusive(queue: &DeliveryQueue, id: &Identity) {
    assert!(
        !(queue.is_delivered(id) && queue.is_pending(id)),
        "{} is both delivered and pending",
        id
    );
}

// ============================================================
// Immediate delivery and dedup
// ============================================================

#[tokio::test]
async fn test_delivered_then_already_delivered() {
    let transport = ScriptedTransport::new(true);
    let queue = queue_with(&transport, 3);

    let first = queue.enqueue(notification("a@x.com")).await.unwrap();
    assert_eq!(first, ImmediateOutcome::Delivered);

    let second = queue.enqueue(notification("a@x.com")).await.unwrap();
    assert_eq!(second, ImmediateOutcome::AlreadyDelivered);

    assert_eq!(transport.calls(), 1);
    assert!(queue.is_delivered(&identity("a@x.com")));
    assert!(queue.pending().is_empty());
}

#[tokio::test]
async fn test_already_delivered_never_calls_transport() {
    let transport = ScriptedTransport::new(true);
    let queue = queue_with(&transport, 3);

    queue.enqueue(notification("a@x.com")).await.unwrap();
    transport.set_succeed(false);

    for raw in ["a@x.com", "A@X.COM", "  a@x.com "] {
        let outcome = queue.enqueue(notification(raw)).await.unwrap();
        assert_eq!(outcome, ImmediateOutcome::AlreadyDelivered);
    }
    assert_eq!(transport.calls(), 1);
    assert_eq!(queue.stats().delivered, 1);
}

#[tokio::test]
async fn test_failed_immediate_attempt_is_queued() {
    let transport = ScriptedTransport::new(false);
    let queue = queue_with(&transport, 3);

    let outcome = queue.enqueue(notification("b@x.com")).await.unwrap();
    match outcome {
        ImmediateOutcome::Queued { reason } => assert!(reason.contains("connection refused")),
        other => panic!("expected Queued, got {:?}", other),
    }

    let id = identity("b@x.com");
    assert!(queue.is_pending(&id));
    assert_eq!(queue.attempt_count(&id), Some(1));
    assert_exclusive(&queue, &id);
}

#[tokio::test]
async fn test_second_enqueue_while_pending_is_already_queued() {
    let transport = ScriptedTransport::new(false);
    let queue = queue_with(&transport, 3);

    let first = queue.enqueue(notification("c@x.com")).await.unwrap();
    assert!(matches!(first, ImmediateOutcome::Queued { .. }));

    let second = queue.enqueue(notification("c@x.com")).await.unwrap();
    assert_eq!(second, ImmediateOutcome::AlreadyQueued);

    assert_eq!(transport.calls(), 1);
    assert_eq!(queue.pending().len(), 1);
    assert_eq!(queue.attempt_count(&identity("c@x.com")), Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enqueue_single_attempt() {
    let transport = ScriptedTransport::build(false, Duration::from_millis(50), true);
    let queue = queue_with(&transport, 3);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let queue = queue.clone();
        tasks.spawn(async move { queue.enqueue(notification("race@x.com")).await.unwrap() });
    }

    let mut queued = 0;
    let mut already_queued = 0;
    while let Some(outcome) = tasks.join_next().await {
        match outcome.unwrap() {
            ImmediateOutcome::Queued { .. } => queued += 1,
            ImmediateOutcome::AlreadyQueued => already_queued += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(queued, 1);
    assert_eq!(already_queued, 15);
    assert_eq!(transport.calls(), 1);
    assert_eq!(queue.pending().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_identities_are_independent() {
    let transport = ScriptedTransport::new(false);
    let queue = queue_with(&transport, 3);

    for i in 0..5 {
        let outcome = queue
            .enqueue(notification(&format!("user{}@x.com", i)))
            .await
            .unwrap();
        assert!(matches!(outcome, ImmediateOutcome::Queued { .. }));
    }
    assert_eq!(transport.calls(), 5);
    assert_eq!(queue.stats().pending, 5);
}

// ============================================================
// Retry sweeps
// ============================================================

#[tokio::test]
async fn test_sweep_increments_attempt_count() {
    let transport = ScriptedTransport::new(false);
    let queue = queue_with(&transport, 3);

    queue.enqueue(notification("b@x.com")).await.unwrap();
    let report = queue.sweep().await;

    let id = identity("b@x.com");
    assert_eq!(report.attempted, 1);
    assert_eq!(report.requeued, 1);
    assert!(queue.is_pending(&id));
    assert_eq!(queue.attempt_count(&id), Some(2));
    assert_eq!(
        queue.pending()[0].last_error.as_deref(),
        Some("transient delivery failure: connection refused")
    );
}

#[tokio::test]
async fn test_exhausted_retries_are_discarded_then_fresh() {
    let transport = ScriptedTransport::new(false);
    let queue = queue_with(&transport, 3);
    let id = identity("b@x.com");

    queue.enqueue(notification("b@x.com")).await.unwrap();

    let first = queue.sweep().await;
    let second = queue.sweep().await;
    assert!(first.permanent_failures.is_empty());
    assert!(second.permanent_failures.is_empty());
    assert_eq!(queue.attempt_count(&id), Some(3));

    let third = queue.sweep().await;
    assert_eq!(third.permanent_failures.len(), 1);
    assert_eq!(third.permanent_failures[0].identity, id);
    assert_eq!(third.permanent_failures[0].attempts, 4);
    assert!(!queue.is_pending(&id));
    assert!(!queue.is_delivered(&id));

    // Initial attempt plus exactly three retries.
    assert_eq!(transport.calls(), 4);
    assert_eq!(queue.dead_letters().len(), 1);
    assert_eq!(queue.stats().permanently_failed, 1);

    // Nothing left to retry.
    let fourth = queue.sweep().await;
    assert_eq!(fourth.attempted, 0);
    assert_eq!(transport.calls(), 4);

    // A later enqueue is a fresh attempt.
    transport.set_succeed(true);
    let outcome = queue.enqueue(notification("b@x.com")).await.unwrap();
    assert_eq!(outcome, ImmediateOutcome::Delivered);
    assert_eq!(transport.calls(), 5);
}

#[tokio::test]
async fn test_zero_retries_discards_on_first_sweep() {
    let transport = ScriptedTransport::new(false);
    let queue = queue_with(&transport, 0);

    queue.enqueue(notification("z@x.com")).await.unwrap();
    let report = queue.sweep().await;

    assert_eq!(report.attempted, 0);
    assert_eq!(report.permanent_failures.len(), 1);
    assert_eq!(transport.calls(), 1);
    assert!(queue.pending().is_empty());
}

#[tokio::test]
async fn test_retry_success_moves_to_delivered() {
    let transport = ScriptedTransport::new(false);
    let queue = queue_with(&transport, 3);
    let id = identity("d@x.com");

    queue.enqueue(notification("d@x.com")).await.unwrap();
    transport.set_succeed(true);

    let report = queue.sweep().await;
    assert_eq!(report.delivered, 1);
    assert!(queue.is_delivered(&id));
    assert!(!queue.is_pending(&id));
    assert_exclusive(&queue, &id);

    let outcome = queue.enqueue(notification("d@x.com")).await.unwrap();
    assert_eq!(outcome, ImmediateOutcome::AlreadyDelivered);

    // Delivered identities are never retried again.
    let report = queue.sweep().await;
    assert_eq!(report.attempted, 0);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_configuration_rejection_during_sweep_discards() {
    let transport = ScriptedTransport::new(false);
    let queue = queue_with(&transport, 3);
    let id = identity("k@x.com");

    let outcome = queue.enqueue(notification("k@x.com")).await.unwrap();
    assert!(matches!(outcome, ImmediateOutcome::Queued { .. }));

    transport.reject_credentials.store(true, Ordering::SeqCst);
    let report = queue.sweep().await;

    assert_eq!(report.attempted, 1);
    assert_eq!(report.requeued, 0);
    assert_eq!(report.permanent_failures.len(), 1);
    assert!(
        report.permanent_failures[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("535 bad credentials")
    );
    assert!(!queue.is_pending(&id));
    assert!(!queue.is_delivered(&id));
    assert_eq!(queue.dead_letters().len(), 1);

    // Nothing left to retry.
    let report = queue.sweep().await;
    assert_eq!(report.attempted, 0);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_sweep_with_mixed_entries() {
    let transport = ScriptedTransport::new(false);
    let queue = queue_with(&transport, 1);

    queue.enqueue(notification("one@x.com")).await.unwrap();
    queue.sweep().await;
    // one@x.com has used its only retry and is gone.
    assert!(queue.pending().is_empty());

    queue.enqueue(notification("two@x.com")).await.unwrap();
    queue.enqueue(notification("three@x.com")).await.unwrap();
    transport.set_succeed(true);

    let report = queue.sweep().await;
    assert_eq!(report.attempted, 2);
    assert_eq!(report.delivered, 2);
    assert_eq!(queue.stats().delivered, 2);
    assert_eq!(queue.stats().permanently_failed, 1);
}

// ============================================================
// Timeouts and configuration errors
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_timed_out_attempt_is_a_failure() {
    let transport = ScriptedTransport::build(true, Duration::from_secs(60), true);
    let queue = Arc::new(DeliveryQueue::new(
        transport.clone(),
        RetryPolicy {
            max_retries: 3,
            delivery_timeout: Duration::from_secs(1),
        },
    ));

    let outcome = queue.enqueue(notification("slow@x.com")).await.unwrap();
    match outcome {
        ImmediateOutcome::Queued { reason } => assert!(reason.contains("timed out")),
        other => panic!("expected Queued, got {:?}", other),
    }

    let id = identity("slow@x.com");
    assert!(!queue.is_delivered(&id));
    assert_eq!(queue.attempt_count(&id), Some(1));

    queue.sweep().await;
    assert_eq!(queue.attempt_count(&id), Some(2));
}

#[tokio::test]
async fn test_misconfigured_transport_fails_fast() {
    let transport = ScriptedTransport::build(true, Duration::ZERO, false);
    let queue = queue_with(&transport, 3);

    let err = queue.enqueue(notification("e@x.com")).await.unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
    assert!(err.is_config());

    assert_eq!(transport.calls(), 0);
    assert!(queue.pending().is_empty());
    assert!(queue.check_transport().is_err());

    // Still rejected on the next call, never queued.
    assert!(queue.enqueue(notification("e@x.com")).await.is_err());
    assert_eq!(queue.stats().pending, 0);
}

#[tokio::test]
async fn test_rejected_credentials_are_not_queued() {
    let transport = ScriptedTransport::new(true);
    transport.reject_credentials.store(true, Ordering::SeqCst);
    let queue = queue_with(&transport, 3);

    let err = queue.enqueue(notification("f@x.com")).await.unwrap_err();
    assert!(err.is_config());
    assert_eq!(transport.calls(), 1);
    assert!(!queue.is_pending(&identity("f@x.com")));
    assert_eq!(queue.stats().in_flight, 0);
}

#[tokio::test]
async fn test_already_delivered_checked_before_configuration() {
    let transport = ScriptedTransport::new(true);
    let queue = queue_with(&transport, 3);
    queue.enqueue(notification("g@x.com")).await.unwrap();

    transport.reject_credentials.store(true, Ordering::SeqCst);
    let outcome = queue.enqueue(notification("g@x.com")).await.unwrap();
    assert_eq!(outcome, ImmediateOutcome::AlreadyDelivered);
}

// ============================================================
// Events
// ============================================================

#[tokio::test]
async fn test_lifecycle_events() {
    let transport = ScriptedTransport::new(false);
    let queue = queue_with(&transport, 1);
    let mut events = queue.subscribe();

    queue.enqueue(notification("ev@x.com")).await.unwrap();
    match events.recv().await.unwrap() {
        DeliveryEvent::Queued { identity: id, .. } => assert_eq!(id.as_str(), "ev@x.com"),
        other => panic!("expected Queued, got {:?}", other),
    }

    queue.sweep().await;
    match events.recv().await.unwrap() {
        DeliveryEvent::PermanentFailure(failure) => {
            assert_eq!(failure.identity.as_str(), "ev@x.com");
            assert_eq!(failure.attempts, 2);
        }
        other => panic!("expected PermanentFailure, got {:?}", other),
    }

    transport.set_succeed(false);
    queue.enqueue(notification("ev2@x.com")).await.unwrap();
    let _queued = events.recv().await.unwrap();
    transport.set_succeed(true);
    queue.sweep().await;
    assert_eq!(
        events.recv().await.unwrap(),
        DeliveryEvent::Delivered {
            identity: identity("ev2@x.com"),
            attempts: 2,
        }
    );
}

// ============================================================
// Scheduler
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_scheduler_sweeps_on_interval() {
    let transport = ScriptedTransport::new(false);
    let queue = queue_with(&transport, 3);
    let id = identity("b@x.com");

    queue.enqueue(notification("b@x.com")).await.unwrap();
    let (handle, task) = RetryScheduler::new(queue.clone(), Duration::from_secs(300)).spawn();

    // Nothing happens before the first interval elapses.
    tokio::time::sleep(Duration::from_secs(299)).await;
    assert_eq!(queue.attempt_count(&id), Some(1));
    assert_eq!(handle.status().sweeps_completed, 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(queue.attempt_count(&id), Some(2));

    let status = handle.status();
    assert_eq!(status.sweeps_completed, 1);
    assert_eq!(status.state, SchedulerState::Idle);
    assert_eq!(status.last_report.unwrap().requeued, 1);

    handle.shutdown();
    task.await.unwrap();
    assert_eq!(handle.status().state, SchedulerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_until_permanent_failure() {
    let transport = ScriptedTransport::new(false);
    let queue = queue_with(&transport, 3);
    let mut events = queue.subscribe();

    queue.enqueue(notification("b@x.com")).await.unwrap();
    let (handle, task) = RetryScheduler::new(queue.clone(), Duration::from_secs(300)).spawn();

    tokio::time::sleep(Duration::from_secs(3 * 300 + 1)).await;
    assert!(queue.pending().is_empty());
    assert_eq!(transport.calls(), 4);
    assert_eq!(handle.status().sweeps_completed, 3);

    let mut permanent = 0;
    while let Ok(event) = events.try_recv() {
        if let DeliveryEvent::PermanentFailure(failure) = event {
            assert_eq!(failure.identity.as_str(), "b@x.com");
            permanent += 1;
        }
    }
    assert_eq!(permanent, 1);

    // Later sweeps have nothing to do.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.calls(), 4);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_sweep_now() {
    let transport = ScriptedTransport::new(false);
    let queue = queue_with(&transport, 3);

    queue.enqueue(notification("now@x.com")).await.unwrap();
    transport.set_succeed(true);

    let (handle, task) = RetryScheduler::new(queue.clone(), Duration::from_secs(3600)).spawn();
    let mut status = handle.watch();

    handle.sweep_now();
    status
        .wait_for(|s| s.sweeps_completed >= 1)
        .await
        .unwrap();

    assert!(queue.is_delivered(&identity("now@x.com")));
    assert_eq!(transport.calls(), 2);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn test_scheduler_shutdown_before_first_tick() {
    let transport = ScriptedTransport::new(false);
    let queue = queue_with(&transport, 3);

    let (handle, task) = RetryScheduler::new(queue, Duration::from_secs(300)).spawn();
    assert!(!handle.is_shutdown());

    handle.shutdown();
    task.await.unwrap();
    assert!(handle.is_shutdown());
    assert_eq!(handle.status().sweeps_completed, 0);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_scheduler_follows_parent_cancellation() {
    let transport = ScriptedTransport::new(true);
    let queue = queue_with(&transport, 3);
    let shutdown = tokio_util::sync::CancellationToken::new();

    let (handle, task) = RetryScheduler::new(queue, Duration::from_secs(300))
        .with_cancellation(&shutdown)
        .spawn();

    shutdown.cancel();
    task.await.unwrap();
    assert!(handle.is_shutdown());
    assert_eq!(handle.status().state, SchedulerState::Stopped);
}

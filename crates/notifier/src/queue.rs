//! Delivery queue: deduplicates credential notifications, attempts immediate
//! delivery and parks failures in a retry set for the scheduler.
//!
//! All bookkeeping lives behind one mutex that is never held across an
//! await. The only suspending operation is the transport call. An identity
//! is marked in-flight before its lock is released, so at most one attempt
//! per identity runs at any time.
//!
//! State is in-memory only; a restart forgets both delivered and pending
//! identities.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use adminbridge_common::config::AppConfig;
use adminbridge_common::error::AppError;

use crate::identity::Identity;
use crate::notification::Notification;
use crate::transport::{DeliveryError, MailTransport};

/// Number of permanent failures kept for inspection.
const DEAD_LETTER_CAPACITY: usize = 100;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Retry budget and per-attempt bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the initial immediate attempt.
    pub max_retries: u32,
    /// Upper bound for one transport call; elapsed calls count as failures.
    pub delivery_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delivery_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delivery_timeout: config.delivery_timeout(),
        }
    }
}

/// Result of `DeliveryQueue::enqueue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ImmediateOutcome {
    /// Sent on the immediate attempt.
    Delivered,
    /// Immediate attempt failed; the notification waits for the next sweep.
    Queued { reason: String },
    /// This identity was already delivered; nothing was sent.
    AlreadyDelivered,
    /// A copy for this identity is pending or being attempted; nothing was sent.
    AlreadyQueued,
}

impl std::fmt::Display for ImmediateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImmediateOutcome::Delivered => write!(f, "delivered"),
            ImmediateOutcome::Queued { reason } => write!(f, "queued for retry ({})", reason),
            ImmediateOutcome::AlreadyDelivered => write!(f, "already delivered"),
            ImmediateOutcome::AlreadyQueued => write!(f, "already queued"),
        }
    }
}

/// A notification discarded after exhausting its retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermanentFailure {
    pub identity: Identity,
    pub recipient: String,
    pub subject: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub first_enqueued_at: DateTime<Utc>,
    pub discarded_at: DateTime<Utc>,
}

/// Lifecycle events published by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeliveryEvent {
    Delivered { identity: Identity, attempts: u32 },
    Queued { identity: Identity, reason: String },
    RetryFailed { identity: Identity, attempts: u32, error: String },
    PermanentFailure(PermanentFailure),
}

/// Outcome of one pass over the retry set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Transport calls made during the sweep.
    pub attempted: usize,
    pub delivered: usize,
    /// Entries that failed again and stay pending.
    pub requeued: usize,
    pub permanent_failures: Vec<PermanentFailure>,
}

/// Read-only view of a pending entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingEntry {
    pub identity: Identity,
    pub recipient: String,
    pub subject: String,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub first_enqueued_at: DateTime<Utc>,
    pub in_flight: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub delivered: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub permanently_failed: usize,
}

struct RetryEntry {
    notification: Notification,
    last_error: Option<String>,
}

#[derive(Default)]
struct QueueState {
    delivered: HashSet<Identity>,
    retry: HashMap<Identity, RetryEntry>,
    in_flight: HashSet<Identity>,
    dead_letters: VecDeque<PermanentFailure>,
    permanently_failed: usize,
}

impl QueueState {
    /// Drop a pending entry for good and remember why.
    fn discard(&mut self, identity: &Identity) -> Option<PermanentFailure> {
        let entry = self.retry.remove(identity)?;
        let failure = PermanentFailure {
            identity: identity.clone(),
            recipient: entry.notification.recipient().to_string(),
            subject: entry.notification.subject().to_string(),
            attempts: entry.notification.attempt_count(),
            last_error: entry.last_error,
            first_enqueued_at: entry.notification.first_enqueued_at(),
            discarded_at: Utc::now(),
        };

        if self.dead_letters.len() == DEAD_LETTER_CAPACITY {
            self.dead_letters.pop_front();
        }
        self.dead_letters.push_back(failure.clone());
        self.permanently_failed += 1;
        Some(failure)
    }
}

/// Owned credential-notification queue, shared as `Arc<DeliveryQueue>` by
/// callers and the retry scheduler.
pub struct DeliveryQueue {
    transport: Arc<dyn MailTransport>,
    policy: RetryPolicy,
    state: Mutex<QueueState>,
    events: broadcast::Sender<DeliveryEvent>,
}

impl DeliveryQueue {
    pub fn new(transport: Arc<dyn MailTransport>, policy: RetryPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            policy,
            state: Mutex::new(QueueState::default()),
            events,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Subscribe to delivery lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.events.subscribe()
    }

    /// Check the transport configuration without sending anything.
    pub fn check_transport(&self) -> Result<(), AppError> {
        self.transport
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    /// Submit a notification for delivery.
    ///
    /// Delivery failures never surface as `Err`: the notification is parked
    /// for retry and `Queued` is returned. Only a transport that cannot work
    /// at all yields `Err(AppError::Config)`.
    pub async fn enqueue(&self, notification: Notification) -> Result<ImmediateOutcome, AppError> {
        let identity = notification.identity().clone();

        {
            let mut state = self.state.lock();

            if state.delivered.contains(&identity) {
                tracing::debug!(identity = %identity, "Already delivered, skipping");
                return Ok(ImmediateOutcome::AlreadyDelivered);
            }

            if state.retry.contains_key(&identity) || state.in_flight.contains(&identity) {
                tracing::debug!(identity = %identity, "Already queued, skipping");
                return Ok(ImmediateOutcome::AlreadyQueued);
            }

            if let Err(e) = self.transport.validate() {
                tracing::error!(
                    transport = self.transport.name(),
                    error = %e,
                    "Email configuration not usable, notification rejected"
                );
                return Err(AppError::Config(e.to_string()));
            }

            state.in_flight.insert(identity.clone());
        }

        let result = self.attempt(&notification).await;

        let mut state = self.state.lock();
        state.in_flight.remove(&identity);

        match result {
            Ok(()) => {
                state.delivered.insert(identity.clone());
                drop(state);

                tracing::info!(
                    identity = %identity,
                    notification_id = %notification.id(),
                    "Credential email delivered"
                );
                self.publish(DeliveryEvent::Delivered {
                    identity,
                    attempts: 1,
                });
                Ok(ImmediateOutcome::Delivered)
            }
            Err(e) if e.is_configuration() => {
                drop(state);
                tracing::error!(identity = %identity, error = %e, "Transport rejected its configuration");
                Err(AppError::Config(e.to_string()))
            }
            Err(e) => {
                let reason = e.to_string();
                let mut notification = notification;
                notification.record_failure();
                state.retry.insert(
                    identity.clone(),
                    RetryEntry {
                        notification,
                        last_error: Some(reason.clone()),
                    },
                );
                drop(state);

                tracing::warn!(
                    identity = %identity,
                    error = %reason,
                    "Immediate delivery failed, added to retry queue"
                );
                self.publish(DeliveryEvent::Queued {
                    identity,
                    reason: reason.clone(),
                });
                Ok(ImmediateOutcome::Queued { reason })
            }
        }
    }

    /// One pass over the retry set.
    ///
    /// Entries already over budget are discarded without another attempt.
    /// Every other entry gets one attempt; a failure that exhausts the budget,
    /// or a configuration rejection, discards the entry in the same pass.
    pub async fn sweep(&self) -> SweepReport {
        let snapshot: Vec<Identity> = {
            let state = self.state.lock();
            state.retry.keys().cloned().collect()
        };

        let mut report = SweepReport::default();
        if snapshot.is_empty() {
            tracing::debug!("No pending emails in queue");
            return report;
        }

        tracing::info!(pending = snapshot.len(), "Processing pending emails");

        for identity in snapshot {
            let notification = {
                let mut state = self.state.lock();

                if state.in_flight.contains(&identity) {
                    continue;
                }
                let Some(entry) = state.retry.get(&identity) else {
                    continue;
                };

                if entry.notification.attempt_count() > self.policy.max_retries {
                    if let Some(failure) = state.discard(&identity) {
                        drop(state);
                        self.report_permanent(failure, &mut report);
                    }
                    continue;
                }

                let notification = entry.notification.clone();
                state.in_flight.insert(identity.clone());
                notification
            };

            report.attempted += 1;
            let result = self.attempt(&notification).await;

            let mut state = self.state.lock();
            state.in_flight.remove(&identity);

            match result {
                Ok(()) => {
                    let attempts = state
                        .retry
                        .remove(&identity)
                        .map(|entry| entry.notification.attempt_count() + 1)
                        .unwrap_or(1);
                    state.delivered.insert(identity.clone());
                    drop(state);

                    report.delivered += 1;
                    tracing::info!(identity = %identity, attempts, "Successfully sent queued email");
                    self.publish(DeliveryEvent::Delivered { identity, attempts });
                }
                Err(e) => {
                    let error = e.to_string();
                    let Some(entry) = state.retry.get_mut(&identity) else {
                        continue;
                    };
                    let attempts = entry.notification.record_failure();
                    entry.last_error = Some(error.clone());

                    if e.is_configuration() {
                        // Configuration is fixed for the process lifetime; no retry can succeed.
                        if let Some(failure) = state.discard(&identity) {
                            drop(state);
                            tracing::error!(
                                identity = %identity,
                                transport = self.transport.name(),
                                error = %error,
                                "Transport rejected its configuration, notification discarded"
                            );
                            self.report_permanent(failure, &mut report);
                        }
                    } else if attempts > self.policy.max_retries {
                        if let Some(failure) = state.discard(&identity) {
                            drop(state);
                            self.report_permanent(failure, &mut report);
                        }
                    } else {
                        drop(state);
                        report.requeued += 1;
                        tracing::warn!(
                            identity = %identity,
                            attempts,
                            error = %error,
                            "Retry failed, keeping in queue"
                        );
                        self.publish(DeliveryEvent::RetryFailed {
                            identity,
                            attempts,
                            error,
                        });
                    }
                }
            }
        }

        tracing::info!(
            attempted = report.attempted,
            delivered = report.delivered,
            requeued = report.requeued,
            discarded = report.permanent_failures.len(),
            "Email queue processed"
        );
        report
    }

    pub fn is_delivered(&self, identity: &Identity) -> bool {
        self.state.lock().delivered.contains(identity)
    }

    pub fn is_pending(&self, identity: &Identity) -> bool {
        self.state.lock().retry.contains_key(identity)
    }

    /// Failed attempts recorded for a pending identity.
    pub fn attempt_count(&self, identity: &Identity) -> Option<u32> {
        self.state
            .lock()
            .retry
            .get(identity)
            .map(|entry| entry.notification.attempt_count())
    }

    /// Pending entries, ordered by identity.
    pub fn pending(&self) -> Vec<PendingEntry> {
        let state = self.state.lock();
        let mut entries: Vec<PendingEntry> = state
            .retry
            .iter()
            .map(|(identity, entry)| PendingEntry {
                identity: identity.clone(),
                recipient: entry.notification.recipient().to_string(),
                subject: entry.notification.subject().to_string(),
                attempt_count: entry.notification.attempt_count(),
                last_error: entry.last_error.clone(),
                first_enqueued_at: entry.notification.first_enqueued_at(),
                in_flight: state.in_flight.contains(identity),
            })
            .collect();
        entries.sort_by(|a, b| a.identity.cmp(&b.identity));
        entries
    }

    /// Most recent permanent failures, oldest first.
    pub fn dead_letters(&self) -> Vec<PermanentFailure> {
        self.state.lock().dead_letters.iter().cloned().collect()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            delivered: state.delivered.len(),
            pending: state.retry.len(),
            in_flight: state.in_flight.len(),
            permanently_failed: state.permanently_failed,
        }
    }

    async fn attempt(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let timeout = self.policy.delivery_timeout;
        match tokio::time::timeout(timeout, self.transport.deliver(notification)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        }
    }

    fn report_permanent(&self, failure: PermanentFailure, report: &mut SweepReport) {
        tracing::error!(
            identity = %failure.identity,
            attempts = failure.attempts,
            last_error = failure.last_error.as_deref().unwrap_or("unknown"),
            "Maximum retry count exceeded, notification discarded"
        );
        report.permanent_failures.push(failure.clone());
        self.publish(DeliveryEvent::PermanentFailure(failure));
    }

    fn publish(&self, event: DeliveryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

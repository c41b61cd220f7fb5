//! Retry scheduler: a single background task that sweeps the delivery
//! queue's retry set on a fixed interval.
//!
//! The loop is `Idle -> Sweeping -> Idle`. It wakes when the interval
//! elapses or when `SchedulerHandle::sweep_now` is called, and stops when
//! its cancellation token fires. Missed ticks are delayed, never burst.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::queue::{DeliveryQueue, SweepReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Sweeping,
    Stopped,
}

/// Snapshot of the scheduler published after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub sweeps_completed: u64,
    pub last_sweep_at: Option<DateTime<Utc>>,
    pub last_report: Option<SweepReport>,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            sweeps_completed: 0,
            last_sweep_at: None,
            last_report: None,
        }
    }
}

/// Control surface for a running scheduler. Cheap to clone.
#[derive(Clone)]
pub struct SchedulerHandle {
    trigger: Arc<Notify>,
    cancel: CancellationToken,
    status: watch::Receiver<SchedulerStatus>,
}

impl SchedulerHandle {
    /// Wake the scheduler for an immediate sweep.
    pub fn sweep_now(&self) {
        self.trigger.notify_one();
    }

    /// Stop the loop after the sweep in progress, if any, completes.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.borrow().clone()
    }

    /// Watch status transitions (e.g. wait for the next completed sweep).
    pub fn watch(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.clone()
    }
}

pub struct RetryScheduler {
    queue: Arc<DeliveryQueue>,
    interval: Duration,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
    status_tx: watch::Sender<SchedulerStatus>,
    status_rx: watch::Receiver<SchedulerStatus>,
}

impl RetryScheduler {
    pub fn new(queue: Arc<DeliveryQueue>, interval: Duration) -> Self {
        let (status_tx, status_rx) = watch::channel(SchedulerStatus::default());
        Self {
            queue,
            interval,
            trigger: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            status_tx,
            status_rx,
        }
    }

    /// Stop together with a parent token (e.g. the process shutdown token).
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            trigger: self.trigger.clone(),
            cancel: self.cancel.clone(),
            status: self.status_rx.clone(),
        }
    }

    /// Run the loop on a background task.
    pub fn spawn(self) -> (SchedulerHandle, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run());
        (handle, task)
    }

    /// Run until cancelled.
    pub async fn run(self) {
        let period = self.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = period.as_secs(),
            max_retries = self.queue.policy().max_retries,
            "Retry scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => {
                    tracing::debug!("Sweep requested on demand");
                }
            }

            self.set_state(SchedulerState::Sweeping);
            let report = self.queue.sweep().await;
            self.status_tx.send_modify(|status| {
                status.state = SchedulerState::Idle;
                status.sweeps_completed += 1;
                status.last_sweep_at = Some(Utc::now());
                status.last_report = Some(report);
            });
        }

        self.set_state(SchedulerState::Stopped);
        tracing::info!("Retry scheduler stopped");
    }

    fn set_state(&self, state: SchedulerState) {
        self.status_tx.send_modify(|status| status.state = state);
    }
}

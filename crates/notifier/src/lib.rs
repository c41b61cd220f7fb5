//! Credential-notification delivery for AdminBridge.
//!
//! A newly created employee or student is emailed their login credentials
//! through a `DeliveryQueue`. The queue makes one immediate attempt and
//! parks failures in a retry set. A `RetryScheduler` sweeps that set on a
//! fixed interval until each entry is delivered or its retry budget runs out.

pub mod builder;
pub mod identity;
pub mod notification;
pub mod queue;
pub mod scheduler;
pub mod transport;

pub use builder::CredentialNotificationBuilder;
pub use identity::Identity;
pub use notification::Notification;
pub use queue::{
    DeliveryEvent, DeliveryQueue, ImmediateOutcome, PendingEntry, PermanentFailure, QueueStats,
    RetryPolicy, SweepReport,
};
pub use scheduler::{RetryScheduler, SchedulerHandle, SchedulerState, SchedulerStatus};
pub use transport::{DeliveryError, MailTransport};

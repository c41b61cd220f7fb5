use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use adminbridge_common::error::AppError;

use crate::identity::Identity;

/// One credential-delivery intent.
///
/// Content is fixed at construction. Only the delivery queue touches
/// `attempt_count`.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    id: Uuid,
    identity: Identity,
    recipient: String,
    subject: String,
    body: String,
    attempt_count: u32,
    first_enqueued_at: DateTime<Utc>,
}

impl Notification {
    /// Create a notification addressed to `recipient`. The identity is the
    /// canonical form of the recipient address.
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, AppError> {
        let recipient = recipient.into().trim().to_string();
        let identity = Identity::parse(&recipient)?;

        Ok(Self {
            id: Uuid::new_v4(),
            identity,
            recipient,
            subject: subject.into(),
            body: body.into(),
            attempt_count: 0,
            first_enqueued_at: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Number of failed delivery attempts so far.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn first_enqueued_at(&self) -> DateTime<Utc> {
        self.first_enqueued_at
    }

    pub(crate) fn record_failure(&mut self) -> u32 {
        self.attempt_count += 1;
        self.attempt_count
    }
}

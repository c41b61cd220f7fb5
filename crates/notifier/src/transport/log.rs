//! Dry-run transport: logs what would be sent and reports success.

use async_trait::async_trait;

use super::{DeliveryError, MailTransport};
use crate::notification::Notification;

#[derive(Debug, Default)]
pub struct LogTransport;

impl LogTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MailTransport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    fn validate(&self) -> Result<(), DeliveryError> {
        Ok(())
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        tracing::info!(
            notification_id = %notification.id(),
            to = notification.recipient(),
            subject = notification.subject(),
            body_len = notification.body().len(),
            "Dry run, message not sent"
        );
        Ok(())
    }
}

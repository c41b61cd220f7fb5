//! Outbound mail transports.
//!
//! A transport is a pure I/O boundary: it makes one delivery attempt and
//! reports the outcome. Retry, dedup and timeouts belong to the queue.

pub mod log;
pub mod resend;
pub mod smtp;

pub use self::log::LogTransport;
pub use self::resend::{ResendConfig, ResendTransport};
pub use self::smtp::{SmtpConfig, SmtpTransport};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use adminbridge_common::config::AppConfig;
use adminbridge_common::types::MailTransportKind;

use crate::notification::Notification;

/// Credential values shipped in sample configuration files.
const PLACEHOLDER_VALUES: &[&str] = &[
    "your.email@gmail.com",
    "your-email@gmail.com",
    "your-app-password",
    "your-api-key",
    "changeme",
];

/// Why a single delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The transport cannot work until its configuration is fixed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network failure, provider rejection or anything else worth retrying.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

impl DeliveryError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, DeliveryError::Configuration(_))
    }
}

/// Trait that all mail transports must implement.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Human-readable name for logs (e.g., "smtp").
    fn name(&self) -> &'static str;

    /// Check the static configuration without touching the network.
    fn validate(&self) -> Result<(), DeliveryError>;

    /// Make exactly one delivery attempt.
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Whether a configured credential is missing or still a sample value.
pub(crate) fn is_unset(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") => true,
        Some(v) => PLACEHOLDER_VALUES
            .iter()
            .any(|placeholder| v.eq_ignore_ascii_case(placeholder)),
    }
}

/// Build the transport selected by `MAIL_TRANSPORT`.
///
/// Never fails: an incomplete configuration is reported by `validate` on
/// first use so the caller can surface "email subsystem unavailable".
pub fn from_config(config: &AppConfig) -> Arc<dyn MailTransport> {
    tracing::info!(transport = %config.mail_transport, "Mail transport selected");

    match config.mail_transport {
        MailTransportKind::Smtp => Arc::new(SmtpTransport::new(SmtpConfig::from_app_config(config))),
        MailTransportKind::Resend => {
            Arc::new(ResendTransport::new(ResendConfig::from_app_config(config)))
        }
        MailTransportKind::Log => Arc::new(LogTransport::new()),
    }
}

//! SMTP delivery over an authenticated STARTTLS relay (Gmail by default).

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use adminbridge_common::config::AppConfig;

use super::{DeliveryError, MailTransport, is_unset};
use crate::notification::Notification;

/// SMTP relay settings, fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: Option<String>,
    pub from_name: String,
}

impl SmtpConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            host: config.smtp_host.clone(),
            port: config.smtp_port,
            username: config.email_user.clone(),
            // Gmail displays app passwords in space-separated groups of four.
            password: config
                .email_password
                .as_ref()
                .map(|p| p.chars().filter(|c| !c.is_whitespace()).collect()),
            from_address: config.sender_address().map(str::to_string),
            from_name: config.sender_name().to_string(),
        }
    }
}

pub struct SmtpTransport {
    config: SmtpConfig,
}

impl SmtpTransport {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn sender(&self) -> Result<Mailbox, DeliveryError> {
        let address = self.config.from_address.as_deref().unwrap_or_default();
        format!("{} <{}>", self.config.from_name, address)
            .parse()
            .map_err(|e| DeliveryError::Configuration(format!("invalid sender address: {e}")))
    }

    fn build_message(&self, notification: &Notification) -> Result<Message, DeliveryError> {
        let to: Mailbox = notification
            .recipient()
            .parse()
            .map_err(|e| DeliveryError::Transient(format!("invalid recipient address: {e}")))?;

        Message::builder()
            .from(self.sender()?)
            .to(to)
            .subject(notification.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body().to_string())
            .map_err(|e| DeliveryError::Transient(format!("failed to build email: {e}")))
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    fn validate(&self) -> Result<(), DeliveryError> {
        if self.config.host.trim().is_empty() {
            return Err(DeliveryError::Configuration("SMTP_HOST is not set".to_string()));
        }
        if is_unset(self.config.username.as_deref()) {
            return Err(DeliveryError::Configuration(
                "EMAIL_USER is missing or still a placeholder".to_string(),
            ));
        }
        if is_unset(self.config.password.as_deref()) {
            return Err(DeliveryError::Configuration(
                "EMAIL_PASSWORD is missing or still a placeholder".to_string(),
            ));
        }
        self.sender().map(|_| ())
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        self.validate()?;
        let email = self.build_message(notification)?;

        let creds = Credentials::new(
            self.config.username.clone().unwrap_or_default(),
            self.config.password.clone().unwrap_or_default(),
        );

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
            .map_err(|e| DeliveryError::Configuration(format!("SMTP relay: {e}")))?
            .port(self.config.port)
            .credentials(creds)
            .build();

        let response = mailer
            .send(email)
            .await
            .map_err(|e| DeliveryError::Transient(format!("SMTP send: {e}")))?;

        tracing::debug!(
            identity = %notification.identity(),
            code = %response.code(),
            "SMTP relay accepted message"
        );
        Ok(())
    }
}

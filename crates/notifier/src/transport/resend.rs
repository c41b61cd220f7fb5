//! Delivery through the Resend HTTP API
//! (https://resend.com/docs/api-reference/emails/send-email).

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use adminbridge_common::config::AppConfig;

use super::{DeliveryError, MailTransport, is_unset};
use crate::notification::Notification;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

#[derive(Debug, Clone)]
pub struct ResendConfig {
    pub api_key: Option<String>,
    pub from_address: Option<String>,
    pub from_name: String,
    pub endpoint: String,
}

impl ResendConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            api_key: config.resend_api_key.clone(),
            from_address: config.sender_address().map(str::to_string),
            from_name: config.sender_name().to_string(),
            endpoint: RESEND_ENDPOINT.to_string(),
        }
    }
}

pub struct ResendTransport {
    config: ResendConfig,
    client: reqwest::Client,
}

impl ResendTransport {
    pub fn new(config: ResendConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn payload(&self, notification: &Notification) -> serde_json::Value {
        json!({
            "from": format!(
                "{} <{}>",
                self.config.from_name,
                self.config.from_address.as_deref().unwrap_or_default()
            ),
            "to": [notification.recipient()],
            "subject": notification.subject(),
            "text": notification.body(),
        })
    }
}

/// Map a non-success Resend status to a delivery error.
fn classify_status(status: StatusCode, body: &str) -> DeliveryError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DeliveryError::Configuration(
            format!("Resend rejected the API key ({}): {}", status, body),
        ),
        _ => DeliveryError::Transient(format!("Resend returned {}: {}", status, body)),
    }
}

#[async_trait]
impl MailTransport for ResendTransport {
    fn name(&self) -> &'static str {
        "resend"
    }

    fn validate(&self) -> Result<(), DeliveryError> {
        if is_unset(self.config.api_key.as_deref()) {
            return Err(DeliveryError::Configuration(
                "RESEND_API_KEY is missing or still a placeholder".to_string(),
            ));
        }
        if is_unset(self.config.from_address.as_deref()) {
            return Err(DeliveryError::Configuration(
                "EMAIL_FROM is required for Resend delivery".to_string(),
            ));
        }
        Ok(())
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        self.validate()?;

        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        let resp = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&self.payload(notification))
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("Resend request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        tracing::debug!(identity = %notification.identity(), %status, "Resend accepted message");
        Ok(())
    }
}

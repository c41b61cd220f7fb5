use serde::Deserialize;

use crate::types::MailTransportKind;

/// One week.
const MAX_RETRY_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

const MAX_DELIVERY_TIMEOUT_SECS: u64 = 3600;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Which mail transport delivers notifications (default: smtp)
    pub mail_transport: MailTransportKind,

    /// SMTP relay host (default: smtp.gmail.com)
    pub smtp_host: String,

    /// SMTP relay port (default: 587, STARTTLS)
    pub smtp_port: u16,

    /// SMTP username, usually the sending mailbox
    pub email_user: Option<String>,

    /// SMTP password or Gmail app password
    pub email_password: Option<String>,

    /// Sender address (falls back to `email_user`)
    pub email_from: Option<String>,

    /// Sender display name (falls back to `app_name`)
    pub email_from_name: Option<String>,

    /// Resend API key for HTTP delivery
    pub resend_api_key: Option<String>,

    /// Product name used in subjects and bodies
    pub app_name: String,

    /// Frontend base URL; the login link is `{frontend_url}/login`
    pub frontend_url: String,

    /// Credential shown to recipients whose record carries no password
    pub default_password: Option<String>,

    /// Default recipient for `send-test`
    pub test_recipient: Option<String>,

    /// Minutes between retry sweeps (default: 5, range 1..=10080)
    pub retry_interval_minutes: u64,

    /// Retry attempts after the initial immediate attempt (default: 3)
    pub max_retries: u32,

    /// Upper bound for a single transport call in seconds (default: 30, range 1..=3600)
    pub delivery_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Missing mail credentials are not an error here; the transport reports
    /// them as a configuration error on first use.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let app_name = var("APP_NAME").unwrap_or_else(|| "AdminBridge".to_string());

        Ok(Self {
            mail_transport: var("MAIL_TRANSPORT")
                .unwrap_or_else(|| "smtp".to_string())
                .parse()?,
            smtp_host: var("SMTP_HOST").unwrap_or_else(|| "smtp.gmail.com".to_string()),
            smtp_port: var("SMTP_PORT")
                .unwrap_or_else(|| "587".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SMTP_PORT must be a valid u16"))?,
            email_user: var("EMAIL_USER"),
            email_password: var("EMAIL_PASSWORD"),
            email_from: var("EMAIL_FROM"),
            email_from_name: var("EMAIL_FROM_NAME"),
            resend_api_key: var("RESEND_API_KEY"),
            frontend_url: var("FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:5173".to_string())
                .trim_end_matches('/')
                .to_string(),
            default_password: var("DEFAULT_PASSWORD"),
            test_recipient: var("TEST_RECIPIENT"),
            retry_interval_minutes: bounded(
                "RETRY_INTERVAL_MINUTES",
                var("RETRY_INTERVAL_MINUTES"),
                5,
                MAX_RETRY_INTERVAL_MINUTES,
            )?,
            max_retries: var("MAX_RETRIES")
                .unwrap_or_else(|| "3".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MAX_RETRIES must be a valid u32"))?,
            delivery_timeout_secs: bounded(
                "DELIVERY_TIMEOUT_SECS",
                var("DELIVERY_TIMEOUT_SECS"),
                30,
                MAX_DELIVERY_TIMEOUT_SECS,
            )?,
            app_name,
        })
    }

    /// Sender address: explicit `EMAIL_FROM`, else the SMTP username.
    pub fn sender_address(&self) -> Option<&str> {
        self.email_from.as_deref().or(self.email_user.as_deref())
    }

    /// Sender display name: explicit `EMAIL_FROM_NAME`, else the app name.
    pub fn sender_name(&self) -> &str {
        self.email_from_name.as_deref().unwrap_or(&self.app_name)
    }

    /// Login page linked from credential emails.
    pub fn login_url(&self) -> String {
        format!("{}/login", self.frontend_url)
    }

    pub fn retry_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.retry_interval_minutes.saturating_mul(60))
    }

    pub fn delivery_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.delivery_timeout_secs)
    }
}

/// Parse a positive integer setting no larger than `max`.
fn bounded(key: &str, value: Option<String>, default: u64, max: u64) -> anyhow::Result<u64> {
    let Some(raw) = value else {
        return Ok(default);
    };
    let parsed: u64 = raw
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{} must be a valid u64", key))?;
    if parsed == 0 || parsed > max {
        anyhow::bail!("{} must be between 1 and {}, got {}", key, max, parsed);
    }
    Ok(parsed)
}

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Outbound mail transport selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailTransportKind {
    /// STARTTLS relay (Gmail by default)
    Smtp,
    /// Resend HTTP API
    Resend,
    /// Dry run: log the message, report success
    Log,
}

impl std::fmt::Display for MailTransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailTransportKind::Smtp => write!(f, "smtp"),
            MailTransportKind::Resend => write!(f, "resend"),
            MailTransportKind::Log => write!(f, "log"),
        }
    }
}

impl std::str::FromStr for MailTransportKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smtp" => Ok(MailTransportKind::Smtp),
            "resend" => Ok(MailTransportKind::Resend),
            "log" => Ok(MailTransportKind::Log),
            other => Err(AppError::Config(format!(
                "unknown MAIL_TRANSPORT '{}' (expected smtp, resend or log)",
                other
            ))),
        }
    }
}

/// Kind of account a credential email is issued for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientKind {
    #[default]
    Employee,
    Student,
}

impl std::fmt::Display for RecipientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientKind::Employee => write!(f, "employee"),
            RecipientKind::Student => write!(f, "student"),
        }
    }
}

/// Newly created employee or student whose login credentials must be emailed.
///
/// Deserializes from the camelCase record the creation workflow produces:
/// `{"email": "...", "firstName": "...", "lastName": "...", "role": "...", "branch": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecipient {
    #[serde(default)]
    pub kind: RecipientKind,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    /// Credential issued with the account, when the workflow generated one.
    #[serde(default)]
    pub temporary_password: Option<String>,
}

impl CredentialRecipient {
    /// "First Last", trimmed; empty when neither name is known.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

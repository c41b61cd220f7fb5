//! Deduplication key for credential notifications.
//!
//! Two notifications with the same identity are the same delivery intent.
//! The canonical form is the recipient address with surrounding whitespace
//! removed and every character lowercased, so `" Asha@Example.COM"` and
//! `"asha@example.com"` collapse to one entry.

use serde::Serialize;

use adminbridge_common::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Canonicalize a raw email address.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation(
                "recipient email address is empty".to_string(),
            ));
        }
        if !trimmed.contains('@') {
            return Err(AppError::Validation(format!(
                "'{}' is not an email address",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Identity {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

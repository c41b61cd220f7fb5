use thiserror::Error;

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Whether the mail subsystem is unusable until its configuration is fixed.
    pub fn is_config(&self) -> bool {
        matches!(self, AppError::Config(_))
    }
}

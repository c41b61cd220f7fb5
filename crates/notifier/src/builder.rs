//! Notification builder: turns a newly created account into the plain-text
//! credential email sent to its owner.

use adminbridge_common::config::AppConfig;
use adminbridge_common::error::AppError;
use adminbridge_common::types::{CredentialRecipient, RecipientKind};

use crate::notification::Notification;

/// Builds credential and test notifications from static branding settings.
#[derive(Debug, Clone)]
pub struct CredentialNotificationBuilder {
    app_name: String,
    login_url: String,
    default_password: Option<String>,
}

impl CredentialNotificationBuilder {
    pub fn new(
        app_name: impl Into<String>,
        login_url: impl Into<String>,
        default_password: Option<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            login_url: login_url.into(),
            default_password,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.app_name.clone(),
            config.login_url(),
            config.default_password.clone(),
        )
    }

    /// Build the credential email for a newly created employee or student.
    pub fn build(&self, recipient: &CredentialRecipient) -> Result<Notification, AppError> {
        let subject = format!("Your {} Login Credentials", self.app_name);
        let body = self.credential_body(recipient);
        Notification::new(recipient.email.as_str(), subject, body)
    }

    /// Build the ad-hoc message operators use to check the mail setup.
    pub fn build_test(&self, recipient: &str) -> Result<Notification, AppError> {
        let subject = format!("{} Email Test", self.app_name);
        let body = format!(
            "This is a test email from {app}.\n\n\
             If you are reading this, email delivery is configured correctly.\n\
             No action is required.\n",
            app = self.app_name
        );
        Notification::new(recipient, subject, body)
    }

    fn credential_body(&self, recipient: &CredentialRecipient) -> String {
        let name = recipient.full_name();
        let greeting = if name.is_empty() {
            "Hello,".to_string()
        } else {
            format!("Hello {},", name)
        };

        let mut created = match recipient.kind {
            RecipientKind::Employee => {
                format!("Your account has been created in the {} system", self.app_name)
            }
            RecipientKind::Student => {
                format!("Your student account has been created in the {} system", self.app_name)
            }
        };
        if let Some(role) = recipient.role.as_deref().filter(|r| !r.trim().is_empty()) {
            created.push_str(&format!(" as a {}", role.trim()));
        }
        if let Some(branch) = recipient.branch.as_deref().filter(|b| !b.trim().is_empty()) {
            created.push_str(&format!(" for the {} branch", branch.trim()));
        }
        created.push('.');

        let password_line = match recipient
            .temporary_password
            .as_deref()
            .or(self.default_password.as_deref())
        {
            Some(password) => format!("Password: {}", password),
            None => "Password: please ask your administrator for your initial password".to_string(),
        };

        format!(
            "{greeting}\n\n\
             {created}\n\n\
             Please use the following credentials to log in:\n\n\
             Email: {email}\n\
             {password_line}\n\n\
             Login: {login_url}\n\n\
             Important: please change your password immediately after your first login.\n\n\
             If you have any questions, please contact your administrator.\n",
            email = recipient.email.trim(),
            login_url = self.login_url,
        )
    }
}

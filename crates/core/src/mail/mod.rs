//! Operator alerts.

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("no recipients configured")]
    NoRecipients,

    #[error("failed to send mail: {0}")]
    Send(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), MailError>;
}

/// Mailer that writes alerts to the log instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LogMailer {
    sender: Option<String>,
}

impl LogMailer {
    pub fn new(sender: Option<String>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), MailError> {
        if recipients.is_empty() {
            return Err(MailError::NoRecipients);
        }
        warn!(
            from = self.sender.as_deref().unwrap_or("harvester"),
            to = %recipients.join(", "),
            subject,
            body,
            "Operator alert"
        );
        Ok(())
    }
}

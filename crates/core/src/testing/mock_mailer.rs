//! Mock mailer for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::mail::{MailError, Mailer};

/// Mock implementation of the Mailer trait that keeps what it was asked to send.
#[derive(Debug, Default)]
pub struct MockMailer {
    sent: Mutex<Vec<(String, String)>>,
    fail_next: AtomicBool,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subject and body of every message sent so far.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Make the next send fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), MailError> {
        if recipients.is_empty() {
            return Err(MailError::NoRecipients);
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(MailError::Send("mock relay unavailable".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((subject.to_string(), body.to_string()));
        }
        Ok(())
    }
}

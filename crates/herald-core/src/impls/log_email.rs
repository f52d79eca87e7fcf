//! `EmailSender` that only logs. Stands in for the email provider in the CLI demo.

use async_trait::async_trait;

use crate::ports::{EmailError, EmailReceipt, EmailSender};

#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<EmailReceipt, EmailError> {
        tracing::info!(to, subject, bytes = html.len(), "email (not sent, log only)");
        Ok(EmailReceipt {
            message_id: Some(format!("log-{}", ulid::Ulid::new())),
        })
    }
}

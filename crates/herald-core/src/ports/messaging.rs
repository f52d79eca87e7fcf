//! Outbound ports: the external messaging API and the email provider.
//!
//! These are the raw transports. Classification of responses into retryable
//! or not lives in `delivery::client`, not here.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::Channel;
use crate::vault::SecretToken;

/// One text message to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub channel: Channel,
    /// Page id (Instagram) or phone number id (WhatsApp) sending the message.
    pub account_id: String,
    pub recipient: String,
    pub text: String,
}

/// Raw HTTP-level answer from the messaging API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Graph-style `error.code`, if present.
    pub fn error_code(&self) -> Option<i64> {
        self.body.pointer("/error/code").and_then(|v| v.as_i64())
    }

    pub fn error_message(&self) -> Option<&str> {
        self.body.pointer("/error/message").and_then(|v| v.as_str())
    }

    /// Message id of a successful send (`message_id` or `messages[0].id`).
    pub fn message_id(&self) -> Option<String> {
        self.body
            .get("message_id")
            .or_else(|| self.body.pointer("/messages/0/id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

/// The request never produced an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

#[async_trait]
pub trait MessagingApi: Send + Sync {
    async fn post_message(
        &self,
        message: &OutboundMessage,
        token: &SecretToken,
    ) -> Result<ApiResponse, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailReceipt {
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("email send failed: {0}")]
pub struct EmailError(pub String);

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<EmailReceipt, EmailError>;
}

//! `MessagingApi` over HTTP (Meta Graph API).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::domain::Channel;
use crate::ports::{ApiResponse, MessagingApi, OutboundMessage, TransportError};
use crate::vault::SecretToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSettings {
    pub base_url: String,
    pub api_version: String,
    pub request_timeout: Duration,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            base_url: "https://graph.facebook.com".to_string(),
            api_version: "v21.0".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

pub struct GraphMessagingApi {
    http: reqwest::Client,
    settings: GraphSettings,
}

impl GraphMessagingApi {
    pub fn new(settings: GraphSettings) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self { http, settings })
    }

    pub fn endpoint(&self, account_id: &str) -> String {
        format!(
            "{}/{}/{}/messages",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.api_version,
            account_id
        )
    }
}

/// Request body for one text message.
pub fn request_body(message: &OutboundMessage) -> Value {
    match message.channel {
        Channel::WhatsApp => json!({
            "messaging_product": "whatsapp",
            "to": message.recipient,
            "type": "text",
            "text": { "body": message.text },
        }),
        Channel::Instagram => json!({
            "recipient": { "id": message.recipient },
            "message": { "text": message.text },
        }),
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl MessagingApi for GraphMessagingApi {
    async fn post_message(
        &self,
        message: &OutboundMessage,
        token: &SecretToken,
    ) -> Result<ApiResponse, TransportError> {
        let response = self
            .http
            .post(self.endpoint(&message.account_id))
            .bearer_auth(token.expose())
            .json(&request_body(message))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport_error)?;
        // Non-JSON bodies (proxies, HTML error pages) are kept as a string.
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(ApiResponse { status, body })
    }
}

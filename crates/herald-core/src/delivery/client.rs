//! Breaker-wrapped delivery client.
//!
//! Every outcome of the raw `MessagingApi` lands in exactly one bucket:
//!
//! | outcome                                          | bucket    | breaker          |
//! |--------------------------------------------------|-----------|------------------|
//! | transport error, 5xx, 429, codes 4/17/32/613     | transient | failure          |
//! | 401, codes 190/102                               | auth      | success          |
//! | codes 10/200/551/2018108/2018278/131026/131047   | policy    | success          |
//! | anything else                                    | transient | failure          |
//!
//! Auth and policy answers prove the API is reachable, so they count as a
//! success for the breaker.

use std::sync::Arc;

use serde::Serialize;

use crate::domain::JobError;
use crate::ports::{ApiResponse, MessagingApi, OutboundMessage};
use crate::vault::SecretToken;

use super::breaker::CircuitBreaker;

const RATE_LIMIT_CODES: &[i64] = &[4, 17, 32, 613];
const AUTH_CODES: &[i64] = &[190, 102];
const POLICY_CODES: &[i64] = &[10, 200, 551, 2_018_108, 2_018_278, 131_026, 131_047];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Auth,
    Policy,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DeliveryFailure {
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
}

impl DeliveryFailure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind == FailureKind::Transient,
        }
    }
}

impl From<DeliveryFailure> for JobError {
    fn from(failure: DeliveryFailure) -> Self {
        match failure.kind {
            FailureKind::Transient => JobError::transient(failure.message),
            FailureKind::Auth => JobError::credential(failure.message),
            FailureKind::Policy => JobError::policy(failure.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeliveryReceipt {
    pub message_id: Option<String>,
}

/// Pure classification of an HTTP answer.
pub fn classify(response: &ApiResponse) -> Result<DeliveryReceipt, DeliveryFailure> {
    if response.is_success() && response.error_code().is_none() {
        return Ok(DeliveryReceipt {
            message_id: response.message_id(),
        });
    }

    let code = response.error_code();
    let detail = response
        .error_message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", response.status));
    let message = match code {
        Some(code) => format!("{detail} (status {}, code {code})", response.status),
        None => format!("{detail} (status {})", response.status),
    };

    let kind = match (response.status, code) {
        (_, Some(c)) if RATE_LIMIT_CODES.contains(&c) => FailureKind::Transient,
        (_, Some(c)) if AUTH_CODES.contains(&c) => FailureKind::Auth,
        (_, Some(c)) if POLICY_CODES.contains(&c) => FailureKind::Policy,
        (401, _) => FailureKind::Auth,
        _ => FailureKind::Transient,
    };
    Err(DeliveryFailure::new(kind, message))
}

pub struct DeliveryClient {
    api: Arc<dyn MessagingApi>,
    breaker: Arc<CircuitBreaker>,
}

impl DeliveryClient {
    pub fn new(api: Arc<dyn MessagingApi>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { api, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn send(
        &self,
        message: &OutboundMessage,
        token: &SecretToken,
    ) -> Result<DeliveryReceipt, DeliveryFailure> {
        if !self.breaker.allow() {
            return Err(DeliveryFailure::new(FailureKind::Transient, "circuit open"));
        }

        let response = match self.api.post_message(message, token).await {
            Ok(response) => response,
            Err(err) => {
                self.breaker.record_failure();
                return Err(DeliveryFailure::new(FailureKind::Transient, err.to_string()));
            }
        };

        let result = classify(&response);
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(failure) if failure.kind == FailureKind::Transient => {
                self.breaker.record_failure()
            }
            Err(_) => self.breaker.record_success(),
        }
        if let Err(failure) = &result {
            tracing::debug!(
                channel = %message.channel,
                kind = ?failure.kind,
                error = %failure.message,
                "delivery rejected"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::breaker::{BreakerSettings, BreakerState};
    use crate::domain::Channel;
    use crate::ports::{FixedClock, TransportError};
    use crate::testkit::{ScriptedApi, t0};
    use rstest::rstest;
    use serde_json::json;

    fn graph_error(status: u16, code: i64) -> ApiResponse {
        ApiResponse {
            status,
            body: json!({"error": {"message": "graph says no", "code": code}}),
        }
    }

    #[rstest]
    #[case(graph_error(500, 1), FailureKind::Transient)]
    #[case(ApiResponse { status: 503, body: json!({}) }, FailureKind::Transient)]
    #[case(ApiResponse { status: 429, body: json!({}) }, FailureKind::Transient)]
    #[case(graph_error(400, 4), FailureKind::Transient)]
    #[case(graph_error(400, 17), FailureKind::Transient)]
    #[case(graph_error(400, 32), FailureKind::Transient)]
    #[case(graph_error(400, 613), FailureKind::Transient)]
    #[case(ApiResponse { status: 401, body: json!({}) }, FailureKind::Auth)]
    #[case(graph_error(400, 190), FailureKind::Auth)]
    #[case(graph_error(400, 102), FailureKind::Auth)]
    #[case(graph_error(403, 10), FailureKind::Policy)]
    #[case(graph_error(400, 200), FailureKind::Policy)]
    #[case(graph_error(400, 551), FailureKind::Policy)]
    #[case(graph_error(400, 2_018_108), FailureKind::Policy)]
    #[case(graph_error(400, 2_018_278), FailureKind::Policy)]
    #[case(graph_error(400, 131_026), FailureKind::Policy)]
    #[case(graph_error(400, 131_047), FailureKind::Policy)]
    #[case(graph_error(400, 9999), FailureKind::Transient)]
    #[case(ApiResponse { status: 404, body: json!("not json error") }, FailureKind::Transient)]
    fn classification_table(#[case] response: ApiResponse, #[case] expected: FailureKind) {
        let failure = classify(&response).unwrap_err();
        assert_eq!(failure.kind, expected);
        assert_eq!(failure.retryable, expected == FailureKind::Transient);
    }

    #[test]
    fn success_carries_message_id() {
        let receipt = classify(&ApiResponse::ok(json!({"message_id": "m_1"}))).unwrap();
        assert_eq!(receipt.message_id.as_deref(), Some("m_1"));
    }

    fn client(api: Arc<ScriptedApi>) -> DeliveryClient {
        let clock = Arc::new(FixedClock::new(t0()));
        let breaker = Arc::new(CircuitBreaker::new(BreakerSettings::default(), clock));
        DeliveryClient::new(api, breaker)
    }

    fn message() -> OutboundMessage {
        OutboundMessage {
            channel: Channel::Instagram,
            account_id: "17841400000000000".into(),
            recipient: "1789".into(),
            text: "hi".into(),
        }
    }

    #[tokio::test]
    async fn sixth_call_after_five_failures_never_reaches_the_api() {
        let api = Arc::new(ScriptedApi::always_transport(TransportError::Timeout));
        let client = client(api.clone());
        let token = SecretToken::new("t");

        for _ in 0..5 {
            let failure = client.send(&message(), &token).await.unwrap_err();
            assert!(failure.retryable);
        }
        assert_eq!(api.calls(), 5);

        let failure = client.send(&message(), &token).await.unwrap_err();
        assert_eq!(failure.message, "circuit open");
        assert!(failure.retryable);
        assert_eq!(api.calls(), 5);
    }

    #[tokio::test]
    async fn auth_and_policy_answers_do_not_trip_the_breaker() {
        let api = Arc::new(ScriptedApi::always(graph_error(400, 190)));
        let client = client(api.clone());
        let token = SecretToken::new("t");

        for _ in 0..10 {
            let failure = client.send(&message(), &token).await.unwrap_err();
            assert_eq!(failure.kind, FailureKind::Auth);
        }
        assert_eq!(api.calls(), 10);
        assert_eq!(client.breaker().snapshot().state, BreakerState::Closed);
        assert_eq!(client.breaker().snapshot().failure_count, 0);
    }

    #[test]
    fn failure_maps_to_job_error_kind() {
        use crate::domain::ErrorKind;
        let auth = DeliveryFailure::new(FailureKind::Auth, "expired");
        assert_eq!(JobError::from(auth).kind, ErrorKind::Credential);
        let policy = DeliveryFailure::new(FailureKind::Policy, "not opted in");
        assert_eq!(JobError::from(policy).kind, ErrorKind::Policy);
    }
}

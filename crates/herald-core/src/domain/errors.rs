//! Errors - ハンドラが返すエラーとその分類
//!
//! ハンドラは `JobError` を返すだけで、リトライするかどうかは決めない。
//! その判断は Decider が `ErrorKind::is_retryable` を見て行う。

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operational classification of a handler failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts, 5xx, 429, circuit open, store hiccups.
    Transient,
    /// Expired, revoked or undecryptable token.
    Credential,
    /// Recipient unreachable or not opted in.
    Policy,
    /// Plan ceiling reached.
    Quota,
    /// Administrative kill switch.
    Shutdown,
    /// Payload references something that does not exist.
    Malformed,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Credential => "credential",
            ErrorKind::Policy => "policy",
            ErrorKind::Quota => "quota",
            ErrorKind::Shutdown => "shutdown",
            ErrorKind::Malformed => "malformed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure returned by a task handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn credential(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Credential, message)
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Policy, message)
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Quota, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Store failures seen by a handler are transient; the task will be retried.
impl From<crate::error::StoreError> for JobError {
    fn from(err: crate::error::StoreError) -> Self {
        JobError::transient(err.to_string())
    }
}

//! Task payloads: one shape per task type, decoded exhaustively at dispatch.
//!
//! The `type` of a task is derived from its payload variant, so a record can
//! never carry a payload that disagrees with its type.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::{BroadcastId, CredentialId, EnrollmentId, TenantId};
use super::messaging::Channel;

/// Closed set of task types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    MessageDelivery,
    SequenceStep,
    Broadcast,
    Cleanup,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::MessageDelivery => "message_delivery",
            TaskKind::SequenceStep => "sequence_step",
            TaskKind::Broadcast => "broadcast",
            TaskKind::Cleanup => "cleanup",
        }
    }

    /// Kinds that call the external messaging API (subject to the kill switch).
    pub fn is_external_messaging(self) -> bool {
        matches!(self, TaskKind::MessageDelivery | TaskKind::Broadcast)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task payload, serialized as `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum TaskPayload {
    MessageDelivery(MessageDelivery),
    SequenceStep(SequenceStep),
    Broadcast(BroadcastRun),
    Cleanup(Cleanup),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::MessageDelivery(_) => TaskKind::MessageDelivery,
            TaskPayload::SequenceStep(_) => TaskKind::SequenceStep,
            TaskPayload::Broadcast(_) => TaskKind::Broadcast,
            TaskPayload::Cleanup(_) => TaskKind::Cleanup,
        }
    }

    /// Tenant the task acts for, when it acts for one.
    pub fn tenant_id(&self) -> Option<TenantId> {
        match self {
            TaskPayload::MessageDelivery(p) => Some(p.tenant_id),
            _ => None,
        }
    }
}

/// A single direct message to one recipient over an external channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelivery {
    pub tenant_id: TenantId,
    pub credential_id: CredentialId,
    pub channel: Channel,
    /// Channel-specific recipient identifier (IGSID, phone number, ...).
    pub recipient: String,
    /// Message body; may contain `{{variable}}` placeholders.
    pub body: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    /// What triggered the message (automation rule, webhook, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

/// One step of a drip sequence for one enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub enrollment_id: EnrollmentId,
    pub step_index: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

/// Send a stored broadcast to its recipient list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastRun {
    pub broadcast_id: BroadcastId,
}

/// Delete stale delivery logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cleanup {
    pub retention_days: u32,
}

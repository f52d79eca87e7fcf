//! Records the handlers read and write besides the task itself:
//! delivery logs, drip sequences and enrollments, broadcasts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{
    BroadcastId, CredentialId, EnrollmentId, LogId, SequenceId, TaskId, TenantId,
};

/// External messaging channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Instagram,
    WhatsApp,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Instagram => "instagram",
            Channel::WhatsApp => "whatsapp",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

/// One delivery attempt as seen by the tenant. Successful entries are what
/// the quota gate counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLog {
    pub id: LogId,
    pub tenant_id: TenantId,
    pub channel: Channel,
    pub recipient: String,
    pub status: DeliveryStatus,
    /// The message as sent (after template substitution).
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub task_id: TaskId,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

// ---- drip sequences ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStepDef {
    pub subject: String,
    /// HTML body; may contain `{{variable}}` placeholders.
    pub content: String,
    /// Delay before this step, measured from the previous step's send.
    #[serde(default)]
    pub delay_hours: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceStats {
    pub completed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub id: SequenceId,
    pub tenant_id: TenantId,
    pub name: String,
    pub is_active: bool,
    /// Already in send order.
    pub steps: Vec<SequenceStepDef>,
    #[serde(default)]
    pub stats: SequenceStats,
}

impl Sequence {
    pub fn step(&self, index: usize) -> Option<&SequenceStepDef> {
        self.steps.get(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Cancelled,
    Unsubscribed,
}

/// A subscriber's progress through one sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub sequence_id: SequenceId,
    pub tenant_id: TenantId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    pub status: EnrollmentStatus,
    /// Index of the next step to send.
    pub current_step: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_due_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// ---- broadcasts ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStatus {
    Scheduled,
    Sent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: BroadcastId,
    pub tenant_id: TenantId,
    pub credential_id: CredentialId,
    pub channel: Channel,
    pub message: String,
    pub recipients: Vec<String>,
    pub status: BroadcastStatus,
    #[serde(default)]
    pub sent_count: u64,
    #[serde(default)]
    pub failed_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

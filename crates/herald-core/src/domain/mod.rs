//! Domain model (IDs, task records, payloads, decisions, ...).
//!
//! ここにある型は I/O を一切しない。永続化や外部 API は `ports` 経由。

pub mod credential;
pub mod decision;
pub mod errors;
pub mod ids;
pub mod messaging;
pub mod outcome;
pub mod payload;
pub mod plan;
pub mod state;
pub mod task;

pub use credential::{CredentialRecord, KeyVersion, SealedSecret, TokenStatus};
pub use decision::{Decider, Decision, DefaultDecider, RetryPolicy};
pub use errors::{ErrorKind, JobError};
pub use ids::{BroadcastId, CredentialId, EnrollmentId, LogId, SequenceId, TaskId, TenantId};
pub use messaging::{
    Broadcast, BroadcastStatus, Channel, DeliveryLog, DeliveryStatus, Enrollment,
    EnrollmentStatus, Sequence, SequenceStats, SequenceStepDef,
};
pub use outcome::ProcessOutcome;
pub use payload::{BroadcastRun, Cleanup, MessageDelivery, SequenceStep, TaskKind, TaskPayload};
pub use plan::{Plan, PlanTier, Subscription, SubscriptionStatus};
pub use state::{QueueCounts, TaskStatus};
pub use task::{DEFAULT_MAX_ATTEMPTS, LEASE_EXPIRED, Recurrence, TaskRecord};

//! Task record: the persisted unit of work.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::ids::TaskId;
use super::payload::{TaskKind, TaskPayload};
use super::state::TaskStatus;

/// Default ceiling on executions before a failure becomes terminal.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

// LCG over the 80 random bits of a ULID (full period, so a chain never repeats)
const SUCCESSOR_MUL: u128 = 6_364_136_223_846_793_005;
const SUCCESSOR_INC: u128 = 1_442_695_040_888_963_407;
const RANDOM_MASK: u128 = (1 << 80) - 1;

/// Error recorded on a claim whose outcome was never saved.
pub const LEASE_EXPIRED: &str = "transient: processing lease expired before the outcome was saved";

/// Makes a task re-create itself after it resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub interval_ms: u64,
}

impl Recurrence {
    pub fn every_ms(interval_ms: u64) -> Self {
        Self { interval_ms }
    }

    pub fn interval(&self) -> Duration {
        i64::try_from(self.interval_ms)
            .ok()
            .and_then(Duration::try_milliseconds)
            .unwrap_or(Duration::MAX)
    }
}

/// Metadata + payload for a task in the store.
///
/// - This is the single source of truth for task state.
/// - Only the processor (and the operator requeue) mutates it.
/// - `next_run_at == None` means the task will never be claimed again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,

    pub payload: TaskPayload,

    pub status: TaskStatus,

    /// Number of failed executions so far.
    pub attempt: u32,

    pub max_attempts: u32,

    pub next_run_at: Option<DateTime<Utc>>,

    /// Last error message (if any).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A new pending task, due immediately.
    pub fn new(id: TaskId, payload: TaskPayload, now: DateTime<Utc>) -> Self {
        Self {
            id,
            payload,
            status: TaskStatus::Pending,
            attempt: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            next_run_at: Some(now),
            error: None,
            recurrence: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }

    /// Delay the first run.
    pub fn due_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_run_at = Some(at);
        self
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    /// Would the atomic claim match this record at `now`?
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable()
            && self.attempt < self.max_attempts
            && self.next_run_at.is_some_and(|at| at <= now)
    }

    /// Pending/failed -> processing.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Processing;
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.next_run_at = None;
        self.updated_at = now;
    }

    /// Count a failed execution and put the task back in line.
    pub fn schedule_retry(&mut self, next_run_at: DateTime<Utc>, error: String, now: DateTime<Utc>) {
        self.attempt += 1;
        self.status = TaskStatus::Pending;
        self.next_run_at = Some(next_run_at);
        self.error = Some(error);
        self.updated_at = now;
    }

    /// Count a failed execution and stop for good.
    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.attempt += 1;
        self.status = TaskStatus::Failed;
        self.next_run_at = None;
        self.error = Some(error);
        self.updated_at = now;
    }

    /// Stop for good without counting an execution (the handler never ran).
    pub fn abort(&mut self, error: String, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.next_run_at = None;
        self.error = Some(error);
        self.updated_at = now;
    }

    /// Claimed at or before `stale_before` and never resolved.
    pub fn lease_expired(&self, stale_before: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Processing && self.updated_at <= stale_before
    }

    /// Release an expired claim. Counts as one failed execution, so a task
    /// that keeps losing its outcome still runs out of attempts.
    pub fn expire_lease(&mut self, now: DateTime<Utc>) {
        self.attempt = self.attempt.saturating_add(1);
        self.error = Some(LEASE_EXPIRED.to_string());
        self.updated_at = now;
        if self.attempt < self.max_attempts {
            self.status = TaskStatus::Pending;
            self.next_run_at = Some(now);
        } else {
            self.status = TaskStatus::Failed;
            self.next_run_at = None;
        }
    }

    /// Operator requeue of a failed task.
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Pending;
        self.attempt = 0;
        self.error = None;
        self.next_run_at = Some(now);
        self.updated_at = now;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed)
            || (self.status == TaskStatus::Failed && self.next_run_at.is_none())
    }

    /// Id of this task's successor. Derived from `id`, so a second enqueue
    /// of the same successor is a conflict rather than a duplicate.
    pub fn successor_id(&self) -> TaskId {
        let ulid = self.id.as_ulid();
        let random = ulid
            .random()
            .wrapping_mul(SUCCESSOR_MUL)
            .wrapping_add(SUCCESSOR_INC)
            & RANDOM_MASK;
        TaskId::from_ulid(Ulid::from_parts(ulid.timestamp_ms(), random))
    }

    /// Fresh copy of a recurring task, due one interval after `now`.
    pub fn successor(&self, now: DateTime<Utc>) -> Option<TaskRecord> {
        let recurrence = self.recurrence?;
        Some(
            TaskRecord::new(self.successor_id(), self.payload.clone(), now)
                .with_max_attempts(self.max_attempts)
                .with_recurrence(recurrence)
                .due_at(
                    now.checked_add_signed(recurrence.interval())
                        .unwrap_or(DateTime::<Utc>::MAX_UTC),
                ),
        )
    }
}

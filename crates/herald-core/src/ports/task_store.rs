//! TaskStore port - タスクレコードの正本（source of truth）
//!
//! # 設計原則
//! - claim は単一の条件付き更新。同じタスクを同時に claim しても成功するのは一つだけ
//! - 複数インスタンスの安全性はこの claim の原子性だけに依存する
//! - レコードは削除しない
//! - processing のまま結果が保存されなかったレコードは lease 切れで回収する

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{QueueCounts, TaskId, TaskRecord};
use crate::error::StoreError;

/// Filter for the atomic claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimCriteria {
    pub now: DateTime<Utc>,
    /// Restrict the claim to one task.
    pub task_id: Option<TaskId>,
}

impl ClaimCriteria {
    pub fn any(now: DateTime<Utc>) -> Self {
        Self { now, task_id: None }
    }

    pub fn task(task_id: TaskId, now: DateTime<Utc>) -> Self {
        Self {
            now,
            task_id: Some(task_id),
        }
    }

    /// Same predicate the store evaluates inside its critical section.
    pub fn matches(&self, task: &TaskRecord) -> bool {
        self.task_id.is_none_or(|id| id == task.id) && task.is_due(self.now)
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a new record. Duplicate id → `StoreError::Conflict`.
    async fn enqueue(&self, task: TaskRecord) -> Result<(), StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// Atomically moves one matching record to `processing` and returns it.
    async fn claim_due_task(
        &self,
        criteria: ClaimCriteria,
    ) -> Result<Option<TaskRecord>, StoreError>;

    /// Overwrites an existing record. Unknown id → `StoreError::NotFound`.
    async fn save(&self, task: &TaskRecord) -> Result<(), StoreError>;

    /// Read-only scan of claimable tasks, oldest `next_run_at` first.
    async fn find_due_tasks(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    /// Releases every `processing` record claimed at or before
    /// `stale_before` (see [`TaskRecord::expire_lease`]) and returns them as
    /// saved. One critical section, like the claim.
    async fn reap_expired_leases(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    async fn counts_by_status(&self) -> Result<QueueCounts, StoreError>;

    /// Operator requeue: failed → pending with attempts reset.
    async fn requeue_failed(
        &self,
        id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, StoreError>;
}

//! In-memory `TaskStore`.
//!
//! マップ全体を一つの async Mutex で守る。claim の「条件判定 → processing へ更新」
//! は同じクリティカルセクション内で行うので、同時 claim で勝つのは一つだけ。
//! ロックは handler 実行中には保持しない（各メソッド内で完結）。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{QueueCounts, TaskId, TaskRecord, TaskStatus};
use crate::error::StoreError;
use crate::ports::{ClaimCriteria, TaskStore};

#[derive(Default)]
pub struct InMemoryTaskStore {
    records: Mutex<HashMap<TaskId, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, oldest first. Test and demo helper.
    pub async fn all(&self) -> Vec<TaskRecord> {
        let records = self.records.lock().await;
        let mut all: Vec<TaskRecord> = records.values().cloned().collect();
        all.sort_by_key(|t| (t.created_at, t.id));
        all
    }
}

/// Due order: earliest `next_run_at`, then creation time.
fn due_order(a: &TaskRecord, b: &TaskRecord) -> std::cmp::Ordering {
    (a.next_run_at, a.created_at, a.id).cmp(&(b.next_run_at, b.created_at, b.id))
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn enqueue(&self, task: TaskRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&task.id) {
            return Err(StoreError::conflict("task", task.id));
        }
        records.insert(task.id, task);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn claim_due_task(
        &self,
        criteria: ClaimCriteria,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let mut records = self.records.lock().await;

        let candidate = match criteria.task_id {
            Some(id) => records.get(&id).filter(|t| criteria.matches(t)).map(|t| t.id),
            None => records
                .values()
                .filter(|t| criteria.matches(t))
                .min_by(|a, b| due_order(a, b))
                .map(|t| t.id),
        };

        let Some(id) = candidate else {
            return Ok(None);
        };
        let Some(task) = records.get_mut(&id) else {
            return Ok(None);
        };
        task.mark_processing(criteria.now);
        Ok(Some(task.clone()))
    }

    async fn save(&self, task: &TaskRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let slot = records
            .get_mut(&task.id)
            .ok_or_else(|| StoreError::not_found("task", task.id))?;
        *slot = task.clone();
        Ok(())
    }

    async fn find_due_tasks(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let records = self.records.lock().await;
        let mut due: Vec<TaskRecord> = records
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by(due_order);
        due.truncate(limit);
        Ok(due)
    }

    async fn reap_expired_leases(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let mut records = self.records.lock().await;
        let mut reaped: Vec<TaskRecord> = records
            .values_mut()
            .filter(|t| t.lease_expired(stale_before))
            .map(|t| {
                t.expire_lease(now);
                t.clone()
            })
            .collect();
        reaped.sort_by(due_order);
        Ok(reaped)
    }

    async fn counts_by_status(&self) -> Result<QueueCounts, StoreError> {
        let records = self.records.lock().await;
        let mut counts = QueueCounts::default();
        for task in records.values() {
            counts.record(task.status);
        }
        Ok(counts)
    }

    async fn requeue_failed(
        &self,
        id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, StoreError> {
        let mut records = self.records.lock().await;
        let task = records
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("task", id))?;
        if task.status != TaskStatus::Failed {
            return Err(StoreError::InvalidState {
                id: id.to_string(),
                reason: format!("only failed tasks can be requeued (status is {})", task.status),
            });
        }
        task.requeue(now);
        Ok(task.clone())
    }
}

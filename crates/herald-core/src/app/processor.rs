//! JobProcessor - claim → kill switch → dispatch → decide → persist
//!
//! # フロー
//! 1. `TaskStore::claim_due_task` で processing に遷移（取れなければ Skipped）
//! 2. 外部メッセージング系でキルスイッチが ON なら attempt を増やさず failed
//! 3. `HandlerSet::dispatch` をタイムアウト付きで実行
//! 4. Decider が Complete / Retry / Fail を決める
//! 5. 終端状態なら recurrence の後続タスクを一件だけ登録してから、レコードを保存
//!
//! ストアのロックは handler 実行中には保持しない。
//! 結果を保存できなかった claim は processing のまま残るので、`lease` を過ぎたら
//! `reap_expired_leases` が pending に戻す（attempt は一つ進む）。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::Instrument;

use crate::domain::{
    Decider, Decision, DeliveryLog, DeliveryStatus, ErrorKind, JobError, LEASE_EXPIRED,
    ProcessOutcome, TaskId, TaskPayload, TaskRecord,
};
use crate::error::StoreError;
use crate::handlers::{HandlerSet, TaskContext};
use crate::ports::{
    ClaimCriteria, Clock, DeliveryLogStore, IdGenerator, PlatformSettings, TaskStore,
};

pub const KILL_SWITCH_REASON: &str = "external messaging disabled by platform administrator";

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("task store: {0}")]
    Store(#[from] StoreError),
}

pub struct JobProcessor {
    tasks: Arc<dyn TaskStore>,
    settings: Arc<dyn PlatformSettings>,
    logs: Arc<dyn DeliveryLogStore>,
    handlers: HandlerSet,
    decider: Arc<dyn Decider>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    handler_timeout: Duration,
    lease: Duration,
}

/// Collaborators of a `JobProcessor`.
pub struct ProcessorParts {
    pub tasks: Arc<dyn TaskStore>,
    pub settings: Arc<dyn PlatformSettings>,
    pub logs: Arc<dyn DeliveryLogStore>,
    pub handlers: HandlerSet,
    pub decider: Arc<dyn Decider>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub handler_timeout: Duration,
    /// How long a claim may stay `processing` before it is reaped.
    /// Never shorter than `handler_timeout`.
    pub lease: Duration,
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl JobProcessor {
    pub fn new(parts: ProcessorParts) -> Self {
        Self {
            tasks: parts.tasks,
            settings: parts.settings,
            logs: parts.logs,
            handlers: parts.handlers,
            decider: parts.decider,
            clock: parts.clock,
            ids: parts.ids,
            handler_timeout: parts.handler_timeout,
            lease: parts.lease.max(parts.handler_timeout),
        }
    }

    /// Runs one task if it can be claimed right now.
    pub async fn process(&self, task_id: TaskId) -> Result<ProcessOutcome, ProcessError> {
        let now = self.clock.now();
        let Some(mut task) = self
            .tasks
            .claim_due_task(ClaimCriteria::task(task_id, now))
            .await?
        else {
            tracing::debug!(task_id = %task_id, "not claimable, skipping");
            return Ok(ProcessOutcome::Skipped);
        };

        let span = tracing::info_span!(
            "task",
            task_id = %task.id,
            kind = %task.kind(),
            attempt = task.attempt
        );
        async move {
            let result = if task.kind().is_external_messaging() {
                match self.settings.automation_disabled().await {
                    Ok(true) => return self.abort(task).await,
                    Ok(false) => self.run_handler(&task, now).await,
                    Err(e) => Err(JobError::transient(format!("platform settings: {e}"))),
                }
            } else {
                self.run_handler(&task, now).await
            };
            self.resolve(&mut task, result).await
        }
        .instrument(span)
        .await
    }

    async fn abort(&self, mut task: TaskRecord) -> Result<ProcessOutcome, ProcessError> {
        let reason = JobError::new(ErrorKind::Shutdown, KILL_SWITCH_REASON).to_string();
        task.abort(reason.clone(), self.clock.now());
        self.tasks.save(&task).await?;
        tracing::warn!(task_id = %task.id, "kill switch active, task failed without running");
        Ok(ProcessOutcome::Failed { reason })
    }

    async fn run_handler(&self, task: &TaskRecord, now: DateTime<Utc>) -> Result<(), JobError> {
        let ctx = TaskContext {
            task_id: task.id,
            attempt: task.attempt.saturating_add(1),
            now,
        };
        match tokio::time::timeout(
            self.handler_timeout,
            self.handlers.dispatch(&ctx, task.payload.clone()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(JobError::transient(format!(
                "handler timed out after {}ms",
                self.handler_timeout.as_millis()
            ))),
        }
    }

    async fn resolve(
        &self,
        task: &mut TaskRecord,
        result: Result<(), JobError>,
    ) -> Result<ProcessOutcome, ProcessError> {
        let decision = self.decider.decide(task, &result);
        let done = self.clock.now();

        let outcome = match decision {
            Decision::Complete => {
                task.mark_completed(done);
                ProcessOutcome::Completed
            }
            Decision::Retry { delay, reason } => {
                let next_run_at = after(done, delay);
                task.schedule_retry(next_run_at, reason, done);
                ProcessOutcome::Rescheduled {
                    attempt: task.attempt,
                    next_run_at,
                }
            }
            Decision::Fail { reason } => {
                task.mark_failed(reason.clone(), done);
                ProcessOutcome::Failed { reason }
            }
        };
        // Successor first. If it cannot be enqueued the claim stays open and
        // is retried once its lease expires.
        if task.is_terminal() {
            self.enqueue_successor(task, done).await?;
        }
        self.tasks.save(task).await?;

        match &outcome {
            ProcessOutcome::Completed => tracing::info!("task completed"),
            ProcessOutcome::Rescheduled { attempt, next_run_at } => tracing::warn!(
                attempt,
                next_run_at = %next_run_at,
                error = task.error.as_deref().unwrap_or_default(),
                "task failed, retry scheduled"
            ),
            ProcessOutcome::Failed { reason } => {
                tracing::error!(attempt = task.attempt, error = %reason, "task failed permanently");
                self.log_permanent_failure(task, reason).await;
            }
            ProcessOutcome::Skipped => {}
        }
        Ok(outcome)
    }

    /// Puts claims older than the lease back in line. Returns how many.
    pub async fn reap_expired_leases(&self) -> Result<usize, ProcessError> {
        let now = self.clock.now();
        let stale_before = chrono::Duration::from_std(self.lease)
            .ok()
            .and_then(|lease| now.checked_sub_signed(lease))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let reaped = self.tasks.reap_expired_leases(stale_before, now).await?;

        for task in &reaped {
            tracing::warn!(
                task_id = %task.id,
                kind = %task.kind(),
                attempt = task.attempt,
                status = %task.status,
                "expired processing lease released"
            );
            if task.is_terminal() {
                self.log_permanent_failure(task, LEASE_EXPIRED).await;
                if let Err(e) = self.enqueue_successor(task, now).await {
                    tracing::error!(task_id = %task.id, error = %e, "failed to enqueue successor");
                }
            }
        }
        Ok(reaped.len())
    }

    async fn log_permanent_failure(&self, task: &TaskRecord, reason: &str) {
        let TaskPayload::MessageDelivery(p) = &task.payload else {
            return;
        };
        let entry = DeliveryLog {
            id: self.ids.generate_log_id(),
            tenant_id: p.tenant_id,
            channel: p.channel,
            recipient: p.recipient.clone(),
            status: DeliveryStatus::Failed,
            message: p.body.clone(),
            message_id: None,
            error: Some(format!(
                "Permanent failure after {} attempts: {reason}",
                task.attempt
            )),
            source: p.source.clone(),
            task_id: task.id,
            attempt: task.attempt,
            created_at: task.updated_at,
        };
        if let Err(e) = self.logs.append(entry).await {
            tracing::error!(error = %e, "failed to write permanent-failure log");
        }
    }

    async fn enqueue_successor(
        &self,
        task: &TaskRecord,
        now: DateTime<Utc>,
    ) -> Result<(), ProcessError> {
        let Some(next) = task.successor(now) else {
            return Ok(());
        };
        let next_id = next.id;
        let due = next.next_run_at;
        match self.tasks.enqueue(next).await {
            Ok(()) => {
                tracing::info!(next_task_id = %next_id, due = ?due, "recurring task re-enqueued");
                Ok(())
            }
            Err(StoreError::Conflict { .. }) => {
                tracing::debug!(next_task_id = %next_id, "successor already enqueued");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

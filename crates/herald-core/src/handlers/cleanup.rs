use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;

use crate::domain::{Cleanup, JobError};
use crate::ports::DeliveryLogStore;

use super::{Handler, TaskContext};

/// Deletes delivery logs older than the retention window. Rescheduling is
/// the processor's job (the task carries a recurrence).
pub struct CleanupHandler {
    pub logs: Arc<dyn DeliveryLogStore>,
}

#[async_trait]
impl Handler<Cleanup> for CleanupHandler {
    async fn handle(&self, ctx: &TaskContext, p: Cleanup) -> Result<(), JobError> {
        let cutoff = Duration::try_days(i64::from(p.retention_days))
            .and_then(|retention| ctx.now.checked_sub_signed(retention))
            .ok_or_else(|| {
                JobError::malformed(format!("retention of {} days is out of range", p.retention_days))
            })?;
        let deleted = self.logs.delete_older_than(cutoff).await?;
        tracing::info!(task_id = %ctx.task_id, deleted, cutoff = %cutoff, "old delivery logs removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProcessOutcome, TaskPayload, TaskStatus};
    use crate::testkit::{Harness, t0};

    #[tokio::test]
    async fn out_of_range_retention_fails_the_task() {
        let h = Harness::new().await;
        h.seed_logs_at(2, t0() - Duration::days(400)).await;
        let task = h
            .enqueue(TaskPayload::Cleanup(Cleanup {
                retention_days: u32::MAX,
            }))
            .await;

        let outcome = h.processor.process(task.id).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Failed { reason } if reason.starts_with("malformed")));
        assert_eq!(h.task(task.id).await.status, TaskStatus::Failed);
        assert_eq!(h.records.delivery_logs().await.len(), 2);
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::{
    Enrollment, EnrollmentStatus, JobError, SequenceStep, TaskPayload, TaskRecord,
};
use crate::ports::{EmailSender, IdGenerator, SequenceStore, TaskStore};
use crate::template;

use super::{Handler, TaskContext};

const MS_PER_HOUR: i64 = 3_600_000;

fn step_due(now: DateTime<Utc>, delay_hours: u32) -> Result<DateTime<Utc>, JobError> {
    Duration::try_milliseconds(i64::from(delay_hours) * MS_PER_HOUR)
        .and_then(|delay| now.checked_add_signed(delay))
        .ok_or_else(|| JobError::malformed(format!("step delay of {delay_hours}h is out of range")))
}

/// Sends one drip-sequence email and schedules the next step.
pub struct SequenceStepHandler {
    pub sequences: Arc<dyn SequenceStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub email: Arc<dyn EmailSender>,
    pub ids: Arc<dyn IdGenerator>,
    pub unsubscribe_base_url: String,
    /// Ceiling given to the next step's task.
    pub max_attempts: u32,
}

impl SequenceStepHandler {
    fn unsubscribe_footer(&self, enrollment: &Enrollment) -> String {
        format!(
            "<hr><p style=\"font-size:12px;color:#888\">\
             <a href=\"{}?enrollment={}\">Unsubscribe</a></p>",
            self.unsubscribe_base_url.trim_end_matches('/'),
            enrollment.id.as_ulid()
        )
    }
}

#[async_trait]
impl Handler<SequenceStep> for SequenceStepHandler {
    async fn handle(&self, ctx: &TaskContext, p: SequenceStep) -> Result<(), JobError> {
        let mut enrollment = self
            .sequences
            .enrollment(p.enrollment_id)
            .await?
            .ok_or_else(|| JobError::malformed(format!("enrollment {} not found", p.enrollment_id)))?;

        if enrollment.status != EnrollmentStatus::Active || enrollment.current_step != p.step_index {
            tracing::debug!(
                task_id = %ctx.task_id,
                enrollment_id = %enrollment.id,
                cursor = enrollment.current_step,
                step = p.step_index,
                "stale sequence step, skipping"
            );
            return Ok(());
        }

        let sequence = match self.sequences.sequence(enrollment.sequence_id).await? {
            Some(sequence) if sequence.is_active => sequence,
            _ => {
                tracing::info!(
                    enrollment_id = %enrollment.id,
                    sequence_id = %enrollment.sequence_id,
                    "sequence missing or inactive, cancelling enrollment"
                );
                enrollment.status = EnrollmentStatus::Cancelled;
                enrollment.next_step_due_at = None;
                enrollment.updated_at = ctx.now;
                self.sequences.save_enrollment(enrollment).await?;
                return Ok(());
            }
        };

        let Some(step) = sequence.step(p.step_index) else {
            // Steps were removed after this task was scheduled.
            enrollment.status = EnrollmentStatus::Completed;
            enrollment.next_step_due_at = None;
            enrollment.updated_at = ctx.now;
            self.sequences.save_enrollment(enrollment).await?;
            return Ok(());
        };

        let next_index = p.step_index.saturating_add(1);
        // A bad delay fails the task before any email goes out.
        let next_due = sequence
            .step(next_index)
            .map(|next| step_due(ctx.now, next.delay_hours))
            .transpose()?;

        let mut vars = BTreeMap::new();
        vars.insert(
            "firstName".to_string(),
            enrollment.first_name.clone().unwrap_or_default(),
        );
        vars.insert("email".to_string(), enrollment.email.clone());
        vars.extend(p.variables.clone());

        let subject = template::render(&step.subject, &vars);
        let mut html = template::render(&step.content, &vars);
        html.push_str(&self.unsubscribe_footer(&enrollment));

        self.email
            .send(&enrollment.email, &subject, &html)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;

        match next_due {
            Some(due) => {
                let task = TaskRecord::new(
                    self.ids.generate_task_id(),
                    TaskPayload::SequenceStep(SequenceStep {
                        enrollment_id: enrollment.id,
                        step_index: next_index,
                        variables: p.variables,
                    }),
                    ctx.now,
                )
                .with_max_attempts(self.max_attempts)
                .due_at(due);
                let next_task_id = task.id;
                self.tasks.enqueue(task).await?;

                enrollment.current_step = next_index;
                enrollment.next_step_due_at = Some(due);
                enrollment.updated_at = ctx.now;
                self.sequences.save_enrollment(enrollment).await?;
                tracing::debug!(task_id = %ctx.task_id, next_task_id = %next_task_id, due = %due, "next sequence step scheduled");
            }
            None => {
                let sequence_id = enrollment.sequence_id;
                enrollment.status = EnrollmentStatus::Completed;
                enrollment.current_step = next_index;
                enrollment.next_step_due_at = None;
                enrollment.updated_at = ctx.now;
                self.sequences.save_enrollment(enrollment).await?;
                self.sequences.increment_completed(sequence_id).await?;
                tracing::info!(task_id = %ctx.task_id, sequence_id = %sequence_id, "sequence completed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProcessOutcome, SequenceStepDef, TaskStatus};
    use crate::testkit::{Harness, t0};

    #[test]
    fn step_due_is_delay_hours_later() {
        assert_eq!(step_due(t0(), 24).unwrap(), t0() + Duration::hours(24));
        assert!(step_due(DateTime::<Utc>::MAX_UTC, 1).is_err());
    }

    #[tokio::test]
    async fn out_of_range_delay_fails_without_sending() {
        let h = Harness::new().await;
        let (enrollment, _) = h
            .seed_sequence(vec![
                SequenceStepDef {
                    subject: "s".into(),
                    content: "c".into(),
                    delay_hours: 0,
                },
                SequenceStepDef {
                    subject: "later".into(),
                    content: "c".into(),
                    delay_hours: u32::MAX,
                },
            ])
            .await;
        let task = h.sequence_task(enrollment.id, 0).await;

        let outcome = h.processor.process(task.id).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Failed { reason } if reason.starts_with("malformed")));
        assert_eq!(h.task(task.id).await.status, TaskStatus::Failed);
        assert!(h.email.sent().is_empty());
        assert_eq!(h.tasks.all().await.len(), 1);
    }
}

//! Poller - 定期的に期限の来たタスクを拾って JobProcessor に渡す
//!
//! - 一回の tick で最大 `batch_size` 件、同時実行は `concurrency` 件まで
//! - 二重実行の防止は claim 側の仕事。ここでは候補を列挙するだけ
//! - 各 tick の最初に lease 切れの processing を回収する
//! - shutdown 要求が来ても実行中の tick は最後まで終わらせる

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::domain::ProcessOutcome;
use crate::ports::{Clock, TaskStore};

use super::processor::JobProcessor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerSettings {
    pub interval: Duration,
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            batch_size: 10,
            concurrency: 1,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub scanned: usize,
    pub completed: usize,
    pub rescheduled: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Expired claims put back in line before the scan.
    pub reaped: usize,
    /// Store failures while reaping or processing.
    pub errors: usize,
}

impl TickReport {
    fn record(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Skipped => self.skipped += 1,
            ProcessOutcome::Completed => self.completed += 1,
            ProcessOutcome::Rescheduled { .. } => self.rescheduled += 1,
            ProcessOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

pub struct Poller {
    processor: Arc<JobProcessor>,
    tasks: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    settings: PollerSettings,
}

impl Poller {
    pub fn new(
        processor: Arc<JobProcessor>,
        tasks: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            processor,
            tasks,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    /// One scan of the store. Never fails; problems are logged and counted.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        match self.processor.reap_expired_leases().await {
            Ok(reaped) => report.reaped = reaped,
            Err(e) => {
                report.errors += 1;
                tracing::error!(error = %e, "failed to reap expired leases");
            }
        }

        let now = self.clock.now();
        let due = match self.tasks.find_due_tasks(now, self.settings.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "failed to scan for due tasks");
                return report;
            }
        };

        report.scanned = due.len();
        if due.is_empty() {
            return report;
        }

        let results: Vec<_> = futures::stream::iter(due.into_iter().map(|task| task.id))
            .map(|id| async move { (id, self.processor.process(id).await) })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        for (id, result) in results {
            match result {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(task_id = %id, error = %e, "task processing aborted");
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            completed = report.completed,
            rescheduled = report.rescheduled,
            failed = report.failed,
            skipped = report.skipped,
            reaped = report.reaped,
            errors = report.errors,
            "poll tick finished"
        );
        report
    }

    /// Runs `tick` every `interval` until shutdown is requested.
    pub fn spawn(self) -> PollerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let period = self.settings.interval.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                interval_ms = period.as_millis() as u64,
                batch_size = self.settings.batch_size,
                concurrency = self.settings.concurrency,
                "poller started"
            );

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // sender gone: nobody can stop us any more, so stop now
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
            tracing::info!("poller stopped");
        });

        PollerHandle { shutdown_tx, join }
    }
}

/// Handle to a spawned poller.
/// - `request_shutdown` は新しい tick を止めるだけで、実行中の処理は中断しない
pub struct PollerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already have exited
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop and wait for the in-flight tick to finish.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "poller task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Cleanup, TaskPayload, TaskStatus};
    use crate::testkit::{Harness, LEASE, t0};
    use chrono::Duration as ChronoDuration;

    fn poller(h: &Harness, batch_size: usize, concurrency: usize) -> Poller {
        Poller::new(
            h.processor.clone(),
            h.tasks.clone(),
            h.clock.clone(),
            PollerSettings {
                interval: Duration::from_millis(100),
                batch_size,
                concurrency,
            },
        )
    }

    fn cleanup() -> TaskPayload {
        TaskPayload::Cleanup(Cleanup { retention_days: 30 })
    }

    #[tokio::test]
    async fn tick_takes_at_most_batch_size() {
        let h = Harness::new().await;
        for _ in 0..3 {
            h.enqueue(cleanup()).await;
        }
        let poller = poller(&h, 2, 1);

        let first = poller.tick().await;
        assert_eq!(first.scanned, 2);
        assert_eq!(first.completed, 2);

        let second = poller.tick().await;
        assert_eq!(second.scanned, 1);
        assert_eq!(second.completed, 1);

        assert_eq!(poller.tick().await, TickReport::default());
    }

    #[tokio::test]
    async fn tick_ignores_tasks_not_yet_due() {
        let h = Harness::new().await;
        let later = h
            .enqueue_record(|id, now| {
                crate::domain::TaskRecord::new(id, cleanup(), now)
                    .due_at(now + ChronoDuration::minutes(5))
            })
            .await;
        let poller = poller(&h, 10, 1);

        assert_eq!(poller.tick().await.scanned, 0);

        h.clock.advance(ChronoDuration::minutes(5));
        assert_eq!(poller.tick().await.completed, 1);
        assert_eq!(h.task(later.id).await.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn concurrent_tick_sends_each_message_once() {
        let h = Harness::new().await;
        let mut ids = Vec::new();
        for _ in 0..6 {
            ids.push(h.message_task("hello").await.id);
        }
        let poller = poller(&h, 10, 4);

        let report = poller.tick().await;
        assert_eq!(report.scanned, 6);
        assert_eq!(report.completed, 6);
        assert_eq!(h.api.calls(), 6);
        for id in ids {
            assert_eq!(h.task(id).await.status, TaskStatus::Completed);
        }
    }

    #[tokio::test]
    async fn retries_show_up_as_rescheduled() {
        let h = Harness::new().await;
        h.api.fail_with_transport();
        h.message_task("hello").await;

        let report = poller(&h, 10, 1).tick().await;
        assert_eq!(report.rescheduled, 1);
        assert_eq!(h.clock.now(), t0());
    }

    #[tokio::test]
    async fn tick_releases_expired_claims_before_scanning() {
        let h = Harness::new().await;
        let task = h.enqueue(cleanup()).await;
        h.tasks.fail_saves(1);
        let poller = poller(&h, 10, 1);

        let first = poller.tick().await;
        assert_eq!((first.scanned, first.errors), (1, 1));
        assert_eq!(h.task(task.id).await.status, TaskStatus::Processing);

        h.clock.advance(ChronoDuration::from_std(LEASE).unwrap());
        let second = poller.tick().await;
        assert_eq!((second.reaped, second.completed), (1, 1));
        assert_eq!(h.task(task.id).await.status, TaskStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_poller_runs_until_shutdown() {
        let h = Harness::new().await;
        let task = h.enqueue(cleanup()).await;
        let handle = poller(&h, 10, 1).spawn();

        for _ in 0..50 {
            if h.task(task.id).await.status == TaskStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(h.task(task.id).await.status, TaskStatus::Completed);

        handle.shutdown_and_join().await;

        // Nothing picks this one up any more.
        let late = h.enqueue(cleanup()).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.task(late.id).await.status, TaskStatus::Pending);
    }
}

//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）：足りない collaborator は名前付きでまとめて報告
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{CleanupConfig, HeraldConfig};
use crate::delivery::{BreakerSnapshot, CircuitBreaker, DeliveryClient};
use crate::domain::{
    Cleanup, DefaultDecider, ProcessOutcome, QueueCounts, Recurrence, RetryPolicy, TaskId,
    TaskPayload, TaskRecord, TenantId,
};
use crate::error::StoreError;
use crate::handlers::{
    BroadcastHandler, CleanupHandler, HandlerSet, MessageDeliveryHandler, SequenceStepHandler,
};
use crate::impls::InMemoryRecords;
use crate::ports::{
    BroadcastStore, Clock, CredentialStore, DeliveryLogStore, EmailSender, IdGenerator,
    MessagingApi, PlanStore, PlatformSettings, SequenceStore, SystemClock, TaskStore,
    UlidGenerator,
};
use crate::quota::{QuotaGate, QuotaSnapshot};
use crate::vault::{CredentialService, CredentialVault, KeyRing, VaultError};

use super::poller::{Poller, PollerHandle, PollerSettings};
use super::processor::{JobProcessor, ProcessError, ProcessorParts};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(config)
///     .task_store(Arc::new(InMemoryTaskStore::new()))
///     .with_in_memory_records(records)
///     .messaging_api(Arc::new(GraphMessagingApi::new(settings)?))
///     .email_sender(Arc::new(LogEmailSender))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - build() 時にすべての port が揃っているかチェック
/// - 不足があれば BuildError::MissingCollaborators を返す
pub struct AppBuilder {
    config: HeraldConfig,
    tasks: Option<Arc<dyn TaskStore>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    plans: Option<Arc<dyn PlanStore>>,
    logs: Option<Arc<dyn DeliveryLogStore>>,
    sequences: Option<Arc<dyn SequenceStore>>,
    broadcasts: Option<Arc<dyn BroadcastStore>>,
    settings: Option<Arc<dyn PlatformSettings>>,
    api: Option<Arc<dyn MessagingApi>>,
    email: Option<Arc<dyn EmailSender>>,
    clock: Arc<dyn Clock>,
    vault: Option<Arc<CredentialVault>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing collaborators: {0:?}. These ports must be provided before build().")]
    MissingCollaborators(Vec<&'static str>),

    #[error("vault: {0}")]
    Vault(#[from] VaultError),
}

impl AppBuilder {
    pub fn new(config: HeraldConfig) -> Self {
        Self {
            config,
            tasks: None,
            credentials: None,
            plans: None,
            logs: None,
            sequences: None,
            broadcasts: None,
            settings: None,
            api: None,
            email: None,
            clock: Arc::new(SystemClock),
            vault: None,
        }
    }

    pub fn task_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.tasks = Some(store);
        self
    }

    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn plan_store(mut self, store: Arc<dyn PlanStore>) -> Self {
        self.plans = Some(store);
        self
    }

    pub fn delivery_log_store(mut self, store: Arc<dyn DeliveryLogStore>) -> Self {
        self.logs = Some(store);
        self
    }

    pub fn sequence_store(mut self, store: Arc<dyn SequenceStore>) -> Self {
        self.sequences = Some(store);
        self
    }

    pub fn broadcast_store(mut self, store: Arc<dyn BroadcastStore>) -> Self {
        self.broadcasts = Some(store);
        self
    }

    pub fn platform_settings(mut self, settings: Arc<dyn PlatformSettings>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Every record port (and the kill switch) from one in-memory instance.
    pub fn with_in_memory_records(self, records: Arc<InMemoryRecords>) -> Self {
        self.credential_store(records.clone())
            .plan_store(records.clone())
            .delivery_log_store(records.clone())
            .sequence_store(records.clone())
            .broadcast_store(records.clone())
            .platform_settings(records)
    }

    pub fn messaging_api(mut self, api: Arc<dyn MessagingApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn email_sender(mut self, email: Arc<dyn EmailSender>) -> Self {
        self.email = Some(email);
        self
    }

    /// Defaults to `SystemClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Overrides the vault built from `config.vault`.
    pub fn vault(mut self, vault: Arc<CredentialVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    fn missing(&self) -> Vec<&'static str> {
        [
            ("task_store", self.tasks.is_none()),
            ("credential_store", self.credentials.is_none()),
            ("plan_store", self.plans.is_none()),
            ("delivery_log_store", self.logs.is_none()),
            ("sequence_store", self.sequences.is_none()),
            ("broadcast_store", self.broadcasts.is_none()),
            ("platform_settings", self.settings.is_none()),
            ("messaging_api", self.api.is_none()),
            ("email_sender", self.email.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect()
    }

    fn build_vault(&self) -> Result<Arc<CredentialVault>, VaultError> {
        if let Some(vault) = &self.vault {
            return Ok(vault.clone());
        }
        let keys = &self.config.vault;
        let current = keys
            .current_key
            .as_deref()
            .ok_or(VaultError::MissingKey(crate::domain::KeyVersion::Current))?;
        let ring = KeyRing::from_hex(
            current,
            keys.previous_key.as_deref(),
            keys.legacy_key.as_deref(),
        )?;
        Ok(Arc::new(CredentialVault::new(ring)))
    }

    /// AppBuilder を構築して App を生成
    ///
    /// # 検証
    /// - すべての port が設定されているか
    /// - vault の鍵が読めるか
    pub fn build(self) -> Result<App, BuildError> {
        let missing = self.missing();
        let vault = self.build_vault();

        let (
            Some(tasks),
            Some(credentials),
            Some(plans),
            Some(logs),
            Some(sequences),
            Some(broadcasts),
            Some(settings),
            Some(api),
            Some(email),
        ) = (
            self.tasks,
            self.credentials,
            self.plans,
            self.logs,
            self.sequences,
            self.broadcasts,
            self.settings,
            self.api,
            self.email,
        )
        else {
            return Err(BuildError::MissingCollaborators(missing));
        };
        let vault = vault?;

        let config = self.config;
        let clock = self.clock;
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
        let retry_policy = config.retry.policy();

        let breaker = Arc::new(CircuitBreaker::new(config.breaker.settings(), clock.clone()));
        let client = Arc::new(DeliveryClient::new(api, breaker.clone()));
        let quota = Arc::new(QuotaGate::new(plans, logs.clone()));

        let handlers = HandlerSet {
            message: Arc::new(MessageDeliveryHandler {
                quota: quota.clone(),
                credentials: credentials.clone(),
                vault: vault.clone(),
                client: client.clone(),
                logs: logs.clone(),
                ids: ids.clone(),
            }),
            sequence: Arc::new(SequenceStepHandler {
                sequences,
                tasks: tasks.clone(),
                email,
                ids: ids.clone(),
                unsubscribe_base_url: config.sequence.unsubscribe_base_url.clone(),
                max_attempts: retry_policy.max_attempts,
            }),
            broadcast: Arc::new(BroadcastHandler {
                broadcasts,
                quota: quota.clone(),
                credentials: credentials.clone(),
                vault: vault.clone(),
                client,
                logs: logs.clone(),
                ids: ids.clone(),
            }),
            cleanup: Arc::new(CleanupHandler { logs: logs.clone() }),
        };

        let processor = Arc::new(JobProcessor::new(ProcessorParts {
            tasks: tasks.clone(),
            settings,
            logs,
            handlers,
            decider: Arc::new(DefaultDecider::new(retry_policy.clone())),
            clock: clock.clone(),
            ids: ids.clone(),
            handler_timeout: Duration::from_millis(config.worker.handler_timeout_ms),
            lease: Duration::from_millis(config.worker.lease_ms),
        }));

        let poller_settings = PollerSettings {
            interval: Duration::from_millis(config.worker.poll_interval_ms),
            batch_size: config.worker.batch_size,
            concurrency: config.worker.concurrency,
        };

        Ok(App {
            processor,
            tasks,
            breaker,
            quota,
            credentials: CredentialService::new(vault.clone(), credentials, clock.clone()),
            vault,
            clock,
            ids,
            retry_policy,
            poller_settings,
            cleanup: config.cleanup,
        })
    }
}

/// App はアプリケーションのランタイム
///
/// - タスクの投入（単発・遅延・定期）
/// - 単発処理と Poller の起動
/// - 運用向けの参照（キュー件数、ブレーカー状態、クォータ）と requeue
pub struct App {
    processor: Arc<JobProcessor>,
    tasks: Arc<dyn TaskStore>,
    breaker: Arc<CircuitBreaker>,
    quota: Arc<QuotaGate>,
    credentials: CredentialService,
    vault: Arc<CredentialVault>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retry_policy: RetryPolicy,
    poller_settings: PollerSettings,
    cleanup: CleanupConfig,
}

impl App {
    fn new_task(&self, payload: TaskPayload) -> TaskRecord {
        TaskRecord::new(self.ids.generate_task_id(), payload, self.clock.now())
            .with_max_attempts(self.retry_policy.max_attempts)
    }

    async fn insert(&self, task: TaskRecord) -> Result<TaskRecord, StoreError> {
        self.tasks.enqueue(task.clone()).await?;
        tracing::info!(task_id = %task.id, kind = %task.kind(), due = ?task.next_run_at, "task enqueued");
        Ok(task)
    }

    /// Enqueue a task due now.
    pub async fn enqueue(&self, payload: TaskPayload) -> Result<TaskRecord, StoreError> {
        self.insert(self.new_task(payload)).await
    }

    pub async fn enqueue_at(
        &self,
        payload: TaskPayload,
        at: DateTime<Utc>,
    ) -> Result<TaskRecord, StoreError> {
        self.insert(self.new_task(payload).due_at(at)).await
    }

    /// Due now, then re-created every `recurrence` after each resolution.
    pub async fn enqueue_recurring(
        &self,
        payload: TaskPayload,
        recurrence: Recurrence,
    ) -> Result<TaskRecord, StoreError> {
        self.insert(self.new_task(payload).with_recurrence(recurrence))
            .await
    }

    /// The hourly delivery-log cleanup, as configured.
    pub async fn schedule_cleanup(&self) -> Result<TaskRecord, StoreError> {
        self.enqueue_recurring(
            TaskPayload::Cleanup(Cleanup {
                retention_days: self.cleanup.retention_days,
            }),
            Recurrence::every_ms(self.cleanup.interval_ms),
        )
        .await
    }

    pub async fn process(&self, task_id: TaskId) -> Result<ProcessOutcome, ProcessError> {
        self.processor.process(task_id).await
    }

    pub fn poller(&self) -> Poller {
        Poller::new(
            self.processor.clone(),
            self.tasks.clone(),
            self.clock.clone(),
            self.poller_settings.clone(),
        )
    }

    pub fn spawn_poller(&self) -> PollerHandle {
        self.poller().spawn()
    }

    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    pub async fn queue_counts(&self) -> Result<QueueCounts, StoreError> {
        self.tasks.counts_by_status().await
    }

    /// Operator action: give a failed task a fresh set of attempts.
    pub async fn requeue_failed(&self, task_id: TaskId) -> Result<TaskRecord, StoreError> {
        let task = self.tasks.requeue_failed(task_id, self.clock.now()).await?;
        tracing::info!(task_id = %task.id, kind = %task.kind(), "failed task requeued");
        Ok(task)
    }

    pub async fn quota_snapshot(&self, tenant: TenantId) -> Result<QuotaSnapshot, StoreError> {
        self.quota.snapshot(tenant, self.clock.now()).await
    }

    pub fn credentials(&self) -> &CredentialService {
        &self.credentials
    }

    /// For key rotation.
    pub fn vault(&self) -> &Arc<CredentialVault> {
        &self.vault
    }
}

//! テスト用の部品（台本どおりに答える API、送信を記録するメール、組み立て済みの Harness）。

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use crate::app::{JobProcessor, ProcessorParts};
use crate::delivery::{BreakerSettings, CircuitBreaker, DeliveryClient};
use crate::domain::{
    Broadcast, BroadcastId, BroadcastStatus, Channel, CredentialId, CredentialRecord,
    DefaultDecider, DeliveryLog, DeliveryStatus, Enrollment, EnrollmentId, EnrollmentStatus,
    KeyVersion, LogId, MessageDelivery, Plan, PlanTier, QueueCounts, RetryPolicy, SealedSecret,
    Sequence, SequenceId, SequenceStats, SequenceStep, SequenceStepDef, Subscription,
    SubscriptionStatus, TaskId, TaskPayload, TaskRecord, TenantId, TokenStatus,
};
use crate::error::StoreError;
use crate::handlers::{
    BroadcastHandler, CleanupHandler, HandlerSet, MessageDeliveryHandler, SequenceStepHandler,
};
use crate::impls::{InMemoryRecords, InMemoryTaskStore};
use crate::ports::{
    ApiResponse, BroadcastStore, ClaimCriteria, Clock, CredentialStore, DeliveryLogStore, EmailError,
    EmailReceipt, EmailSender, FixedClock, IdGenerator, MessagingApi, OutboundMessage,
    SequenceStore, TaskStore, TransportError, UlidGenerator,
};
use crate::quota::QuotaGate;
use crate::vault::{
    CredentialVault, KeyRing, SecretToken, VaultKey, legacy_encrypt_for_test,
};

pub const LEGACY_KEY: [u8; 32] = [0x07; 32];

/// 2026-03-01 09:00 UTC
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

pub fn success_log(tenant: TenantId, at: DateTime<Utc>) -> DeliveryLog {
    DeliveryLog {
        id: LogId::generate(),
        tenant_id: tenant,
        channel: Channel::Instagram,
        recipient: "1789".into(),
        status: DeliveryStatus::Success,
        message: "hi".into(),
        message_id: Some("m_seed".into()),
        error: None,
        source: None,
        task_id: TaskId::generate(),
        attempt: 1,
        created_at: at,
    }
}

type Scripted = Result<ApiResponse, TransportError>;

/// `MessagingApi` that answers from a queue, then with a default.
pub struct ScriptedApi {
    queue: Mutex<VecDeque<Scripted>>,
    default: Mutex<Scripted>,
    hang: AtomicBool,
    calls: AtomicUsize,
    sent: Mutex<Vec<(String, String)>>,
}

impl ScriptedApi {
    pub fn always(response: ApiResponse) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default: Mutex::new(Ok(response)),
            hang: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn always_transport(err: TransportError) -> Self {
        let api = Self::always(ApiResponse::ok(json!({})));
        *api.default.lock().unwrap() = Err(err);
        api
    }

    pub fn push(&self, answer: Scripted) {
        self.queue.lock().unwrap().push_back(answer);
    }

    pub fn fail_with_transport(&self) {
        *self.default.lock().unwrap() = Err(TransportError::Timeout);
    }

    /// Every later call never returns.
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, text)| text.clone()).collect()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(token, _)| token.clone()).collect()
    }
}

#[async_trait]
impl MessagingApi for ScriptedApi {
    async fn post_message(
        &self,
        message: &OutboundMessage,
        token: &SecretToken,
    ) -> Result<ApiResponse, TransportError> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .unwrap()
            .push((token.expose().to_string(), message.text.clone()));
        let next = self.queue.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.default.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// `EmailSender` that keeps what it was asked to send.
#[derive(Default)]
pub struct RecordingEmail {
    sent: Mutex<Vec<SentEmail>>,
    fail_next: AtomicBool,
}

impl RecordingEmail {
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmail {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<EmailReceipt, EmailError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(EmailError("provider returned 502".into()));
        }
        self.sent.lock().unwrap().push(SentEmail {
            to: to.into(),
            subject: subject.into(),
            html: html.into(),
        });
        Ok(EmailReceipt {
            message_id: Some("email_1".into()),
        })
    }
}

/// `InMemoryTaskStore` whose next `save`/`enqueue` calls can be made to fail.
#[derive(Default)]
pub struct FlakyTaskStore {
    inner: InMemoryTaskStore,
    failing_saves: AtomicUsize,
    failing_enqueues: AtomicUsize,
}

impl FlakyTaskStore {
    pub fn fail_saves(&self, n: usize) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    pub fn fail_enqueues(&self, n: usize) {
        self.failing_enqueues.store(n, Ordering::SeqCst);
    }

    pub async fn all(&self) -> Vec<TaskRecord> {
        self.inner.all().await
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TaskStore for FlakyTaskStore {
    async fn enqueue(&self, task: TaskRecord) -> Result<(), StoreError> {
        if Self::take_failure(&self.failing_enqueues) {
            return Err(StoreError::Backend("connection reset".into()));
        }
        self.inner.enqueue(task).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn claim_due_task(
        &self,
        criteria: ClaimCriteria,
    ) -> Result<Option<TaskRecord>, StoreError> {
        self.inner.claim_due_task(criteria).await
    }

    async fn save(&self, task: &TaskRecord) -> Result<(), StoreError> {
        if Self::take_failure(&self.failing_saves) {
            return Err(StoreError::Backend("connection reset".into()));
        }
        self.inner.save(task).await
    }

    async fn find_due_tasks(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.find_due_tasks(now, limit).await
    }

    async fn reap_expired_leases(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.reap_expired_leases(stale_before, now).await
    }

    async fn counts_by_status(&self) -> Result<QueueCounts, StoreError> {
        self.inner.counts_by_status().await
    }

    async fn requeue_failed(
        &self,
        id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, StoreError> {
        self.inner.requeue_failed(id, now).await
    }
}

/// Lease used by the harness processor.
pub const LEASE: Duration = Duration::from_secs(60);

/// Processor wired to in-memory everything, with one tenant on the Creator
/// plan and one valid Instagram credential.
pub struct Harness {
    pub clock: Arc<FixedClock>,
    pub tasks: Arc<FlakyTaskStore>,
    pub records: Arc<InMemoryRecords>,
    pub api: Arc<ScriptedApi>,
    pub email: Arc<RecordingEmail>,
    pub breaker: Arc<CircuitBreaker>,
    pub vault: Arc<CredentialVault>,
    pub ids: Arc<dyn IdGenerator>,
    pub processor: Arc<JobProcessor>,
    pub tenant_id: TenantId,
    pub credential_id: CredentialId,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_handler_timeout(Duration::from_secs(5)).await
    }

    pub async fn with_handler_timeout(handler_timeout: Duration) -> Self {
        let clock = Arc::new(FixedClock::new(t0()));
        let tasks = Arc::new(FlakyTaskStore::default());
        let records = Arc::new(InMemoryRecords::new());
        let api = Arc::new(ScriptedApi::always(ApiResponse::ok(
            json!({"recipient_id": "1789", "message_id": "m_1"}),
        )));
        let email = Arc::new(RecordingEmail::default());
        let breaker = Arc::new(CircuitBreaker::new(BreakerSettings::default(), clock.clone()));
        let vault = Arc::new(CredentialVault::new(
            KeyRing::new(VaultKey::generate())
                .with_legacy(VaultKey::from_bytes(&LEGACY_KEY).unwrap()),
        ));
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
        let client = Arc::new(DeliveryClient::new(api.clone(), breaker.clone()));
        let quota = Arc::new(QuotaGate::new(records.clone(), records.clone()));

        let handlers = HandlerSet {
            message: Arc::new(MessageDeliveryHandler {
                quota: quota.clone(),
                credentials: records.clone(),
                vault: vault.clone(),
                client: client.clone(),
                logs: records.clone(),
                ids: ids.clone(),
            }),
            sequence: Arc::new(SequenceStepHandler {
                sequences: records.clone(),
                tasks: tasks.clone(),
                email: email.clone(),
                ids: ids.clone(),
                unsubscribe_base_url: "https://herald.test/unsubscribe".into(),
                max_attempts: RetryPolicy::default().max_attempts,
            }),
            broadcast: Arc::new(BroadcastHandler {
                broadcasts: records.clone(),
                quota,
                credentials: records.clone(),
                vault: vault.clone(),
                client,
                logs: records.clone(),
                ids: ids.clone(),
            }),
            cleanup: Arc::new(CleanupHandler {
                logs: records.clone(),
            }),
        };

        let processor = Arc::new(JobProcessor::new(ProcessorParts {
            tasks: tasks.clone(),
            settings: records.clone(),
            logs: records.clone(),
            handlers,
            decider: Arc::new(DefaultDecider::default()),
            clock: clock.clone(),
            ids: ids.clone(),
            handler_timeout,
            lease: LEASE,
        }));

        let tenant_id = TenantId::generate();
        let credential_id = CredentialId::generate();
        records
            .put_subscription(Subscription {
                tenant_id,
                plan: "creator".into(),
                status: SubscriptionStatus::Active,
            })
            .await;
        let secret = vault.encrypt("IGQV-current", KeyVersion::Current).unwrap();
        records
            .save(CredentialRecord {
                id: credential_id,
                tenant_id,
                channel: Channel::Instagram,
                account_id: "17841400000000000".into(),
                secret,
                token_status: TokenStatus::Valid,
                expires_at: None,
                updated_at: t0(),
            })
            .await
            .unwrap();

        Self {
            clock,
            tasks,
            records,
            api,
            email,
            breaker,
            vault,
            ids,
            processor,
            tenant_id,
            credential_id,
        }
    }

    pub async fn enqueue(&self, payload: TaskPayload) -> TaskRecord {
        self.enqueue_record(|id, now| TaskRecord::new(id, payload, now)).await
    }

    pub async fn enqueue_record(
        &self,
        build: impl FnOnce(TaskId, DateTime<Utc>) -> TaskRecord,
    ) -> TaskRecord {
        let task = build(self.ids.generate_task_id(), self.clock.now());
        self.tasks.enqueue(task.clone()).await.unwrap();
        task
    }

    pub async fn message_task(&self, body: &str) -> TaskRecord {
        let mut variables = BTreeMap::new();
        variables.insert("firstName".to_string(), "Ana".to_string());
        self.enqueue(TaskPayload::MessageDelivery(MessageDelivery {
            tenant_id: self.tenant_id,
            credential_id: self.credential_id,
            channel: Channel::Instagram,
            recipient: "1789".into(),
            body: body.into(),
            variables,
            source: Some("automation".into()),
            rule_id: Some("rule_1".into()),
        }))
        .await
    }

    pub async fn sequence_task(&self, enrollment_id: EnrollmentId, step_index: usize) -> TaskRecord {
        self.enqueue(TaskPayload::SequenceStep(SequenceStep {
            enrollment_id,
            step_index,
            variables: BTreeMap::new(),
        }))
        .await
    }

    pub async fn task(&self, id: TaskId) -> TaskRecord {
        self.tasks.get(id).await.unwrap().unwrap()
    }

    pub async fn broadcast(&self, id: BroadcastId) -> Broadcast {
        self.records.broadcast(id).await.unwrap().unwrap()
    }

    pub async fn set_plan_limit(&self, limit: u64) {
        self.records
            .put_plan(Plan {
                tier: PlanTier::Creator,
                name: "Creator".into(),
                deliveries_per_month: Some(limit),
            })
            .await;
    }

    pub async fn seed_success_logs(&self, n: usize) {
        for _ in 0..n {
            self.records
                .append(success_log(self.tenant_id, self.clock.now()))
                .await
                .unwrap();
        }
    }

    pub async fn seed_logs_at(&self, n: usize, at: DateTime<Utc>) {
        for _ in 0..n {
            self.records.append(success_log(self.tenant_id, at)).await.unwrap();
        }
    }

    pub async fn seed_sequence(&self, steps: Vec<SequenceStepDef>) -> (Enrollment, Sequence) {
        let sequence = Sequence {
            id: SequenceId::generate(),
            tenant_id: self.tenant_id,
            name: "Onboarding".into(),
            is_active: true,
            steps,
            stats: SequenceStats::default(),
        };
        let enrollment = Enrollment {
            id: EnrollmentId::generate(),
            sequence_id: sequence.id,
            tenant_id: self.tenant_id,
            email: "ana@example.com".into(),
            first_name: Some("Ana".into()),
            status: EnrollmentStatus::Active,
            current_step: 0,
            next_step_due_at: Some(self.clock.now()),
            updated_at: self.clock.now(),
        };
        self.records.put_sequence(sequence.clone()).await;
        self.records.save_enrollment(enrollment.clone()).await.unwrap();
        (enrollment, sequence)
    }

    pub async fn seed_broadcast(&self, recipients: Vec<String>) -> Broadcast {
        let broadcast = Broadcast {
            id: BroadcastId::generate(),
            tenant_id: self.tenant_id,
            credential_id: self.credential_id,
            channel: Channel::Instagram,
            message: "Sale starts now".into(),
            recipients,
            status: BroadcastStatus::Scheduled,
            sent_count: 0,
            failed_count: 0,
            sent_at: None,
        };
        self.records.put_broadcast(broadcast.clone()).await;
        broadcast
    }

    /// Swaps the stored credential for one sealed with the pre-GCM cipher.
    pub async fn replace_with_legacy_credential(&self, token: &str) {
        let iv = [0x11u8; 16];
        let mut record = self.records.get(self.credential_id).await.unwrap().unwrap();
        record.secret = SealedSecret {
            ciphertext: legacy_encrypt_for_test(&LEGACY_KEY, &iv, token),
            iv: iv.to_vec(),
            tag: Vec::new(),
            key_version: KeyVersion::Legacy,
        };
        self.records.save(record).await.unwrap();
    }
}

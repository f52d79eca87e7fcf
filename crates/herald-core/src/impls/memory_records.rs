//! In-memory implementation of every record port. Used by tests and the CLI demo.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    Broadcast, BroadcastId, CredentialId, CredentialRecord, DeliveryLog, DeliveryStatus,
    Enrollment, EnrollmentId, Plan, PlanTier, Sequence, SequenceId, Subscription, TenantId,
    TokenStatus,
};
use crate::error::StoreError;
use crate::ports::{
    BroadcastStore, CredentialStore, DeliveryLogStore, PlanStore, PlatformSettings, SequenceStore,
};

#[derive(Default)]
struct Tables {
    credentials: HashMap<CredentialId, CredentialRecord>,
    subscriptions: HashMap<TenantId, Subscription>,
    plans: HashMap<PlanTier, Plan>,
    logs: Vec<DeliveryLog>,
    sequences: HashMap<SequenceId, Sequence>,
    enrollments: HashMap<EnrollmentId, Enrollment>,
    broadcasts: HashMap<BroadcastId, Broadcast>,
}

#[derive(Default)]
pub struct InMemoryRecords {
    tables: Mutex<Tables>,
    automation_disabled: AtomicBool,
}

impl InMemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_automation_disabled(&self, disabled: bool) {
        self.automation_disabled.store(disabled, Ordering::SeqCst);
    }

    pub async fn put_subscription(&self, subscription: Subscription) {
        self.tables
            .lock()
            .await
            .subscriptions
            .insert(subscription.tenant_id, subscription);
    }

    pub async fn put_plan(&self, plan: Plan) {
        self.tables.lock().await.plans.insert(plan.tier, plan);
    }

    pub async fn put_sequence(&self, sequence: Sequence) {
        self.tables.lock().await.sequences.insert(sequence.id, sequence);
    }

    pub async fn put_broadcast(&self, broadcast: Broadcast) {
        self.tables.lock().await.broadcasts.insert(broadcast.id, broadcast);
    }

    pub async fn delivery_logs(&self) -> Vec<DeliveryLog> {
        self.tables.lock().await.logs.clone()
    }
}

#[async_trait]
impl CredentialStore for InMemoryRecords {
    async fn get(&self, id: CredentialId) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.tables.lock().await.credentials.get(&id).cloned())
    }

    async fn save(&self, record: CredentialRecord) -> Result<(), StoreError> {
        self.tables.lock().await.credentials.insert(record.id, record);
        Ok(())
    }

    async fn mark_status(&self, id: CredentialId, status: TokenStatus) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let record = tables
            .credentials
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("credential", id))?;
        record.token_status = status;
        Ok(())
    }
}

#[async_trait]
impl PlanStore for InMemoryRecords {
    async fn active_subscription(
        &self,
        tenant: TenantId,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(self.tables.lock().await.subscriptions.get(&tenant).cloned())
    }

    async fn plan(&self, tier: PlanTier) -> Result<Option<Plan>, StoreError> {
        Ok(self.tables.lock().await.plans.get(&tier).cloned())
    }
}

#[async_trait]
impl DeliveryLogStore for InMemoryRecords {
    async fn append(&self, entry: DeliveryLog) -> Result<(), StoreError> {
        self.tables.lock().await.logs.push(entry);
        Ok(())
    }

    async fn count_successful_since(
        &self,
        tenant: TenantId,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let tables = self.tables.lock().await;
        let count = tables
            .logs
            .iter()
            .filter(|l| {
                l.tenant_id == tenant && l.status == DeliveryStatus::Success && l.created_at >= since
            })
            .count();
        Ok(count as u64)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let before = tables.logs.len();
        tables.logs.retain(|l| l.created_at >= cutoff);
        Ok((before - tables.logs.len()) as u64)
    }
}

#[async_trait]
impl SequenceStore for InMemoryRecords {
    async fn enrollment(&self, id: EnrollmentId) -> Result<Option<Enrollment>, StoreError> {
        Ok(self.tables.lock().await.enrollments.get(&id).cloned())
    }

    async fn save_enrollment(&self, enrollment: Enrollment) -> Result<(), StoreError> {
        self.tables
            .lock()
            .await
            .enrollments
            .insert(enrollment.id, enrollment);
        Ok(())
    }

    async fn sequence(&self, id: SequenceId) -> Result<Option<Sequence>, StoreError> {
        Ok(self.tables.lock().await.sequences.get(&id).cloned())
    }

    async fn increment_completed(&self, id: SequenceId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let sequence = tables
            .sequences
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("sequence", id))?;
        sequence.stats.completed += 1;
        Ok(())
    }
}

#[async_trait]
impl BroadcastStore for InMemoryRecords {
    async fn broadcast(&self, id: BroadcastId) -> Result<Option<Broadcast>, StoreError> {
        Ok(self.tables.lock().await.broadcasts.get(&id).cloned())
    }

    async fn save_broadcast(&self, broadcast: Broadcast) -> Result<(), StoreError> {
        self.tables
            .lock()
            .await
            .broadcasts
            .insert(broadcast.id, broadcast);
        Ok(())
    }
}

#[async_trait]
impl PlatformSettings for InMemoryRecords {
    async fn automation_disabled(&self) -> Result<bool, StoreError> {
        Ok(self.automation_disabled.load(Ordering::SeqCst))
    }
}

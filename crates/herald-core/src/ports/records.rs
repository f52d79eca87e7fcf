//! Record ports: the entities handlers read and write besides tasks.
//!
//! All of them are owned by other parts of the platform; this crate only
//! needs the narrow operations below.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Broadcast, BroadcastId, CredentialId, CredentialRecord, DeliveryLog, Enrollment,
    EnrollmentId, Plan, PlanTier, Sequence, SequenceId, Subscription, TenantId, TokenStatus,
};
use crate::error::StoreError;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, id: CredentialId) -> Result<Option<CredentialRecord>, StoreError>;

    /// Insert or replace.
    async fn save(&self, record: CredentialRecord) -> Result<(), StoreError>;

    async fn mark_status(&self, id: CredentialId, status: TokenStatus) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn active_subscription(
        &self,
        tenant: TenantId,
    ) -> Result<Option<Subscription>, StoreError>;

    /// Plan definition for a tier. `None` means use the built-in one.
    async fn plan(&self, tier: PlanTier) -> Result<Option<Plan>, StoreError>;
}

#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    async fn append(&self, entry: DeliveryLog) -> Result<(), StoreError>;

    /// Successful deliveries for `tenant` created at or after `since`.
    async fn count_successful_since(
        &self,
        tenant: TenantId,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Returns how many entries were removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait SequenceStore: Send + Sync {
    async fn enrollment(&self, id: EnrollmentId) -> Result<Option<Enrollment>, StoreError>;

    async fn save_enrollment(&self, enrollment: Enrollment) -> Result<(), StoreError>;

    async fn sequence(&self, id: SequenceId) -> Result<Option<Sequence>, StoreError>;

    async fn increment_completed(&self, id: SequenceId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait BroadcastStore: Send + Sync {
    async fn broadcast(&self, id: BroadcastId) -> Result<Option<Broadcast>, StoreError>;

    async fn save_broadcast(&self, broadcast: Broadcast) -> Result<(), StoreError>;
}

/// Platform-wide administrative switches.
#[async_trait]
pub trait PlatformSettings: Send + Sync {
    /// Kill switch for all external messaging.
    async fn automation_disabled(&self) -> Result<bool, StoreError>;
}

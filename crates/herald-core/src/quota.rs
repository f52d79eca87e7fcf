//! Quota Gate: may this tenant send another external message this month?
//!
//! 使用量は当月（UTC）の成功した配信ログ件数。有効なサブスクリプションが
//! 無ければ free プランとして扱う。

use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::domain::{JobError, Plan, PlanTier, TenantId};
use crate::error::StoreError;
use crate::ports::{DeliveryLogStore, PlanStore};

/// Usage vs. ceiling at the time of the check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub tier: PlanTier,
    pub used: u64,
    pub limit: Option<u64>,
}

impl QuotaSnapshot {
    pub fn allowed(&self) -> bool {
        self.limit.is_none_or(|limit| self.used < limit)
    }

    /// Deliveries left this month. `None` is unlimited.
    pub fn remaining(&self) -> Option<u64> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }
}

/// Midnight UTC on the first day of `now`'s month.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

pub struct QuotaGate {
    plans: Arc<dyn PlanStore>,
    logs: Arc<dyn DeliveryLogStore>,
}

impl QuotaGate {
    pub fn new(plans: Arc<dyn PlanStore>, logs: Arc<dyn DeliveryLogStore>) -> Self {
        Self { plans, logs }
    }

    async fn active_plan(&self, tenant: TenantId) -> Result<Plan, StoreError> {
        let tier = match self.plans.active_subscription(tenant).await? {
            Some(sub) if sub.is_active() => sub.tier(),
            _ => PlanTier::Free,
        };
        Ok(self
            .plans
            .plan(tier)
            .await?
            .unwrap_or_else(|| tier.builtin()))
    }

    pub async fn snapshot(
        &self,
        tenant: TenantId,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot, StoreError> {
        let plan = self.active_plan(tenant).await?;
        let used = self
            .logs
            .count_successful_since(tenant, month_start(now))
            .await?;
        Ok(QuotaSnapshot {
            tier: plan.tier,
            used,
            limit: plan.deliveries_per_month,
        })
    }

    /// `Err(Quota)` when the ceiling is reached; store failures are transient.
    /// On success the snapshot tells batch senders how much is left.
    pub async fn check(
        &self,
        tenant: TenantId,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot, JobError> {
        let snapshot = self.snapshot(tenant, now).await?;
        if snapshot.allowed() {
            return Ok(snapshot);
        }
        tracing::info!(
            tenant_id = %tenant,
            tier = %snapshot.tier,
            used = snapshot.used,
            "monthly delivery limit reached"
        );
        Err(JobError::quota(format!(
            "monthly delivery limit reached ({}/{} on {} plan)",
            snapshot.used,
            snapshot.limit.unwrap_or_default(),
            snapshot.tier
        )))
    }
}

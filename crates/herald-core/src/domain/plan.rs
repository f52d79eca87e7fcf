//! Plans and subscriptions: the read-only inputs of the quota gate.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::TenantId;

/// Canonical plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Creator,
    CreatorPro,
}

impl PlanTier {
    /// Resolves a stored tier name, including historical aliases.
    /// Unknown names fall back to `Free`.
    pub fn resolve(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "creator" | "starter" => PlanTier::Creator,
            "creator_pro" | "pro" | "business" => PlanTier::CreatorPro,
            _ => PlanTier::Free,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Creator => "creator",
            PlanTier::CreatorPro => "creator_pro",
        }
    }

    /// Built-in plan for the tier.
    pub fn builtin(self) -> Plan {
        let (name, ceiling) = match self {
            PlanTier::Free => ("Free", 0),
            PlanTier::Creator => ("Creator", 500),
            PlanTier::CreatorPro => ("Creator Pro", 5_000),
        };
        Plan {
            tier: self,
            name: name.to_string(),
            deliveries_per_month: Some(ceiling),
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub tier: PlanTier,
    pub name: String,
    /// Successful external deliveries allowed per calendar month. `None` = unlimited.
    pub deliveries_per_month: Option<u64>,
}

impl Plan {
    pub fn allows(&self, used: u64) -> bool {
        self.deliveries_per_month.is_none_or(|ceiling| used < ceiling)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub tenant_id: TenantId,
    /// Tier name as stored; may be an alias.
    pub plan: String,
    pub status: SubscriptionStatus,
}

impl Subscription {
    pub fn tier(&self) -> PlanTier {
        PlanTier::resolve(&self.plan)
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }
}

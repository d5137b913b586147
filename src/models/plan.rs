//! Subscription plan model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Plan id of the seeded trial plan every first-time subscriber lands on.
pub const TRIAL_PLAN_ID: Uuid = Uuid::from_u128(1);

/// Number of days a trial subscription runs.
pub const TRIAL_DURATION_DAYS: i64 = 30;

/// Billing duration of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanDuration {
    Monthly,
    Quarterly,
    Yearly,
}

impl PlanDuration {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanDuration::Monthly => "monthly",
            PlanDuration::Quarterly => "quarterly",
            PlanDuration::Yearly => "yearly",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "quarterly" => PlanDuration::Quarterly,
            "yearly" => PlanDuration::Yearly,
            _ => PlanDuration::Monthly,
        }
    }

    /// Fixed day count per duration: monthly=30, quarterly=90, yearly=365.
    pub fn days(&self) -> i64 {
        match self {
            PlanDuration::Monthly => 30,
            PlanDuration::Quarterly => 90,
            PlanDuration::Yearly => 365,
        }
    }
}

/// Subscription plan. Immutable once referenced by a live subscription;
/// there is deliberately no update operation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionPlan {
    pub plan_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub duration: String,
    /// Entitled product ids, canonical `UUID[]` encoding. Validation is
    /// order-independent.
    pub product_ids: Vec<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl SubscriptionPlan {
    pub fn duration_kind(&self) -> PlanDuration {
        PlanDuration::from_string(&self.duration)
    }
}

/// Input for creating a plan.
#[derive(Debug, Clone)]
pub struct CreatePlan {
    pub name: String,
    pub price: Decimal,
    pub duration: PlanDuration,
    pub product_ids: Vec<Uuid>,
}

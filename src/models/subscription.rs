//! Subscription model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription status.
///
/// `Active` rows whose `end_utc` has passed are treated as `Expired` at read
/// time; writers demote them before inserting a replacement so the partial
/// uniqueness index only ever covers the live generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Expired,
    Superseded,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Superseded => "superseded",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "expired" => SubscriptionStatus::Expired,
            "superseded" => SubscriptionStatus::Superseded,
            _ => SubscriptionStatus::Pending,
        }
    }
}

/// Subscription.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl Subscription {
    pub fn status_kind(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_string(&self.status)
    }

    /// Status with wall-clock expiry applied.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        match self.status_kind() {
            SubscriptionStatus::Active if self.end_utc <= now => SubscriptionStatus::Expired,
            other => other,
        }
    }

    /// Whether the subscription currently grants access.
    pub fn is_currently_active(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == SubscriptionStatus::Active
    }
}

/// Input for creating a paid (pending) subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub plan_id: Uuid,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
}

//! Product selection model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Product selection row. Soft-deleted (`is_active = false`) rather than
/// removed; a subscription has at most one active generation at a time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProductSelection {
    pub selection_id: Uuid,
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

//! Payment evidence model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Gateway status string that authorizes activation.
pub const CAPTURED_STATUS: &str = "captured";

/// Payment record. Append-only evidence of a gateway confirmation; rows are
/// never mutated after insertion. Duplicate confirmations dedupe on
/// `gateway_payment_id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: String,
    pub gateway_signature: Option<String>,
    pub amount: Decimal,
    /// Gateway-reported status, stored as-is.
    pub status: String,
    pub paid_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

/// Input for recording a payment confirmation.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    pub subscription_id: Uuid,
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub gateway_signature: String,
    pub amount: Decimal,
}

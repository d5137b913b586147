//! Payment gateway contract consumed by the lifecycle engine.
//!
//! The engine never talks HTTP directly; it depends on these three
//! capabilities. The fetched payment status is the sole source of truth for
//! activation, and a signature rejection is terminal, never retried.

use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Order created at the gateway ahead of checkout.
#[derive(Debug, Clone)]
pub struct GatewayOrder {
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Payment state as reported by the gateway.
#[derive(Debug, Clone)]
pub struct GatewayPayment {
    pub payment_id: String,
    pub status: String,
    pub captured_utc: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create an order for `amount` in major currency units.
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, AppError>;

    /// Verify the checkout signature for an (order, payment) pair.
    fn verify_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<bool, AppError>;

    /// Fetch the authoritative status of a payment.
    async fn fetch_payment_status(&self, payment_id: &str) -> Result<GatewayPayment, AppError>;
}

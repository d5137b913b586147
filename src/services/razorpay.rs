//! Razorpay payment gateway adapter.
//!
//! Implements the `PaymentGateway` contract on top of Razorpay's Orders and
//! Payments APIs, with HMAC-SHA256 signature verification for checkout
//! confirmations. Amounts cross this boundary in major currency units and
//! are converted to the smallest unit (paise for INR) on the wire.

use crate::config::RazorpayConfig;
use crate::error::AppError;
use crate::services::gateway::{GatewayOrder, GatewayPayment, PaymentGateway};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

/// Razorpay client for interacting with the Razorpay API.
#[derive(Clone)]
pub struct RazorpayClient {
    client: Client,
    config: RazorpayConfig,
}

/// Request to create a Razorpay order.
#[derive(Debug, Serialize)]
struct CreateOrderRequest {
    /// Amount in smallest currency unit (paise for INR).
    amount: u64,
    /// Currency code (e.g., "INR").
    currency: String,
    /// Receipt ID for tracking.
    receipt: String,
    /// Auto-capture the payment on authorization.
    payment_capture: u8,
}

/// Response from Razorpay order creation.
#[derive(Debug, Deserialize)]
struct RazorpayOrder {
    id: String,
    amount: u64,
    currency: String,
}

/// Razorpay payment entity.
#[derive(Debug, Deserialize)]
struct RazorpayPayment {
    id: String,
    status: String,
    created_at: i64,
    captured: Option<bool>,
}

/// Razorpay API error response.
#[derive(Debug, Deserialize)]
struct RazorpayError {
    error: RazorpayErrorDetail,
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorDetail {
    code: String,
    description: String,
}

impl RazorpayClient {
    /// Create a new Razorpay client.
    pub fn new(config: RazorpayConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }

    /// Check if Razorpay is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.key_id.is_empty() && !self.config.key_secret.expose_secret().is_empty()
    }

    fn to_minor_units(amount: Decimal) -> Result<u64, AppError> {
        (amount * Decimal::from(100))
            .round()
            .to_u64()
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("Order amount {} is not payable", amount))
            })
    }

    /// Compute HMAC-SHA256 signature.
    fn compute_signature(&self, payload: &str, secret: &str) -> Result<String, AppError> {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::ConfigError(anyhow::anyhow!("Invalid key length")))?;
        mac.update(payload.as_bytes());
        let result = mac.finalize();
        Ok(hex::encode(result.into_bytes()))
    }

    fn map_api_failure(status: reqwest::StatusCode, body: String, context: &str) -> AppError {
        let detail: RazorpayError = serde_json::from_str(&body).unwrap_or_else(|_| RazorpayError {
            error: RazorpayErrorDetail {
                code: "UNKNOWN".to_string(),
                description: body.clone(),
            },
        });
        tracing::error!(
            code = %detail.error.code,
            description = %detail.error.description,
            "Razorpay {} failed",
            context
        );

        // 5xx and throttling are transient; everything else is a definitive
        // rejection of the request.
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            AppError::GatewayError(anyhow::anyhow!(
                "Razorpay {}: {} - {}",
                context,
                detail.error.code,
                detail.error.description
            ))
        } else {
            AppError::BadRequest(anyhow::anyhow!(
                "Razorpay {}: {} - {}",
                context,
                detail.error.code,
                detail.error.description
            ))
        }
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, AppError> {
        if !self.is_configured() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Razorpay credentials not configured"
            )));
        }

        let request = CreateOrderRequest {
            amount: Self::to_minor_units(amount)?,
            currency: currency.to_string(),
            receipt: receipt.to_string(),
            payment_capture: 1,
        };

        let url = format!("{}/orders", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::GatewayError(anyhow::anyhow!("Order creation failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::GatewayError(anyhow::anyhow!("Order response read: {}", e)))?;

        tracing::debug!(status = %status, body = %body, "Razorpay create_order response");

        if status.is_success() {
            let order: RazorpayOrder = serde_json::from_str(&body).map_err(|e| {
                AppError::GatewayError(anyhow::anyhow!("Malformed order response: {}", e))
            })?;
            tracing::info!(
                order_id = %order.id,
                amount = order.amount,
                currency = %order.currency,
                "Razorpay order created"
            );
            Ok(GatewayOrder {
                order_id: order.id,
                amount,
                currency: order.currency,
            })
        } else {
            Err(Self::map_api_failure(status, body, "order creation"))
        }
    }

    /// Verify payment signature from Razorpay checkout.
    ///
    /// The signature is computed as:
    /// `HMAC-SHA256(order_id + "|" + payment_id, key_secret)`
    fn verify_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<bool, AppError> {
        let payload = format!("{}|{}", order_id, payment_id);
        let expected = self.compute_signature(&payload, self.config.key_secret.expose_secret())?;

        let is_valid = expected == signature;

        if is_valid {
            tracing::info!(
                order_id = %order_id,
                payment_id = %payment_id,
                "Payment signature verified successfully"
            );
        } else {
            tracing::warn!(
                order_id = %order_id,
                payment_id = %payment_id,
                "Payment signature verification failed"
            );
        }

        Ok(is_valid)
    }

    async fn fetch_payment_status(&self, payment_id: &str) -> Result<GatewayPayment, AppError> {
        if !self.is_configured() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Razorpay credentials not configured"
            )));
        }

        let url = format!("{}/payments/{}", self.config.api_base_url, payment_id);

        let response = self
            .client
            .get(&url)
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .send()
            .await
            .map_err(|e| AppError::GatewayError(anyhow::anyhow!("Payment fetch failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::GatewayError(anyhow::anyhow!("Payment response read: {}", e)))?;

        if status.is_success() {
            let payment: RazorpayPayment = serde_json::from_str(&body).map_err(|e| {
                AppError::GatewayError(anyhow::anyhow!("Malformed payment response: {}", e))
            })?;

            let captured_utc: Option<DateTime<Utc>> = payment
                .captured
                .unwrap_or(false)
                .then(|| DateTime::from_timestamp(payment.created_at, 0))
                .flatten();

            Ok(GatewayPayment {
                payment_id: payment.id,
                status: payment.status,
                captured_utc,
            })
        } else {
            Err(Self::map_api_failure(status, body, "payment fetch"))
        }
    }
}

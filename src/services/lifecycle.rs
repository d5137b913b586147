//! Subscription lifecycle engine.
//!
//! Orchestrates the state machine: first-time subscribers claim the one-shot
//! trial and activate immediately, everyone else gets a pending subscription
//! that only a captured gateway payment promotes to active. Plan changes
//! supersede the current subscription and carry a prorated price difference.

use crate::error::AppError;
use crate::models::{
    CreateSubscription, Payment, Product, RecordPayment, Subscription, SubscriptionPlan,
    SubscriptionStatus, CAPTURED_STATUS,
};
use crate::services::database::Database;
use crate::services::gateway::PaymentGateway;
use crate::services::metrics::{
    record_error, record_payment_amount, record_payment_operation, record_subscription_operation,
    record_trial_claim,
};
use crate::services::proration;
use crate::services::retry::{retry_gateway_call, RetryConfig};
use crate::services::selection::total_price;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Order handed to the checkout frontend.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOrder {
    pub order_id: String,
    pub subscription_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
}

/// Result of applying a payment confirmation.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOutcome {
    pub payment: Payment,
    pub subscription: Subscription,
    /// False on replays and on confirmations the gateway did not capture.
    pub activated: bool,
}

/// Result of a plan change.
#[derive(Debug, Clone, Serialize)]
pub struct PlanChange {
    pub subscription: Subscription,
    /// Prorated delta for the remaining days. Positive means the subscriber
    /// owes more, negative is a credit.
    pub price_difference: Decimal,
    pub remaining_days: i64,
}

/// Subscription with its plan, selected products and effective charge.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionDetails {
    pub subscription: Subscription,
    pub plan: SubscriptionPlan,
    pub products: Vec<Product>,
    pub total_price: Decimal,
    pub product_count: usize,
}

/// Drives subscription state transitions.
#[derive(Clone)]
pub struct SubscriptionLifecycleManager {
    db: Arc<Database>,
    gateway: Arc<dyn PaymentGateway>,
    retry: RetryConfig,
    currency: String,
}

impl SubscriptionLifecycleManager {
    pub fn new(db: Arc<Database>, gateway: Arc<dyn PaymentGateway>, currency: String) -> Self {
        Self {
            db,
            gateway,
            retry: RetryConfig::default(),
            currency,
        }
    }

    /// Create a subscription for a user on the given plan.
    ///
    /// A user who has never claimed the trial is enrolled on the trial plan
    /// regardless of the plan requested, active immediately. Otherwise a
    /// pending subscription on the requested plan is created, awaiting
    /// payment, using the caller-supplied window when one is given and a
    /// full plan period from `now` otherwise. Rejected with `Conflict`
    /// while an active, unexpired subscription exists.
    #[instrument(skip(self, window), fields(user_id = %user_id, plan_id = %plan_id))]
    pub async fn create_subscription(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        now: DateTime<Utc>,
    ) -> Result<Subscription, AppError> {
        let user = self
            .db
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;

        let plan = self
            .db
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;

        if self
            .db
            .find_active_subscription(user_id, now)
            .await?
            .is_some()
        {
            record_error("conflict", "create_subscription");
            return Err(AppError::Conflict(anyhow::anyhow!(
                "User already has an active subscription"
            )));
        }

        if !user.trial_claimed {
            let subscription = match self.db.create_trial_subscription(user_id, now).await {
                Ok(subscription) => subscription,
                Err(err) => {
                    record_trial_claim("rejected");
                    return Err(err);
                }
            };
            record_trial_claim("granted");
            record_subscription_operation("trial_created");
            info!(subscription_id = %subscription.subscription_id, "Trial granted");
            return Ok(subscription);
        }

        let (start_utc, end_utc) = match window {
            Some((start, end)) => {
                if end <= start {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "Subscription window must end after it starts"
                    )));
                }
                (start, end)
            }
            None => {
                let period = Duration::days(plan.duration_kind().days());
                (now, now + period)
            }
        };
        let input = CreateSubscription {
            plan_id: plan.plan_id,
            start_utc,
            end_utc,
        };

        let subscription = self
            .db
            .create_pending_subscription(user_id, &input, now)
            .await?;
        record_subscription_operation("pending_created");

        Ok(subscription)
    }

    /// Create a gateway order for a pending subscription.
    ///
    /// The amount charged is the plan price scaled by the active selection
    /// count. Transient gateway failures are retried with backoff.
    #[instrument(skip(self), fields(user_id = %user_id, subscription_id = %subscription_id))]
    pub async fn create_payment_order(
        &self,
        user_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<PaymentOrder, AppError> {
        let subscription = self.owned_subscription(user_id, subscription_id).await?;

        if subscription.status_kind() != SubscriptionStatus::Pending {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Subscription is not awaiting payment"
            )));
        }

        let plan = self
            .db
            .get_plan(subscription.plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;

        let selections = self.db.list_active_selections(subscription_id).await?;
        let amount = total_price(plan.price, selections.len());

        let receipt = subscription.subscription_id.to_string();
        let order = retry_gateway_call(&self.retry, "create_order", || {
            self.gateway.create_order(amount, &self.currency, &receipt)
        })
        .await
        .map_err(|e| {
            record_error("gateway", "create_payment_order");
            e
        })?;

        record_payment_operation("order_created");
        info!(
            order_id = %order.order_id,
            amount = %amount,
            "Payment order created"
        );

        Ok(PaymentOrder {
            order_id: order.order_id,
            subscription_id,
            amount,
            currency: order.currency,
        })
    }

    /// Record a payment confirmation from checkout.
    ///
    /// The signature is verified first; a mismatch is terminal and nothing is
    /// stored. The gateway is then consulted for the authoritative payment
    /// status, and only a captured payment activates the pending
    /// subscription. Replayed confirmations return the original outcome with
    /// `activated = false`.
    #[instrument(
        skip(self, input),
        fields(user_id = %user_id, subscription_id = %input.subscription_id)
    )]
    pub async fn record_payment(
        &self,
        user_id: Uuid,
        input: &RecordPayment,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome, AppError> {
        let valid = self.gateway.verify_signature(
            &input.gateway_order_id,
            &input.gateway_payment_id,
            &input.gateway_signature,
        )?;

        if !valid {
            record_error("invalid_signature", "record_payment");
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invalid payment signature"
            )));
        }

        let status = retry_gateway_call(&self.retry, "fetch_payment_status", || {
            self.gateway.fetch_payment_status(&input.gateway_payment_id)
        })
        .await
        .map_err(|e| {
            record_error("gateway", "record_payment");
            e
        })?;

        let subscription = self
            .db
            .get_subscription(input.subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

        let plan = self
            .db
            .get_plan(subscription.plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;

        let application = self
            .db
            .record_payment(
                user_id,
                input,
                &status.status,
                status.captured_utc,
                plan.duration_kind().days(),
                now,
            )
            .await?;

        record_payment_operation(&status.status);
        if status.status == CAPTURED_STATUS {
            record_payment_amount(&self.currency, input.amount.to_f64().unwrap_or(0.0));
        }
        if application.activated {
            record_subscription_operation("activated");
            info!(
                subscription_id = %application.subscription.subscription_id,
                "Subscription activated"
            );
        } else if status.status != CAPTURED_STATUS {
            warn!(
                gateway_payment_id = %input.gateway_payment_id,
                status = %status.status,
                "Payment not captured, subscription left pending"
            );
        }

        Ok(PaymentOutcome {
            payment: application.payment,
            subscription: application.subscription,
            activated: application.activated,
        })
    }

    /// Change the plan of an active subscription.
    ///
    /// The current subscription is superseded and replaced by a new pending
    /// one on the new plan, atomically. The replacement inherits the unused
    /// time: it is anchored at `now` and ends after the old subscription's
    /// remaining days, not a fresh full period. The prorated price
    /// difference is computed over those remaining days at a fixed daily
    /// rate of price / 30 for every plan duration; a positive difference
    /// awaits payment before the replacement activates. A subscription that
    /// has lapsed on the wall clock can still change plans: its remaining
    /// days clamp to zero, so the change costs nothing.
    #[instrument(skip(self), fields(user_id = %user_id, subscription_id = %subscription_id, new_plan_id = %new_plan_id))]
    pub async fn change_plan(
        &self,
        user_id: Uuid,
        subscription_id: Uuid,
        new_plan_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<PlanChange, AppError> {
        let subscription = self
            .db
            .get_subscription(subscription_id)
            .await?
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

        if subscription.status_kind() != SubscriptionStatus::Active {
            record_error("conflict", "change_plan");
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Only an active subscription can change plans"
            )));
        }

        if subscription.plan_id == new_plan_id {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Subscription is already on this plan"
            )));
        }

        let current_plan = self
            .db
            .get_plan(subscription.plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;

        let new_plan = self
            .db
            .get_plan(new_plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;

        let remaining = proration::remaining_days(now, subscription.end_utc);
        let difference = proration::price_difference(current_plan.price, new_plan.price, remaining);

        let new_end = now + Duration::days(remaining);
        let replacement = self
            .db
            .supersede_and_replace(user_id, subscription_id, new_plan.plan_id, new_end, now)
            .await?;

        record_subscription_operation("plan_changed");
        info!(
            new_subscription_id = %replacement.subscription_id,
            price_difference = %difference,
            remaining_days = remaining,
            "Plan change applied"
        );

        Ok(PlanChange {
            subscription: replacement,
            price_difference: difference,
            remaining_days: remaining,
        })
    }

    /// The user's current active subscription with plan, selected products
    /// and effective charge.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn active_subscription(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionDetails, AppError> {
        let subscription = self
            .db
            .find_active_subscription(user_id, now)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("No active subscription")))?;

        self.details(subscription).await
    }

    /// All of the user's subscriptions, newest first, with the wall-clock
    /// expiry applied to reported statuses.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn subscription_history(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, AppError> {
        let mut subscriptions = self.db.list_subscriptions_for_user(user_id).await?;
        for subscription in &mut subscriptions {
            subscription.status = subscription.effective_status(now).as_str().to_string();
        }
        Ok(subscriptions)
    }

    async fn owned_subscription(
        &self,
        user_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Subscription, AppError> {
        let subscription = self
            .db
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

        if subscription.user_id != user_id {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Subscription does not belong to this user"
            )));
        }

        Ok(subscription)
    }

    async fn details(&self, subscription: Subscription) -> Result<SubscriptionDetails, AppError> {
        let plan = self
            .db
            .get_plan(subscription.plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;

        let selections = self
            .db
            .list_active_selections(subscription.subscription_id)
            .await?;
        let product_ids: Vec<Uuid> = selections.iter().map(|s| s.product_id).collect();
        let products = self.db.get_products_by_ids(&product_ids).await?;

        let product_count = selections.len();
        let total = total_price(plan.price, product_count);

        Ok(SubscriptionDetails {
            subscription,
            plan,
            products,
            total_price: total,
            product_count,
        })
    }
}

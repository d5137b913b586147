//! Product selection management.
//!
//! Selections are replaced as a generation: every change retires the current
//! active rows and inserts the new set, so history is preserved through soft
//! deletes and the active generation always reflects one validated request.

use crate::error::AppError;
use crate::models::{PlanDuration, ProductSelection, Subscription};
use crate::services::database::Database;
use crate::services::entitlement;
use crate::services::metrics::{record_error, record_selection_operation};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Total charge for a plan with the given number of selected products.
///
/// No selections means the plan's base price; otherwise the price scales
/// linearly with the product count. There is intentionally no per-product
/// pricing.
pub fn total_price(plan_price: Decimal, product_count: usize) -> Decimal {
    if product_count == 0 {
        plan_price
    } else {
        plan_price * Decimal::from(product_count as u64)
    }
}

/// Result of replacing a selection generation.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionReplacement {
    pub selections: Vec<ProductSelection>,
    pub total_price: Decimal,
    pub duration: PlanDuration,
    pub product_count: usize,
}

/// Manages product selections against active subscriptions.
#[derive(Clone)]
pub struct ProductSelectionManager {
    db: Arc<Database>,
}

impl ProductSelectionManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
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

    /// Replace the active selection generation for a subscription.
    ///
    /// Requires an effectively active subscription owned by the caller.
    /// Validation runs before any write; a rejected request leaves the
    /// current generation untouched.
    #[instrument(skip(self, product_ids), fields(user_id = %user_id, subscription_id = %subscription_id))]
    pub async fn replace_selection(
        &self,
        user_id: Uuid,
        subscription_id: Uuid,
        product_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<SelectionReplacement, AppError> {
        let subscription = self.owned_subscription(user_id, subscription_id).await?;

        if !subscription.is_currently_active(now) {
            record_error("forbidden", "replace_selection");
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Product selection requires an active subscription"
            )));
        }

        let plan = self
            .db
            .get_plan(subscription.plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;

        let validated = entitlement::validate_selection(&plan, product_ids).inspect_err(|_| {
            record_error("bad_request", "replace_selection");
        })?;

        let selections = self
            .db
            .replace_selection(subscription_id, user_id, &validated)
            .await?;

        let product_count = selections.len();
        let total = total_price(plan.price, product_count);

        record_selection_operation("replace");
        info!(
            subscription_id = %subscription_id,
            product_count = product_count,
            total_price = %total,
            "Product selection replaced"
        );

        Ok(SelectionReplacement {
            selections,
            total_price: total,
            duration: plan.duration_kind(),
            product_count,
        })
    }

    /// List the active selection generation for a subscription the caller
    /// owns.
    #[instrument(skip(self), fields(user_id = %user_id, subscription_id = %subscription_id))]
    pub async fn list_selections(
        &self,
        user_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Vec<ProductSelection>, AppError> {
        self.owned_subscription(user_id, subscription_id).await?;
        self.db.list_active_selections(subscription_id).await
    }

    /// Soft-delete a single selection.
    #[instrument(skip(self), fields(user_id = %user_id, selection_id = %selection_id))]
    pub async fn deactivate_selection(
        &self,
        user_id: Uuid,
        selection_id: Uuid,
    ) -> Result<ProductSelection, AppError> {
        let selection = self.db.deactivate_selection(user_id, selection_id).await?;
        record_selection_operation("deactivate");
        Ok(selection)
    }
}

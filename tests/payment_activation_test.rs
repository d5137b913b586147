//! Payment confirmation and activation tests.
//! The stub gateway stands in for Razorpay; the lifecycle engine treats its
//! reported status as the source of truth.

mod common;

use chrono::{Duration, Utc};
use common::TestApp;
use rust_decimal::Decimal;
use std::str::FromStr;
use subscription_service::error::AppError;
use subscription_service::models::{PlanDuration, RecordPayment, SubscriptionStatus};
use uuid::Uuid;

fn confirmation(subscription_id: Uuid, gateway_payment_id: &str, amount: &str) -> RecordPayment {
    RecordPayment {
        subscription_id,
        gateway_order_id: format!("order_{}", Uuid::new_v4().simple()),
        gateway_payment_id: gateway_payment_id.to_string(),
        gateway_signature: "stub_signature".to_string(),
        amount: Decimal::from_str(amount).unwrap(),
    }
}

#[tokio::test]
async fn captured_payment_activates_pending_subscription() {
    let app = TestApp::spawn().await;
    let user = app
        .create_user_with_trial_claimed("captured@example.com")
        .await;
    let plan = app
        .create_plan("Standard", "499.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    let pending = app
        .lifecycle
        .create_subscription(user.user_id, plan, None, now)
        .await
        .expect("Failed to create pending subscription");

    let outcome = app
        .lifecycle
        .record_payment(
            user.user_id,
            &confirmation(pending.subscription_id, "pay_captured_1", "499.00"),
            now,
        )
        .await
        .expect("Failed to record payment");

    assert!(outcome.activated);
    assert_eq!(
        outcome.subscription.status_kind(),
        SubscriptionStatus::Active
    );
    assert_eq!(outcome.payment.status, "captured");

    app.cleanup().await;
}

#[tokio::test]
async fn duplicate_confirmation_is_idempotent() {
    let app = TestApp::spawn().await;
    let user = app
        .create_user_with_trial_claimed("duplicate@example.com")
        .await;
    let plan = app
        .create_plan("Standard", "499.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    let pending = app
        .lifecycle
        .create_subscription(user.user_id, plan, None, now)
        .await
        .expect("Failed to create pending subscription");

    let input = confirmation(pending.subscription_id, "pay_dup_1", "499.00");

    let first = app
        .lifecycle
        .record_payment(user.user_id, &input, now)
        .await
        .expect("Failed to record payment");
    assert!(first.activated);

    // Replay of the same gateway payment id changes nothing.
    let second = app
        .lifecycle
        .record_payment(user.user_id, &input, now)
        .await
        .expect("Replay must not fail");
    assert!(!second.activated);
    assert_eq!(second.payment.payment_id, first.payment.payment_id);

    let payments = app
        .db
        .list_payments_for_subscription(pending.subscription_id)
        .await
        .expect("Failed to list payments");
    assert_eq!(payments.len(), 1);

    app.cleanup().await;
}

#[tokio::test]
async fn replayed_confirmation_is_bound_to_its_owner_and_subscription() {
    let app = TestApp::spawn().await;
    let owner = app
        .create_user_with_trial_claimed("replay-owner@example.com")
        .await;
    let intruder = app
        .create_user_with_trial_claimed("replay-intruder@example.com")
        .await;
    let plan = app
        .create_plan("Standard", "499.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    let pending = app
        .lifecycle
        .create_subscription(owner.user_id, plan, None, now)
        .await
        .expect("Failed to create pending subscription");

    let input = confirmation(pending.subscription_id, "pay_bound_1", "499.00");
    app.lifecycle
        .record_payment(owner.user_id, &input, now)
        .await
        .expect("Failed to record payment");

    // Another user replaying a known gateway payment id learns nothing.
    let err = app
        .lifecycle
        .record_payment(intruder.user_id, &input, now)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    // The owner replaying it against a different subscription is rejected
    // rather than silently handed the original outcome.
    let other = app
        .lifecycle
        .create_subscription(intruder.user_id, plan, None, now)
        .await
        .expect("Failed to create pending subscription");
    let mismatched = confirmation(other.subscription_id, "pay_bound_1", "499.00");
    let err = app
        .lifecycle
        .record_payment(owner.user_id, &mismatched, now)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    app.cleanup().await;
}

#[tokio::test]
async fn uncaptured_payment_leaves_subscription_pending() {
    let app = TestApp::spawn().await;
    let user = app
        .create_user_with_trial_claimed("failed-pay@example.com")
        .await;
    let plan = app
        .create_plan("Standard", "499.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    let pending = app
        .lifecycle
        .create_subscription(user.user_id, plan, None, now)
        .await
        .expect("Failed to create pending subscription");

    app.gateway.set_payment_status("failed");

    let outcome = app
        .lifecycle
        .record_payment(
            user.user_id,
            &confirmation(pending.subscription_id, "pay_failed_1", "499.00"),
            now,
        )
        .await
        .expect("Failed to record payment");

    assert!(!outcome.activated);
    assert_eq!(
        outcome.subscription.status_kind(),
        SubscriptionStatus::Pending
    );
    // The failed attempt is still stored as evidence.
    assert_eq!(outcome.payment.status, "failed");

    app.cleanup().await;
}

#[tokio::test]
async fn invalid_signature_is_rejected_and_nothing_is_stored() {
    let app = TestApp::spawn().await;
    let user = app
        .create_user_with_trial_claimed("bad-sig@example.com")
        .await;
    let plan = app
        .create_plan("Standard", "499.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    let pending = app
        .lifecycle
        .create_subscription(user.user_id, plan, None, now)
        .await
        .expect("Failed to create pending subscription");

    app.gateway.reject_signatures();

    let err = app
        .lifecycle
        .record_payment(
            user.user_id,
            &confirmation(pending.subscription_id, "pay_forged_1", "499.00"),
            now,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let payments = app
        .db
        .list_payments_for_subscription(pending.subscription_id)
        .await
        .expect("Failed to list payments");
    assert!(payments.is_empty());

    app.cleanup().await;
}

#[tokio::test]
async fn activation_reanchors_a_future_dated_window() {
    let app = TestApp::spawn().await;
    let user = app
        .create_user_with_trial_claimed("reanchor@example.com")
        .await;
    let plan = app
        .create_plan("Standard", "499.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    // Scheduled ahead of payment: the window starts in the future.
    let window = Some((now + Duration::days(5), now + Duration::days(35)));
    let pending = app
        .lifecycle
        .create_subscription(user.user_id, plan, window, now)
        .await
        .expect("Failed to create pending subscription");

    let outcome = app
        .lifecycle
        .record_payment(
            user.user_id,
            &confirmation(pending.subscription_id, "pay_reanchor_1", "499.00"),
            now,
        )
        .await
        .expect("Failed to record payment");

    assert!(outcome.activated);
    // The paid period starts at confirmation time, keeping its full length.
    // Postgres stores microseconds, so compare with a small tolerance.
    assert!((outcome.subscription.start_utc - now).num_milliseconds().abs() < 5);
    assert_eq!(
        (outcome.subscription.end_utc - outcome.subscription.start_utc).num_days(),
        30
    );

    app.cleanup().await;
}

#[tokio::test]
async fn payment_order_amount_is_the_plan_price_without_selections() {
    let app = TestApp::spawn().await;
    let user = app
        .create_user_with_trial_claimed("order-amount@example.com")
        .await;
    let plan = app
        .create_plan("Standard", "499.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    let pending = app
        .lifecycle
        .create_subscription(user.user_id, plan, None, now)
        .await
        .expect("Failed to create pending subscription");

    let order = app
        .lifecycle
        .create_payment_order(user.user_id, pending.subscription_id)
        .await
        .expect("Failed to create order");

    assert_eq!(order.amount, Decimal::from_str("499.00").unwrap());
    assert_eq!(order.currency, "INR");

    app.cleanup().await;
}

#[tokio::test]
async fn transient_gateway_failures_are_retried() {
    let app = TestApp::spawn().await;
    let user = app
        .create_user_with_trial_claimed("retry@example.com")
        .await;
    let plan = app
        .create_plan("Standard", "499.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    let pending = app
        .lifecycle
        .create_subscription(user.user_id, plan, None, now)
        .await
        .expect("Failed to create pending subscription");

    // Two transient failures, third attempt succeeds within the retry budget.
    app.gateway.fail_next_orders(2);

    let order = app
        .lifecycle
        .create_payment_order(user.user_id, pending.subscription_id)
        .await
        .expect("Order creation must survive transient failures");
    assert!(!order.order_id.is_empty());

    app.cleanup().await;
}

#[tokio::test]
async fn foreign_subscription_cannot_be_paid_for() {
    let app = TestApp::spawn().await;
    let owner = app
        .create_user_with_trial_claimed("owner@example.com")
        .await;
    let intruder = app
        .create_user_with_trial_claimed("intruder@example.com")
        .await;
    let plan = app
        .create_plan("Standard", "499.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    let pending = app
        .lifecycle
        .create_subscription(owner.user_id, plan, None, now)
        .await
        .expect("Failed to create pending subscription");

    let err = app
        .lifecycle
        .record_payment(
            intruder.user_id,
            &confirmation(pending.subscription_id, "pay_foreign_1", "499.00"),
            now,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    app.cleanup().await;
}

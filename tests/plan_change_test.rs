//! Plan change and proration integration tests.

mod common;

use chrono::{Duration, Utc};
use common::TestApp;
use rust_decimal::Decimal;
use std::str::FromStr;
use subscription_service::error::AppError;
use subscription_service::models::{PlanDuration, SubscriptionStatus};
use uuid::Uuid;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

#[tokio::test]
async fn change_plan_supersedes_and_creates_replacement() {
    let app = TestApp::spawn().await;
    let user = app
        .create_user_with_trial_claimed("switcher@example.com")
        .await;
    let basic = app
        .create_plan("Basic", "100.00", PlanDuration::Monthly, vec![])
        .await;
    let premium = app
        .create_plan("Premium", "200.00", PlanDuration::Quarterly, vec![])
        .await;

    let now = Utc::now();
    let old_id = app
        .seed_active_subscription(
            user.user_id,
            basic,
            now - Duration::days(10),
            now + Duration::days(20) + Duration::hours(1),
        )
        .await;

    let change = app
        .lifecycle
        .change_plan(user.user_id, old_id, premium, now)
        .await
        .expect("Failed to change plan");

    // The replacement is a new pending subscription on the new plan. It
    // inherits the unused time rather than a fresh full period, and awaits
    // payment of the prorated difference.
    assert_ne!(change.subscription.subscription_id, old_id);
    assert_eq!(change.subscription.plan_id, premium);
    assert_eq!(
        change.subscription.status_kind(),
        SubscriptionStatus::Pending
    );
    assert_eq!(change.remaining_days, 20);
    assert_eq!(
        (change.subscription.end_utc - change.subscription.start_utc).num_days(),
        20
    );

    // The old subscription is kept for history, marked superseded.
    let old = app
        .db
        .get_subscription(old_id)
        .await
        .expect("Failed to fetch old subscription")
        .expect("Old subscription missing");
    assert_eq!(old.status_kind(), SubscriptionStatus::Superseded);

    app.cleanup().await;
}

#[tokio::test]
async fn upgrade_charges_the_prorated_difference() {
    let app = TestApp::spawn().await;
    let user = app
        .create_user_with_trial_claimed("upgrade@example.com")
        .await;
    let basic = app
        .create_plan("Basic", "100.00", PlanDuration::Monthly, vec![])
        .await;
    let premium = app
        .create_plan("Premium", "200.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    let subscription_id = app
        .seed_active_subscription(
            user.user_id,
            basic,
            now - Duration::days(20),
            now + Duration::days(10) + Duration::hours(1),
        )
        .await;

    let change = app
        .lifecycle
        .change_plan(user.user_id, subscription_id, premium, now)
        .await
        .expect("Failed to change plan");

    // (200/30 - 100/30) * 10 days, rounded to 2 decimal places.
    assert_eq!(change.remaining_days, 10);
    assert_eq!(change.price_difference, dec("33.33"));

    app.cleanup().await;
}

#[tokio::test]
async fn downgrade_credits_the_prorated_difference() {
    let app = TestApp::spawn().await;
    let user = app
        .create_user_with_trial_claimed("downgrade@example.com")
        .await;
    let premium = app
        .create_plan("Premium", "200.00", PlanDuration::Monthly, vec![])
        .await;
    let basic = app
        .create_plan("Basic", "100.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    let subscription_id = app
        .seed_active_subscription(
            user.user_id,
            premium,
            now - Duration::days(15),
            now + Duration::days(15) + Duration::hours(1),
        )
        .await;

    let change = app
        .lifecycle
        .change_plan(user.user_id, subscription_id, basic, now)
        .await
        .expect("Failed to change plan");

    assert_eq!(change.remaining_days, 15);
    assert_eq!(change.price_difference, dec("-50.00"));

    app.cleanup().await;
}

#[tokio::test]
async fn lapsed_subscription_changes_plans_at_no_cost() {
    let app = TestApp::spawn().await;
    let user = app
        .create_user_with_trial_claimed("lapsed-change@example.com")
        .await;
    let basic = app
        .create_plan("Basic", "100.00", PlanDuration::Monthly, vec![])
        .await;
    let premium = app
        .create_plan("Premium", "200.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    // Stored as 'active' but past its end on the wall clock.
    let old_id = app
        .seed_active_subscription(
            user.user_id,
            basic,
            now - Duration::days(40),
            now - Duration::days(3),
        )
        .await;

    let change = app
        .lifecycle
        .change_plan(user.user_id, old_id, premium, now)
        .await
        .expect("Lapsed subscription must still change plans");

    // No unused time survives, so the change owes nothing.
    assert_eq!(change.remaining_days, 0);
    assert_eq!(change.price_difference, dec("0.00"));
    assert_eq!(
        change.subscription.status_kind(),
        SubscriptionStatus::Pending
    );

    let old = app
        .db
        .get_subscription(old_id)
        .await
        .expect("Failed to fetch old subscription")
        .expect("Old subscription missing");
    assert_eq!(old.status_kind(), SubscriptionStatus::Superseded);

    app.cleanup().await;
}

#[tokio::test]
async fn pending_subscription_cannot_change_plan() {
    let app = TestApp::spawn().await;
    let user = app
        .create_user_with_trial_claimed("pending-change@example.com")
        .await;
    let basic = app
        .create_plan("Basic", "100.00", PlanDuration::Monthly, vec![])
        .await;
    let premium = app
        .create_plan("Premium", "200.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    let pending = app
        .lifecycle
        .create_subscription(user.user_id, basic, None, now)
        .await
        .expect("Failed to create pending subscription");

    let err = app
        .lifecycle
        .change_plan(user.user_id, pending.subscription_id, premium, now)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    app.cleanup().await;
}

#[tokio::test]
async fn change_to_unknown_plan_is_not_found() {
    let app = TestApp::spawn().await;
    let user = app
        .create_user_with_trial_claimed("unknown-plan@example.com")
        .await;
    let basic = app
        .create_plan("Basic", "100.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    let subscription_id = app
        .seed_active_subscription(
            user.user_id,
            basic,
            now - Duration::days(1),
            now + Duration::days(29),
        )
        .await;

    let err = app
        .lifecycle
        .change_plan(user.user_id, subscription_id, Uuid::new_v4(), now)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    app.cleanup().await;
}

#[tokio::test]
async fn change_to_the_same_plan_is_rejected() {
    let app = TestApp::spawn().await;
    let user = app
        .create_user_with_trial_claimed("same-plan@example.com")
        .await;
    let basic = app
        .create_plan("Basic", "100.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    let subscription_id = app
        .seed_active_subscription(
            user.user_id,
            basic,
            now - Duration::days(1),
            now + Duration::days(29),
        )
        .await;

    let err = app
        .lifecycle
        .change_plan(user.user_id, subscription_id, basic, now)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    app.cleanup().await;
}

#[tokio::test]
async fn a_captured_payment_activates_the_plan_change() {
    let app = TestApp::spawn().await;
    let user = app
        .create_user_with_trial_claimed("paid-change@example.com")
        .await;
    let basic = app
        .create_plan("Basic", "100.00", PlanDuration::Monthly, vec![])
        .await;
    let premium = app
        .create_plan("Premium", "200.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    let old_id = app
        .seed_active_subscription(
            user.user_id,
            basic,
            now - Duration::days(20),
            now + Duration::days(10) + Duration::hours(1),
        )
        .await;

    let change = app
        .lifecycle
        .change_plan(user.user_id, old_id, premium, now)
        .await
        .expect("Failed to change plan");

    let outcome = app
        .lifecycle
        .record_payment(
            user.user_id,
            &subscription_service::models::RecordPayment {
                subscription_id: change.subscription.subscription_id,
                gateway_order_id: "order_change_1".to_string(),
                gateway_payment_id: "pay_change_1".to_string(),
                gateway_signature: "stub_signature".to_string(),
                amount: change.price_difference,
            },
            now,
        )
        .await
        .expect("Failed to record payment");

    assert!(outcome.activated);
    assert_eq!(
        outcome.subscription.status_kind(),
        SubscriptionStatus::Active
    );
    // The inherited window is kept; activation does not grant a full period.
    assert_eq!(
        (outcome.subscription.end_utc - outcome.subscription.start_utc).num_days(),
        10
    );

    app.cleanup().await;
}

#[tokio::test]
async fn only_the_owner_can_change_plans() {
    let app = TestApp::spawn().await;
    let owner = app
        .create_user_with_trial_claimed("plan-owner@example.com")
        .await;
    let intruder = app
        .create_user_with_trial_claimed("plan-intruder@example.com")
        .await;
    let basic = app
        .create_plan("Basic", "100.00", PlanDuration::Monthly, vec![])
        .await;
    let premium = app
        .create_plan("Premium", "200.00", PlanDuration::Monthly, vec![])
        .await;

    let now = Utc::now();
    let subscription_id = app
        .seed_active_subscription(
            owner.user_id,
            basic,
            now - Duration::days(1),
            now + Duration::days(29),
        )
        .await;

    // A subscription that does not belong to the caller reads as missing.
    let err = app
        .lifecycle
        .change_plan(intruder.user_id, subscription_id, premium, now)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    app.cleanup().await;
}

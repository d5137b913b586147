//! Services module for subscription-service.

pub mod database;
pub mod entitlement;
pub mod gateway;
pub mod lifecycle;
pub mod metrics;
pub mod proration;
pub mod razorpay;
pub mod retry;
pub mod selection;

pub use database::{Database, PaymentApplication};
pub use gateway::{GatewayOrder, GatewayPayment, PaymentGateway};
pub use lifecycle::{
    PaymentOrder, PaymentOutcome, PlanChange, SubscriptionDetails, SubscriptionLifecycleManager,
};
pub use metrics::{
    get_metrics, init_metrics, record_error, record_payment_amount, record_payment_operation,
    record_selection_operation, record_subscription_operation, record_trial_claim,
};
pub use razorpay::RazorpayClient;
pub use retry::RetryConfig;
pub use selection::{ProductSelectionManager, SelectionReplacement};

//! Domain models for subscription-service.

mod payment;
mod plan;
mod product;
mod selection;
mod subscription;
mod user;

pub use payment::{Payment, RecordPayment, CAPTURED_STATUS};
pub use plan::{CreatePlan, PlanDuration, SubscriptionPlan, TRIAL_DURATION_DAYS, TRIAL_PLAN_ID};
pub use product::{CreateProduct, Product};
pub use selection::ProductSelection;
pub use subscription::{CreateSubscription, Subscription, SubscriptionStatus};
pub use user::{CreateUser, User};

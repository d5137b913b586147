//! Metrics module for subscription-service.
//! Provides Prometheus metrics for lifecycle, payment, and selection operations.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "subscription_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Subscription lifecycle operations counter
pub static SUBSCRIPTION_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Payment operations counter by gateway-reported status
pub static PAYMENT_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Product selection operations counter
pub static SELECTION_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Trial claims counter
pub static TRIAL_CLAIMS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Payment amount counter by currency (monetary tracking)
pub static PAYMENT_AMOUNT_TOTAL: OnceLock<prometheus::CounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    SUBSCRIPTION_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_operations_total",
                "Total subscription lifecycle operations by type"
            ),
            &["operation"]
        )
        .expect("Failed to register SUBSCRIPTION_OPERATIONS_TOTAL")
    });

    PAYMENT_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_payment_operations_total",
                "Total payment confirmations by gateway status"
            ),
            &["status"]
        )
        .expect("Failed to register PAYMENT_OPERATIONS_TOTAL")
    });

    SELECTION_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_selection_operations_total",
                "Total product selection operations by type"
            ),
            &["operation"]
        )
        .expect("Failed to register SELECTION_OPERATIONS_TOTAL")
    });

    TRIAL_CLAIMS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_trial_claims_total",
                "Total trial claims by outcome"
            ),
            &["outcome"]
        )
        .expect("Failed to register TRIAL_CLAIMS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_errors_total",
                "Total errors by type for alerting"
            ),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    PAYMENT_AMOUNT_TOTAL.get_or_init(|| {
        prometheus::register_counter_vec!(
            prometheus::opts!(
                "subscription_payment_amount_total",
                "Total payment amount by currency"
            ),
            &["currency"]
        )
        .expect("Failed to register PAYMENT_AMOUNT_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record a subscription lifecycle operation.
pub fn record_subscription_operation(operation: &str) {
    if let Some(counter) = SUBSCRIPTION_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}

/// Record a payment confirmation by gateway status.
pub fn record_payment_operation(status: &str) {
    if let Some(counter) = PAYMENT_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

/// Record a product selection operation.
pub fn record_selection_operation(operation: &str) {
    if let Some(counter) = SELECTION_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}

/// Record a trial claim outcome.
pub fn record_trial_claim(outcome: &str) {
    if let Some(counter) = TRIAL_CLAIMS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}

/// Record a payment amount for financial tracking.
pub fn record_payment_amount(currency: &str, amount: f64) {
    if let Some(counter) = PAYMENT_AMOUNT_TOTAL.get() {
        counter.with_label_values(&[currency]).inc_by(amount.abs());
    }
}

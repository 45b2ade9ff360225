//! Prometheus metrics for lab-billing-service.
//!
//! Domain counters use the `prometheus` registry. HTTP middleware metrics
//! from `service_core` go through the `metrics` facade, exported by a
//! `metrics-exporter-prometheus` recorder; `/metrics` serves both.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec, HistogramVec,
    IntCounter, TextEncoder,
};
use std::sync::OnceLock;

static HTTP_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Invoices created, by invoice type.
pub static INVOICES_CREATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_invoices_created_total",
        "Total number of invoices created",
        &["invoice_type"]
    )
    .expect("Failed to register invoices_created_total")
});

/// Payment attempts by method and outcome.
pub static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_payments_total",
        "Total number of payment applications",
        &["method", "outcome"] // applied, rejected, failed
    )
    .expect("Failed to register payments_total")
});

/// Payment amount counter by currency.
pub static PAYMENT_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_payment_amount_total",
        "Total payment amount by currency",
        &["currency"]
    )
    .expect("Failed to register payment_amount_total")
});

pub static OVERPAYMENTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "billing_overpayments_total",
        "Payments that pushed an invoice balance below zero"
    )
    .expect("Failed to register overpayments_total")
});

/// Recurring successors by outcome.
pub static RECURRING_INVOICES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_recurring_invoices_total",
        "Recurring invoice generation outcomes",
        &["outcome"] // generated, skipped, failed
    )
    .expect("Failed to register recurring_invoices_total")
});

/// Reminders by escalation level and outcome.
pub static REMINDERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_reminders_total",
        "Payment reminders issued",
        &["level", "outcome"] // sent, delivery_failed, skipped, failed
    )
    .expect("Failed to register reminders_total")
});

pub static OVERDUE_FLIPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "billing_overdue_flipped_total",
        "Invoices moved to OVERDUE by the sweep"
    )
    .expect("Failed to register overdue_flipped_total")
});

/// Scheduled job runs.
pub static JOB_RUNS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_job_runs_total",
        "Scheduled job runs by job and outcome",
        &["job", "outcome"]
    )
    .expect("Failed to register job_runs_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization) and the HTTP recorder.
pub fn init_metrics() {
    Lazy::force(&INVOICES_CREATED);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&PAYMENT_AMOUNT_TOTAL);
    Lazy::force(&OVERPAYMENTS_TOTAL);
    Lazy::force(&RECURRING_INVOICES_TOTAL);
    Lazy::force(&REMINDERS_TOTAL);
    Lazy::force(&OVERDUE_FLIPPED_TOTAL);
    Lazy::force(&JOB_RUNS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);

    if HTTP_METRICS_HANDLE.get().is_none() {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = HTTP_METRICS_HANDLE.set(handle);
            }
            Err(e) => tracing::warn!(error = %e, "HTTP metrics recorder not installed"),
        }
    }
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut body = encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default();

    if let Some(handle) = HTTP_METRICS_HANDLE.get() {
        body.push_str(&handle.render());
    }
    body
}

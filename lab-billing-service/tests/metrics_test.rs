//! Financial metrics over reporting windows.

mod common;

use chrono::Duration;
use common::{untaxed_settings, TestApp, TEST_USER_ID};
use lab_billing_service::error::BillingError;
use lab_billing_service::models::{ApplyPayment, PaymentMethod, ReportingPeriod};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

async fn pay(app: &TestApp, invoice_id: Uuid, amount: Decimal) {
    app.billing
        .apply_payment(
            ApplyPayment {
                invoice_id: Some(invoice_id),
                customer_id: None,
                amount,
                payment_method: PaymentMethod::Card,
                payment_reference: None,
                description: None,
                notes: None,
            },
            TEST_USER_ID,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn empty_window_reports_zeroes() {
    let app = TestApp::spawn().await;

    let metrics = app
        .billing
        .get_financial_metrics(ReportingPeriod::All)
        .await
        .unwrap();

    assert_eq!(metrics.invoice_count, 0);
    assert_eq!(metrics.total_revenue, Decimal::ZERO);
    assert_eq!(metrics.collection_rate, Decimal::ZERO);
}

#[tokio::test]
async fn month_rollup_counts_paid_outstanding_and_overdue() {
    let app = TestApp::with_settings(untaxed_settings()).await;
    let paid = app.sent_invoice(dec!(300)).await;
    let partial = app.sent_invoice(dec!(300)).await;
    app.sent_invoice(dec!(300)).await;
    pay(&app, paid.invoice_id, dec!(300)).await;
    pay(&app, partial.invoice_id, dec!(100)).await;

    let metrics = app
        .billing
        .get_financial_metrics(ReportingPeriod::Month)
        .await
        .unwrap();

    assert_eq!(metrics.invoice_count, 3);
    assert_eq!(metrics.total_revenue, dec!(900));
    assert_eq!(metrics.total_paid, dec!(300));
    assert_eq!(metrics.total_outstanding, dec!(500));
    assert_eq!(metrics.total_overdue, dec!(0));
    assert_eq!(metrics.average_invoice_value, dec!(300));
    assert_eq!(metrics.collection_rate, dec!(44.44));

    // A month and a half later the unpaid balances are past due.
    app.clock.advance(Duration::days(45));
    let later = app
        .billing
        .get_financial_metrics(ReportingPeriod::All)
        .await
        .unwrap();
    assert_eq!(later.total_overdue, dec!(500));

    // The overdue sweep changes statuses, not the receivables.
    assert_eq!(app.billing.update_overdue_invoices().await.unwrap(), 2);
    let swept = app
        .billing
        .get_financial_metrics(ReportingPeriod::All)
        .await
        .unwrap();
    assert_eq!(swept.total_outstanding, dec!(500));
    assert_eq!(swept.total_overdue, dec!(500));
}

#[tokio::test]
async fn week_includes_invoice_issued_this_instant() {
    let app = TestApp::with_settings(untaxed_settings()).await;
    app.sent_invoice(dec!(75)).await;

    let week = app
        .billing
        .get_financial_metrics(ReportingPeriod::Week)
        .await
        .unwrap();
    let today = app
        .billing
        .get_financial_metrics(ReportingPeriod::Today)
        .await
        .unwrap();

    assert_eq!(week.invoice_count, 1);
    assert_eq!(week.total_revenue, dec!(75));
    assert_eq!(today.invoice_count, 1);
}

#[tokio::test]
async fn range_excludes_invoices_outside_it() {
    let app = TestApp::with_settings(untaxed_settings()).await;
    app.sent_invoice(dec!(100)).await;
    app.clock.advance(Duration::days(10));
    app.sent_invoice(dec!(40)).await;

    let metrics = app
        .billing
        .get_financial_metrics(ReportingPeriod::Range {
            start: Some(common::start_time() + Duration::days(5)),
            end: None,
        })
        .await
        .unwrap();

    assert_eq!(metrics.invoice_count, 1);
    assert_eq!(metrics.total_revenue, dec!(40));
}

#[tokio::test]
async fn inverted_range_is_rejected() {
    let app = TestApp::spawn().await;

    let result = app
        .billing
        .get_financial_metrics(ReportingPeriod::Range {
            start: Some(common::start_time()),
            end: Some(common::start_time() - Duration::days(1)),
        })
        .await;

    assert!(matches!(result, Err(BillingError::InvalidInput(_))));
}

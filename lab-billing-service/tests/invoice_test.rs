//! Invoice creation, numbering and lifecycle transitions.

mod common;

use chrono::Duration;
use common::{item, TestApp, TEST_USER_ID};
use lab_billing_service::error::BillingError;
use lab_billing_service::models::{InvoiceStatus, ListInvoicesFilter, TaxType};
use lab_billing_service::services::{AuditAction, AuditSeverity, BillTo, CreateInvoice};
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn create_invoice_prices_lines_and_taxes() {
    let app = TestApp::spawn().await;

    let invoice = app
        .invoice_for_clinic(
            vec![
                item("Complete blood count", dec!(1), dec!(150), dec!(0)),
                item("Fasting glucose", dec!(1), dec!(80), dec!(5)),
            ],
            InvoiceStatus::Draft,
        )
        .await;

    assert_eq!(invoice.subtotal, dec!(226));
    assert_eq!(invoice.discount_amount, dec!(0));
    assert_eq!(invoice.tax_amount, dec!(45.2));
    assert_eq!(invoice.stamp_tax_amount, dec!(0.226));
    assert_eq!(invoice.total_amount, dec!(271.426));
    assert_eq!(invoice.balance_amount, invoice.total_amount);
    assert_eq!(invoice.paid_amount, dec!(0));
    assert_eq!(invoice.status, InvoiceStatus::Draft);
    assert_eq!(invoice.customer_name, "Clinique Atlas");
    assert_eq!(invoice.currency, "MAD");
    assert!(invoice.amounts_consistent());

    let document = app.billing.get_invoice(invoice.invoice_id).await.unwrap();
    assert_eq!(document.items.len(), 2);
    assert_eq!(document.items[1].line_total, dec!(76));
    assert_eq!(document.taxes.len(), 2);
    assert!(document.taxes.iter().any(|t| t.tax_type == TaxType::Vat));
    assert!(document.taxes.iter().any(|t| t.tax_type == TaxType::StampTax));
}

#[tokio::test]
async fn due_date_follows_customer_terms() {
    let app = TestApp::spawn().await;

    let invoice = app.sent_invoice(dec!(100)).await;

    assert_eq!(invoice.issue_date, common::start_time());
    assert_eq!(invoice.due_date, common::start_time() + Duration::days(30));
}

#[tokio::test]
async fn invoice_numbers_are_sequential_per_year() {
    let app = TestApp::spawn().await;

    let first = app.sent_invoice(dec!(10)).await;
    let second = app.sent_invoice(dec!(20)).await;
    let third = app.sent_invoice(dec!(30)).await;

    assert_eq!(first.invoice_number, "INV-2026-000001");
    assert_eq!(second.invoice_number, "INV-2026-000002");
    assert_eq!(third.invoice_number, "INV-2026-000003");
}

#[tokio::test]
async fn invoice_numbering_restarts_each_year() {
    let app = TestApp::spawn().await;
    let last_of_2026 = app.sent_invoice(dec!(10)).await;
    assert_eq!(last_of_2026.invoice_number, "INV-2026-000001");

    // 2026-03-02 plus 306 days is 2027-01-02.
    app.clock.advance(Duration::days(306));
    let first_of_2027 = app.sent_invoice(dec!(20)).await;
    let second_of_2027 = app.sent_invoice(dec!(30)).await;

    assert_eq!(first_of_2027.invoice_number, "INV-2027-000001");
    assert_eq!(second_of_2027.invoice_number, "INV-2027-000002");
}

#[tokio::test]
async fn customer_snapshot_survives_directory_changes() {
    let app = TestApp::spawn().await;
    let invoice = app.sent_invoice(dec!(100)).await;

    let mut renamed = app.clinic.clone();
    renamed.name = "Atlas Medical Group".to_string();
    renamed.address = Some("4 Avenue Hassan II, Casablanca".to_string());
    renamed.tax_id = Some("ICE009999999000011".to_string());
    app.directory.add_customer(renamed).await;

    let document = app.billing.get_invoice(invoice.invoice_id).await.unwrap();
    assert_eq!(document.invoice.customer_name, "Clinique Atlas");
    assert_eq!(
        document.invoice.customer_address.as_deref(),
        Some("12 Rue Ibn Sina, Rabat")
    );
    assert_eq!(
        document.invoice.customer_tax_id.as_deref(),
        Some("ICE001234567000089")
    );

    let listed = app
        .billing
        .list_invoices(ListInvoicesFilter::default())
        .await
        .unwrap();
    assert_eq!(listed[0].customer_name, "Clinique Atlas");
}

#[tokio::test]
async fn walk_in_patient_gets_one_individual_customer() {
    let app = TestApp::spawn().await;
    let before = app.directory.customer_count().await;

    let first = app
        .billing
        .create_invoice(
            CreateInvoice::new(
                BillTo::WalkInPatient(app.patient.patient_id),
                vec![item("TSH", dec!(1), dec!(120), dec!(0))],
            ),
            TEST_USER_ID,
        )
        .await
        .unwrap();
    let second = app
        .billing
        .create_invoice(
            CreateInvoice::new(
                BillTo::WalkInPatient(app.patient.patient_id),
                vec![item("Ferritin", dec!(1), dec!(90), dec!(0))],
            ),
            TEST_USER_ID,
        )
        .await
        .unwrap();

    assert_eq!(app.directory.customer_count().await, before + 1);
    assert_eq!(first.customer_id, second.customer_id);
    assert_eq!(first.customer_name, "Amina Benali");
    assert_eq!(first.patient_id, Some(app.patient.patient_id));
}

#[tokio::test]
async fn invoice_from_request_bills_each_analysis() {
    let app = TestApp::spawn().await;
    let request_id = app.seed_request(&[dec!(150), dec!(80)]).await;

    let invoice = app
        .billing
        .generate_invoice_from_request(request_id, TEST_USER_ID)
        .await
        .unwrap();

    assert_eq!(invoice.request_id, Some(request_id));
    assert_eq!(invoice.subtotal, dec!(230));
    assert_eq!(invoice.patient_name.as_deref(), Some("Amina Benali"));

    let document = app.billing.get_invoice(invoice.invoice_id).await.unwrap();
    assert_eq!(document.items.len(), 2);
    assert!(document.items.iter().all(|i| i.quantity == dec!(1)));
}

#[tokio::test]
async fn request_is_invoiced_only_once() {
    let app = TestApp::spawn().await;
    let request_id = app.seed_request(&[dec!(60)]).await;

    app.billing
        .generate_invoice_from_request(request_id, TEST_USER_ID)
        .await
        .unwrap();
    let again = app
        .billing
        .generate_invoice_from_request(request_id, TEST_USER_ID)
        .await;

    assert!(matches!(again, Err(BillingError::Conflict(_))));
}

#[tokio::test]
async fn unknown_request_is_not_found() {
    let app = TestApp::spawn().await;

    let result = app
        .billing
        .generate_invoice_from_request(Uuid::new_v4(), TEST_USER_ID)
        .await;

    assert!(matches!(result, Err(BillingError::NotFound(_))));
}

#[tokio::test]
async fn invalid_input_is_rejected_before_persisting() {
    let app = TestApp::spawn().await;
    let customer = BillTo::Customer(app.clinic.customer_id);

    let empty = app
        .billing
        .create_invoice(CreateInvoice::new(customer, vec![]), TEST_USER_ID)
        .await;
    assert!(matches!(empty, Err(BillingError::InvalidInput(_))));

    let negative = app
        .billing
        .create_invoice(
            CreateInvoice::new(customer, vec![item("CRP", dec!(1), dec!(-5), dec!(0))]),
            TEST_USER_ID,
        )
        .await;
    assert!(matches!(negative, Err(BillingError::InvalidInput(_))));

    let mut paid_on_creation =
        CreateInvoice::new(customer, vec![item("CRP", dec!(1), dec!(50), dec!(0))]);
    paid_on_creation.initial_status = Some(InvoiceStatus::Paid);
    let paid = app.billing.create_invoice(paid_on_creation, TEST_USER_ID).await;
    assert!(matches!(paid, Err(BillingError::InvalidInput(_))));

    let mut past_due = CreateInvoice::new(customer, vec![item("CRP", dec!(1), dec!(50), dec!(0))]);
    past_due.due_date = Some(common::start_time() - Duration::days(1));
    let past = app.billing.create_invoice(past_due, TEST_USER_ID).await;
    assert!(matches!(past, Err(BillingError::InvalidInput(_))));

    let page = app
        .billing
        .list_invoices(ListInvoicesFilter::default())
        .await
        .unwrap();
    assert!(page.is_empty());
}

#[tokio::test]
async fn rejected_walk_in_creates_no_customer() {
    let app = TestApp::spawn().await;
    let walk_in = BillTo::WalkInPatient(app.patient.patient_id);
    let customers_before = app.directory.customer_count().await;

    let mut past_due = CreateInvoice::new(walk_in, vec![item("CRP", dec!(1), dec!(50), dec!(0))]);
    past_due.due_date = Some(common::start_time() - Duration::days(1));
    let past = app.billing.create_invoice(past_due, TEST_USER_ID).await;
    assert!(matches!(past, Err(BillingError::InvalidInput(_))));

    let mut unknown_request =
        CreateInvoice::new(walk_in, vec![item("CRP", dec!(1), dec!(50), dec!(0))]);
    unknown_request.request_id = Some(Uuid::new_v4());
    let unknown = app.billing.create_invoice(unknown_request, TEST_USER_ID).await;
    assert!(matches!(unknown, Err(BillingError::NotFound(_))));

    let request_id = app.seed_request(&[dec!(80)]).await;
    let mut clinic_bill = CreateInvoice::new(
        BillTo::Customer(app.clinic.customer_id),
        vec![item("Ferritin", dec!(1), dec!(80), dec!(0))],
    );
    clinic_bill.request_id = Some(request_id);
    app.billing.create_invoice(clinic_bill, TEST_USER_ID).await.unwrap();

    let mut duplicate = CreateInvoice::new(walk_in, vec![item("Ferritin", dec!(1), dec!(80), dec!(0))]);
    duplicate.request_id = Some(request_id);
    let conflict = app.billing.create_invoice(duplicate, TEST_USER_ID).await;
    assert!(matches!(conflict, Err(BillingError::Conflict(_))));

    assert_eq!(app.directory.customer_count().await, customers_before);
}

#[tokio::test]
async fn unknown_customer_is_not_found() {
    let app = TestApp::spawn().await;

    let result = app
        .billing
        .create_invoice(
            CreateInvoice::new(
                BillTo::Customer(Uuid::new_v4()),
                vec![item("HbA1c", dec!(1), dec!(100), dec!(0))],
            ),
            TEST_USER_ID,
        )
        .await;

    assert!(matches!(result, Err(BillingError::NotFound(_))));
}

#[tokio::test]
async fn unreachable_directory_fails_closed() {
    let app = TestApp::spawn().await;
    app.directory.set_unavailable(true);

    let result = app
        .billing
        .create_invoice(
            CreateInvoice::new(
                BillTo::Customer(app.clinic.customer_id),
                vec![item("HbA1c", dec!(1), dec!(100), dec!(0))],
            ),
            TEST_USER_ID,
        )
        .await;

    assert!(matches!(result, Err(BillingError::UpstreamUnavailable(_))));
}

#[tokio::test]
async fn draft_is_issued_then_cancelled() {
    let app = TestApp::spawn().await;
    let draft = app
        .invoice_for_clinic(
            vec![item("Vitamin D", dec!(1), dec!(200), dec!(0))],
            InvoiceStatus::Draft,
        )
        .await;

    let sent = app
        .billing
        .transition_status(draft.invoice_id, InvoiceStatus::Sent, TEST_USER_ID)
        .await
        .unwrap();
    assert_eq!(sent.status, InvoiceStatus::Sent);
    assert_eq!(sent.version, draft.version + 1);

    let cancelled = app
        .billing
        .transition_status(draft.invoice_id, InvoiceStatus::Cancelled, TEST_USER_ID)
        .await
        .unwrap();
    assert_eq!(cancelled.status, InvoiceStatus::Cancelled);

    let events = app.audit.events_for(AuditAction::InvoiceStatusChanged).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].severity, AuditSeverity::Notice);
    assert_eq!(events[1].actor, TEST_USER_ID);
}

#[tokio::test]
async fn illegal_transitions_are_refused() {
    let app = TestApp::spawn().await;
    let invoice = app.sent_invoice(dec!(100)).await;

    let back_to_draft = app
        .billing
        .transition_status(invoice.invoice_id, InvoiceStatus::Draft, TEST_USER_ID)
        .await;
    assert!(matches!(back_to_draft, Err(BillingError::InvalidInput(_))));

    let refund_unpaid = app
        .billing
        .transition_status(invoice.invoice_id, InvoiceStatus::Refunded, TEST_USER_ID)
        .await;
    assert!(matches!(refund_unpaid, Err(BillingError::Conflict(_))));

    app.billing
        .transition_status(invoice.invoice_id, InvoiceStatus::Cancelled, TEST_USER_ID)
        .await
        .unwrap();
    let reissue = app
        .billing
        .transition_status(invoice.invoice_id, InvoiceStatus::Sent, TEST_USER_ID)
        .await;
    assert!(matches!(reissue, Err(BillingError::Conflict(_))));
}

#[tokio::test]
async fn list_invoices_pages_by_id() {
    let app = TestApp::spawn().await;
    for amount in [dec!(10), dec!(20), dec!(30), dec!(40), dec!(50)] {
        app.sent_invoice(amount).await;
    }

    let first = app
        .billing
        .list_invoices(ListInvoicesFilter {
            page_size: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    let second = app
        .billing
        .list_invoices(ListInvoicesFilter {
            page_size: 2,
            page_token: first.last().map(|i| i.invoice_id),
            ..Default::default()
        })
        .await
        .unwrap();
    let rest = app
        .billing
        .list_invoices(ListInvoicesFilter {
            page_size: 2,
            page_token: second.last().map(|i| i.invoice_id),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
    assert_eq!(rest.len(), 1);
    assert!(first[1].invoice_id < second[0].invoice_id);
}

#[tokio::test]
async fn list_invoices_rejects_inverted_range() {
    let app = TestApp::spawn().await;

    let result = app
        .billing
        .list_invoices(ListInvoicesFilter {
            issued_from: Some(common::start_time()),
            issued_to: Some(common::start_time() - Duration::days(1)),
            ..Default::default()
        })
        .await;

    assert!(matches!(result, Err(BillingError::InvalidInput(_))));
}

#[tokio::test]
async fn rendered_document_is_rounded_for_print() {
    let app = TestApp::spawn().await;
    let invoice = app
        .invoice_for_clinic(
            vec![
                item("Complete blood count", dec!(1), dec!(150), dec!(0)),
                item("Fasting glucose", dec!(1), dec!(80), dec!(5)),
            ],
            InvoiceStatus::Sent,
        )
        .await;

    let rendered = app.billing.render_invoice(invoice.invoice_id).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&rendered.bytes).unwrap();

    assert_eq!(rendered.content_type, "application/json");
    assert!(rendered.file_name.contains(&invoice.invoice_number));
    assert_eq!(body["total"], "271.43");
    assert_eq!(body["invoice_number"], invoice.invoice_number.as_str());
}

#[tokio::test]
async fn concurrent_creation_yields_unique_numbers() {
    let app = TestApp::spawn().await;

    let tasks = (0..8).map(|i| {
        let billing = app.billing.clone();
        let customer_id = app.clinic.customer_id;
        tokio::spawn(async move {
            billing
                .create_invoice(
                    CreateInvoice::new(
                        BillTo::Customer(customer_id),
                        vec![item("Panel", dec!(1), rust_decimal::Decimal::from(10 + i), dec!(0))],
                    ),
                    TEST_USER_ID,
                )
                .await
        })
    });

    let mut numbers: Vec<String> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().invoice_number)
        .collect();
    numbers.sort();
    numbers.dedup();

    assert_eq!(numbers.len(), 8);
    assert_eq!(numbers.first().unwrap(), "INV-2026-000001");
    assert_eq!(numbers.last().unwrap(), "INV-2026-000008");
}

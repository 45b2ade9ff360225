//! Request and response bodies of the HTTP surface.

use crate::models::{
    ApplyPayment, Invoice, InvoiceStatus, InvoiceType, ListInvoicesFilter, PaymentMethod,
    RecurrenceType, ReminderMethod, ReportingPeriod,
};
use crate::services::{BillTo, CreateInvoice, LineItemInput};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct LineItemRequest {
    pub service_id: Option<Uuid>,
    #[validate(length(min = 1, max = 255, message = "Description must be 1-255 characters"))]
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount_percent: Decimal,
    pub tax_rate: Option<Decimal>,
}

impl From<LineItemRequest> for LineItemInput {
    fn from(item: LineItemRequest) -> Self {
        Self {
            service_id: item.service_id,
            description: item.description,
            quantity: item.quantity,
            unit_price: item.unit_price,
            discount_percent: item.discount_percent,
            tax_rate: item.tax_rate,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    /// Existing customer to bill. Without it the patient is billed as a walk-in.
    pub customer_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
    pub invoice_type: Option<InvoiceType>,
    #[validate(length(min = 1, message = "At least one line item is required"), nested)]
    pub items: Vec<LineItemRequest>,
    #[serde(default)]
    pub discount_percent: Decimal,
    pub due_date: Option<DateTime<Utc>>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    #[validate(length(equal = 3, message = "Currency must be an ISO 4217 code"))]
    pub currency: Option<String>,
    pub exchange_rate: Option<Decimal>,
    pub status: Option<InvoiceStatus>,
}

impl TryFrom<CreateInvoiceRequest> for CreateInvoice {
    type Error = AppError;

    fn try_from(req: CreateInvoiceRequest) -> Result<Self, Self::Error> {
        let bill_to = match (req.customer_id, req.patient_id) {
            (Some(customer_id), _) => BillTo::Customer(customer_id),
            (None, Some(patient_id)) => BillTo::WalkInPatient(patient_id),
            (None, None) => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Either customer_id or patient_id is required"
                )))
            }
        };

        Ok(CreateInvoice {
            bill_to,
            patient_id: req.patient_id,
            request_id: req.request_id,
            invoice_type: req.invoice_type.unwrap_or(InvoiceType::Standard),
            items: req.items.into_iter().map(LineItemInput::from).collect(),
            discount_percent: req.discount_percent,
            due_date: req.due_date,
            notes: req.notes,
            currency: req.currency.map(|c| c.to_uppercase()),
            exchange_rate: req.exchange_rate,
            initial_status: req.status,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateFromRequest {
    pub request_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: InvoiceStatus,
}

#[derive(Debug, Deserialize)]
pub struct SetupRecurrenceRequest {
    pub recurrence_type: RecurrenceType,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SendReminderRequest {
    pub method: Option<ReminderMethod>,
}

#[derive(Debug, Deserialize)]
pub struct ListInvoicesParams {
    pub status: Option<InvoiceStatus>,
    pub customer_id: Option<Uuid>,
    pub issued_from: Option<DateTime<Utc>>,
    pub issued_to: Option<DateTime<Utc>>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

impl From<ListInvoicesParams> for ListInvoicesFilter {
    fn from(params: ListInvoicesParams) -> Self {
        Self {
            status: params.status,
            customer_id: params.customer_id,
            issued_from: params.issued_from,
            issued_to: params.issued_to,
            page_size: params.page_size.unwrap_or(ListInvoicesFilter::DEFAULT_PAGE_SIZE),
            page_token: params.page_token,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InvoiceListResponse {
    pub invoices: Vec<Invoice>,
    /// Pass as `page_token` to fetch the next page; absent on the last page.
    pub next_page_token: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApplyPaymentRequest {
    pub invoice_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    #[validate(length(max = 128))]
    pub payment_reference: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

impl From<ApplyPaymentRequest> for ApplyPayment {
    fn from(req: ApplyPaymentRequest) -> Self {
        Self {
            invoice_id: req.invoice_id,
            customer_id: req.customer_id,
            amount: req.amount,
            payment_method: req.payment_method,
            payment_reference: req.payment_reference,
            description: req.description,
            notes: req.notes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MetricsParams {
    /// today, week, month, year or all.
    pub period: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl From<MetricsParams> for ReportingPeriod {
    fn from(params: MetricsParams) -> Self {
        if params.start.is_some() || params.end.is_some() {
            return ReportingPeriod::Range {
                start: params.start,
                end: params.end,
            };
        }
        params
            .period
            .as_deref()
            .map(|p| ReportingPeriod::from_string(&p.to_lowercase()))
            .unwrap_or(ReportingPeriod::All)
    }
}

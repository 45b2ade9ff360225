//! Invoice creation, status management and recurrence policy.

use crate::error::BillingError;
use crate::models::{
    Customer, Invoice, InvoiceDocument, InvoiceStatus, InvoiceType, ListInvoicesFilter,
    NewInvoice, Patient, RecurrenceType,
};
use crate::services::audit::{AuditAction, AuditEvent, AuditSeverity};
use crate::services::calculator::{calculate, LineItemInput, TaxRates};
use crate::services::context::BillingDeps;
use crate::services::metrics::INVOICES_CREATED;
use crate::services::renderer::RenderedDocument;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

/// Who the invoice is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillTo {
    /// Existing customer record.
    Customer(Uuid),
    /// Walk-in patient, billed through an INDIVIDUAL customer created on first use.
    WalkInPatient(Uuid),
}

#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub bill_to: BillTo,
    pub patient_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
    pub invoice_type: InvoiceType,
    pub items: Vec<LineItemInput>,
    pub discount_percent: Decimal,
    /// Overrides `issue date + customer payment terms`.
    pub due_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub currency: Option<String>,
    pub exchange_rate: Option<Decimal>,
    /// DRAFT unless SENT is requested.
    pub initial_status: Option<InvoiceStatus>,
}

impl CreateInvoice {
    pub fn new(bill_to: BillTo, items: Vec<LineItemInput>) -> Self {
        Self {
            bill_to,
            patient_id: None,
            request_id: None,
            invoice_type: InvoiceType::Standard,
            items,
            discount_percent: Decimal::ZERO,
            due_date: None,
            notes: None,
            currency: None,
            exchange_rate: None,
            initial_status: None,
        }
    }
}

enum Payer {
    Existing(Customer),
    WalkIn(Patient),
}

pub struct InvoiceManager {
    deps: BillingDeps,
}

impl InvoiceManager {
    pub fn new(deps: BillingDeps) -> Self {
        Self { deps }
    }

    async fn load(&self, invoice_id: Uuid) -> Result<Invoice, BillingError> {
        self.deps
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))
    }

    async fn customer(&self, customer_id: Uuid) -> Result<Customer, BillingError> {
        self.deps
            .directory
            .get_customer(customer_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Customer", customer_id))
    }

    async fn patient(&self, patient_id: Uuid) -> Result<Patient, BillingError> {
        self.deps
            .directory
            .get_patient(patient_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Patient", patient_id))
    }

    async fn ensure_request_not_invoiced(&self, request_id: Uuid) -> Result<(), BillingError> {
        if let Some(existing) = self.deps.store.find_invoice_by_request(request_id).await? {
            return Err(BillingError::Conflict(format!(
                "Request {} is already invoiced by {}",
                request_id, existing.invoice_number
            )));
        }
        Ok(())
    }

    /// Price, number and persist a new invoice.
    #[instrument(skip(self, input), fields(bill_to = ?input.bill_to, request_id = ?input.request_id))]
    pub async fn create_invoice(
        &self,
        input: CreateInvoice,
        actor: &str,
    ) -> Result<Invoice, BillingError> {
        let status = input.initial_status.unwrap_or(InvoiceStatus::Draft);
        if !matches!(status, InvoiceStatus::Draft | InvoiceStatus::Sent) {
            return Err(BillingError::InvalidInput(format!(
                "Invoices start as DRAFT or SENT, not {}",
                status
            )));
        }
        let exchange_rate = input.exchange_rate.unwrap_or(Decimal::ONE);
        if exchange_rate <= Decimal::ZERO {
            return Err(BillingError::InvalidInput(
                "Exchange rate must be positive".to_string(),
            ));
        }

        let totals = calculate(
            &input.items,
            input.discount_percent,
            &TaxRates::from(&self.deps.settings),
        )?;

        let payer = match input.bill_to {
            BillTo::Customer(customer_id) => Payer::Existing(self.customer(customer_id).await?),
            BillTo::WalkInPatient(patient_id) => Payer::WalkIn(self.patient(patient_id).await?),
        };

        let patient = match (&payer, input.patient_id) {
            (Payer::WalkIn(patient), None) => Some(patient.clone()),
            (Payer::WalkIn(patient), Some(id)) if patient.patient_id == id => Some(patient.clone()),
            (_, Some(id)) => Some(self.patient(id).await?),
            (Payer::Existing(_), None) => None,
        };

        if let Some(request_id) = input.request_id {
            if self.deps.requests.get_request(request_id).await?.is_none() {
                return Err(BillingError::not_found("Request", request_id));
            }
            self.ensure_request_not_invoiced(request_id).await?;
        }

        let now = self.deps.now();
        if let Some(due_date) = input.due_date {
            if due_date < now {
                return Err(BillingError::InvalidInput(format!(
                    "Due date {} is before the issue date",
                    due_date
                )));
            }
        }

        // A walk-in customer is only created once every check has passed.
        let customer = match payer {
            Payer::Existing(customer) => customer,
            Payer::WalkIn(patient) => self.deps.directory.find_or_create_individual(&patient).await?,
        };

        let terms_days = customer
            .payment_terms_days
            .map(i64::from)
            .unwrap_or(self.deps.settings.default_payment_terms_days);
        let due_date = input.due_date.unwrap_or(now + Duration::days(terms_days));

        let new_invoice = NewInvoice {
            invoice_type: input.invoice_type,
            status,
            customer_id: customer.customer_id,
            customer_name: customer.name.clone(),
            customer_address: customer.address.clone(),
            customer_tax_id: customer.tax_id.clone(),
            patient_id: patient.as_ref().map(|p| p.patient_id),
            patient_name: patient.as_ref().map(Patient::full_name),
            request_id: input.request_id,
            subtotal: totals.subtotal,
            discount_percent: totals.discount_percent,
            discount_amount: totals.discount_amount,
            tax_amount: totals.tax_amount,
            stamp_tax_amount: totals.stamp_tax_amount,
            total_amount: totals.total_amount,
            currency: input
                .currency
                .unwrap_or_else(|| self.deps.settings.default_currency.clone()),
            exchange_rate,
            issue_date: now,
            due_date,
            recurrence_type: RecurrenceType::None,
            recurrence_end: None,
            last_generated_at: None,
            parent_invoice_id: None,
            notes: input.notes,
            created_by: Some(actor.to_string()),
            items: totals.items,
            taxes: totals.taxes,
        };

        let invoice = self.deps.store.create_invoice(new_invoice).await?;

        INVOICES_CREATED
            .with_label_values(&[invoice.invoice_type.as_str()])
            .inc();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            customer_id = %invoice.customer_id,
            total_amount = %invoice.total_amount,
            status = %invoice.status,
            "Invoice created"
        );

        self.deps
            .record_audit(
                AuditEvent::new(AuditAction::InvoiceCreated, actor, invoice.invoice_id, now)
                    .with_after(&json!({
                        "invoice_number": invoice.invoice_number,
                        "status": invoice.status,
                        "total_amount": invoice.total_amount,
                        "request_id": invoice.request_id,
                    })),
            )
            .await;

        Ok(invoice)
    }

    /// Bill a lab request: one line per ordered analysis at its effective price.
    #[instrument(skip(self))]
    pub async fn generate_from_request(
        &self,
        request_id: Uuid,
        actor: &str,
    ) -> Result<Invoice, BillingError> {
        let request = self
            .deps
            .requests
            .get_request(request_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Request", request_id))?;

        self.ensure_request_not_invoiced(request_id).await?;

        let items = request
            .items
            .iter()
            .map(|analysis| LineItemInput {
                service_id: Some(analysis.analysis_id),
                description: analysis.name.clone(),
                quantity: Decimal::ONE,
                unit_price: analysis.effective_price(),
                discount_percent: Decimal::ZERO,
                tax_rate: analysis.tax_rate,
            })
            .collect();

        let mut input = CreateInvoice::new(BillTo::WalkInPatient(request.patient_id), items);
        input.patient_id = Some(request.patient_id);
        input.request_id = Some(request_id);

        self.create_invoice(input, actor).await
    }

    /// Manual transition: issue a draft, cancel or refund.
    #[instrument(skip(self))]
    pub async fn transition_status(
        &self,
        invoice_id: Uuid,
        target: InvoiceStatus,
        actor: &str,
    ) -> Result<Invoice, BillingError> {
        if !matches!(
            target,
            InvoiceStatus::Sent | InvoiceStatus::Cancelled | InvoiceStatus::Refunded
        ) {
            return Err(BillingError::InvalidInput(format!(
                "{} is not a manual status; use SENT, CANCELLED or REFUNDED",
                target
            )));
        }

        let (before, updated) = self
            .deps
            .with_lock_retry("transition_status", || async {
                let invoice = self.load(invoice_id).await?;
                if !invoice.status.can_transition_to(target) {
                    return Err(BillingError::Conflict(format!(
                        "Invoice {} cannot move from {} to {}",
                        invoice.invoice_number, invoice.status, target
                    )));
                }

                let mut next = invoice.clone();
                next.status = target;
                next.updated_utc = self.deps.now();
                let updated = self.deps.store.update_invoice(&next).await?;
                Ok((invoice.status, updated))
            })
            .await?;

        info!(
            invoice_number = %updated.invoice_number,
            from = %before,
            to = %updated.status,
            "Invoice status changed"
        );

        let severity = if target == InvoiceStatus::Sent {
            AuditSeverity::Info
        } else {
            AuditSeverity::Notice
        };
        self.deps
            .record_audit(
                AuditEvent::new(
                    AuditAction::InvoiceStatusChanged,
                    actor,
                    invoice_id,
                    updated.updated_utc,
                )
                .with_severity(severity)
                .with_before(&before)
                .with_after(&updated.status),
            )
            .await;

        Ok(updated)
    }

    /// Attach a recurrence policy. Successors are produced by the scheduler.
    #[instrument(skip(self))]
    pub async fn setup_recurrence(
        &self,
        invoice_id: Uuid,
        recurrence: RecurrenceType,
        end_date: DateTime<Utc>,
        actor: &str,
    ) -> Result<Invoice, BillingError> {
        if recurrence == RecurrenceType::None {
            return Err(BillingError::InvalidInput(
                "Recurrence type must not be NONE; cancel the recurrence instead".to_string(),
            ));
        }
        let now = self.deps.now();
        if end_date <= now {
            return Err(BillingError::InvalidInput(format!(
                "Recurrence end {} is not in the future",
                end_date
            )));
        }

        let updated = self
            .deps
            .with_lock_retry("setup_recurrence", || async {
                let invoice = self.load(invoice_id).await?;
                if matches!(
                    invoice.status,
                    InvoiceStatus::Cancelled | InvoiceStatus::Refunded
                ) {
                    return Err(BillingError::Conflict(format!(
                        "Invoice {} is {} and cannot recur",
                        invoice.invoice_number, invoice.status
                    )));
                }
                if let Some(successor) = invoice.successor_invoice_id {
                    return Err(BillingError::Conflict(format!(
                        "Invoice {} already has successor {}; configure the latest invoice of the chain",
                        invoice.invoice_number, successor
                    )));
                }

                let mut next = invoice;
                next.recurrence_type = recurrence;
                next.recurrence_end = Some(end_date);
                next.last_generated_at.get_or_insert(now);
                next.updated_utc = now;
                self.deps.store.update_invoice(&next).await
            })
            .await?;

        info!(
            invoice_number = %updated.invoice_number,
            recurrence = recurrence.as_str(),
            recurrence_end = %end_date,
            "Recurrence configured"
        );

        self.deps
            .record_audit(
                AuditEvent::new(AuditAction::RecurrenceConfigured, actor, invoice_id, now)
                    .with_after(&json!({
                        "recurrence_type": recurrence,
                        "recurrence_end": end_date,
                    })),
            )
            .await;

        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn cancel_recurrence(
        &self,
        invoice_id: Uuid,
        actor: &str,
    ) -> Result<Invoice, BillingError> {
        let (previous, updated) = self
            .deps
            .with_lock_retry("cancel_recurrence", || async {
                let invoice = self.load(invoice_id).await?;
                if invoice.recurrence_type == RecurrenceType::None {
                    return Err(BillingError::Conflict(format!(
                        "Invoice {} has no recurrence policy",
                        invoice.invoice_number
                    )));
                }

                let previous = invoice.recurrence_type;
                let mut next = invoice;
                next.recurrence_type = RecurrenceType::None;
                next.recurrence_end = None;
                next.updated_utc = self.deps.now();
                Ok((previous, self.deps.store.update_invoice(&next).await?))
            })
            .await?;

        info!(invoice_number = %updated.invoice_number, "Recurrence cancelled");

        self.deps
            .record_audit(
                AuditEvent::new(
                    AuditAction::RecurrenceCancelled,
                    actor,
                    invoice_id,
                    updated.updated_utc,
                )
                .with_before(&previous),
            )
            .await;

        Ok(updated)
    }

    /// Invoice with lines, taxes, payments and reminders.
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<InvoiceDocument, BillingError> {
        let invoice = self.load(invoice_id).await?;
        let store = &self.deps.store;

        let (items, taxes, transactions, reminders) = futures::try_join!(
            store.get_line_items(invoice_id),
            store.get_tax_lines(invoice_id),
            store.list_transactions(invoice_id),
            store.list_reminders(invoice_id),
        )?;

        Ok(InvoiceDocument {
            invoice,
            items,
            taxes,
            transactions,
            reminders,
        })
    }

    pub async fn list_invoices(
        &self,
        mut filter: ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, BillingError> {
        if let (Some(from), Some(to)) = (filter.issued_from, filter.issued_to) {
            if from >= to {
                return Err(BillingError::InvalidInput(
                    "issued_from must be before issued_to".to_string(),
                ));
            }
        }
        filter.page_size = filter.effective_page_size();
        self.deps.store.list_invoices(&filter).await
    }

    #[instrument(skip(self))]
    pub async fn render_invoice(&self, invoice_id: Uuid) -> Result<RenderedDocument, BillingError> {
        let document = self.get_invoice(invoice_id).await?;
        self.deps
            .renderer
            .render(&document)
            .map_err(BillingError::Storage)
    }
}

//! Entry point to the billing core used by the HTTP layer and the job loops.

use crate::error::BillingError;
use crate::models::{
    ApplyPayment, FinancialMetrics, Invoice, InvoiceDocument, InvoiceStatus, ListInvoicesFilter,
    PaymentReminder, RecurrenceType, ReminderMethod, ReportingPeriod, RunReport, Transaction,
};
use crate::services::context::BillingDeps;
use crate::services::lifecycle::{CreateInvoice, InvoiceManager};
use crate::services::payments::{PaymentApplicator, PaymentOutcome};
use crate::services::recurrence::RecurringScheduler;
use crate::services::reminders::ReminderEngine;
use crate::services::renderer::RenderedDocument;
use crate::services::reporting::FinancialMetricsAggregator;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub struct BillingService {
    deps: BillingDeps,
    invoices: InvoiceManager,
    payments: PaymentApplicator,
    recurring: RecurringScheduler,
    reminders: ReminderEngine,
    reporting: FinancialMetricsAggregator,
}

impl BillingService {
    pub fn new(deps: BillingDeps) -> Self {
        Self {
            invoices: InvoiceManager::new(deps.clone()),
            payments: PaymentApplicator::new(deps.clone()),
            recurring: RecurringScheduler::new(deps.clone()),
            reminders: ReminderEngine::new(deps.clone()),
            reporting: FinancialMetricsAggregator::new(deps.clone()),
            deps,
        }
    }

    pub async fn health_check(&self) -> Result<(), BillingError> {
        self.deps.store.health_check().await
    }

    pub async fn create_invoice(
        &self,
        input: CreateInvoice,
        actor: &str,
    ) -> Result<Invoice, BillingError> {
        self.invoices.create_invoice(input, actor).await
    }

    pub async fn generate_invoice_from_request(
        &self,
        request_id: Uuid,
        actor: &str,
    ) -> Result<Invoice, BillingError> {
        self.invoices.generate_from_request(request_id, actor).await
    }

    pub async fn transition_status(
        &self,
        invoice_id: Uuid,
        target: InvoiceStatus,
        actor: &str,
    ) -> Result<Invoice, BillingError> {
        self.invoices.transition_status(invoice_id, target, actor).await
    }

    pub async fn setup_recurrence(
        &self,
        invoice_id: Uuid,
        recurrence: RecurrenceType,
        end_date: DateTime<Utc>,
        actor: &str,
    ) -> Result<Invoice, BillingError> {
        self.invoices
            .setup_recurrence(invoice_id, recurrence, end_date, actor)
            .await
    }

    pub async fn cancel_recurrence(
        &self,
        invoice_id: Uuid,
        actor: &str,
    ) -> Result<Invoice, BillingError> {
        self.invoices.cancel_recurrence(invoice_id, actor).await
    }

    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<InvoiceDocument, BillingError> {
        self.invoices.get_invoice(invoice_id).await
    }

    pub async fn list_invoices(
        &self,
        filter: ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, BillingError> {
        self.invoices.list_invoices(filter).await
    }

    pub async fn render_invoice(&self, invoice_id: Uuid) -> Result<RenderedDocument, BillingError> {
        self.invoices.render_invoice(invoice_id).await
    }

    pub async fn apply_payment(
        &self,
        payment: ApplyPayment,
        actor: &str,
    ) -> Result<PaymentOutcome, BillingError> {
        self.payments.apply_payment(payment, actor).await
    }

    pub async fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction, BillingError> {
        self.payments.get_transaction(transaction_id).await
    }

    pub async fn send_reminder(
        &self,
        invoice_id: Uuid,
        method: Option<ReminderMethod>,
        actor: &str,
    ) -> Result<PaymentReminder, BillingError> {
        self.reminders.send_reminder(invoice_id, method, actor).await
    }

    pub async fn list_reminders(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<PaymentReminder>, BillingError> {
        self.reminders.list_reminders(invoice_id).await
    }

    pub async fn update_overdue_invoices(&self) -> Result<u64, BillingError> {
        self.reminders.update_overdue_invoices().await
    }

    pub async fn get_financial_metrics(
        &self,
        period: ReportingPeriod,
    ) -> Result<FinancialMetrics, BillingError> {
        self.reporting.financial_metrics(period).await
    }

    /// Timer entry point: generate due recurring successors.
    pub async fn run_recurring_invoice_generation(&self) -> Result<RunReport, BillingError> {
        self.recurring.run_recurring_generation().await
    }

    /// Timer entry point: escalate reminders, then flip overdue invoices.
    pub async fn run_reminder_sweep_and_overdue_update(&self) -> Result<RunReport, BillingError> {
        self.reminders.run_reminder_sweep_and_overdue_update().await
    }
}

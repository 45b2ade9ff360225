//! Persistence seam for billing records.
//!
//! Every method is one atomic unit. Invoice writes are optimistic: the
//! caller passes the invoice as last read, and the write only lands if the
//! stored `version` still matches, otherwise `ConcurrencyConflict`.

use crate::error::BillingError;
use crate::models::{
    Invoice, InvoiceLineItem, InvoiceTaxLine, ListInvoicesFilter, NewInvoice, NewReminder,
    NewTransaction, PaymentReminder, ReminderStatus, Transaction,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn health_check(&self) -> Result<(), BillingError>;

    /// Insert header, lines and tax lines under a freshly allocated number.
    /// `Conflict` when the service request is already invoiced.
    async fn create_invoice(&self, invoice: NewInvoice) -> Result<Invoice, BillingError>;

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, BillingError>;

    async fn find_invoice_by_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<Invoice>, BillingError>;

    async fn list_invoices(
        &self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, BillingError>;

    async fn get_line_items(&self, invoice_id: Uuid)
        -> Result<Vec<InvoiceLineItem>, BillingError>;

    async fn get_tax_lines(&self, invoice_id: Uuid) -> Result<Vec<InvoiceTaxLine>, BillingError>;

    /// Versioned write of the invoice's mutable state. Returns the stored row.
    async fn update_invoice(&self, invoice: &Invoice) -> Result<Invoice, BillingError>;

    /// Insert the transaction and, when given, the versioned invoice update
    /// in one unit. Neither lands without the other.
    async fn record_payment(
        &self,
        transaction: NewTransaction,
        invoice: Option<&Invoice>,
    ) -> Result<(Transaction, Option<Invoice>), BillingError>;

    async fn get_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, BillingError>;

    async fn list_transactions(&self, invoice_id: Uuid) -> Result<Vec<Transaction>, BillingError>;

    /// Insert `successor` and link it from `parent`. `Conflict` when the
    /// parent already has a successor. Returns `(parent, successor)`.
    async fn create_successor(
        &self,
        parent: &Invoice,
        successor: NewInvoice,
    ) -> Result<(Invoice, Invoice), BillingError>;

    /// Chain heads with an active recurrence policy, keyed after `after`.
    async fn recurrence_heads(
        &self,
        now: DateTime<Utc>,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Invoice>, BillingError>;

    /// Outstanding invoices past due with a positive balance, keyed after `after`.
    async fn reminder_candidates(
        &self,
        now: DateTime<Utc>,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Invoice>, BillingError>;

    async fn latest_reminder(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<PaymentReminder>, BillingError>;

    /// Insert the reminder unless another one for the same invoice was
    /// created after `not_after`. `None` when skipped.
    async fn insert_reminder(
        &self,
        reminder: NewReminder,
        not_after: Option<DateTime<Utc>>,
    ) -> Result<Option<PaymentReminder>, BillingError>;

    /// Record the delivery outcome of a claimed reminder.
    async fn set_reminder_status(
        &self,
        reminder_id: Uuid,
        status: ReminderStatus,
    ) -> Result<PaymentReminder, BillingError>;

    /// Newest first.
    async fn list_reminders(&self, invoice_id: Uuid)
        -> Result<Vec<PaymentReminder>, BillingError>;

    /// Flip SENT/PARTIAL_PAID invoices past due with a positive balance to
    /// OVERDUE. Returns the number of rows changed.
    async fn mark_overdue(&self, now: DateTime<Utc>) -> Result<u64, BillingError>;

    /// Invoices issued in `[start, end)`; `None` bounds are open.
    async fn invoices_issued_between(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Invoice>, BillingError>;

    /// SENT, PARTIAL_PAID and OVERDUE invoices with a positive balance.
    async fn outstanding_invoices(&self) -> Result<Vec<Invoice>, BillingError>;
}

//! In-process `BillingStore`.
//!
//! All state sits behind one lock, so every store method is trivially one
//! atomic unit. Used for tests and single-node demos.

use crate::error::BillingError;
use crate::models::{
    Invoice, InvoiceLineItem, InvoiceStatus, InvoiceTaxLine, ListInvoicesFilter, NewInvoice,
    NewReminder, NewTransaction, PaymentReminder, ReminderStatus, Transaction,
};
use crate::services::numbering::{format_number, sequence_year, DocumentKind};
use crate::services::store::BillingStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    // Ordered by id so keyset pagination matches the Postgres store.
    invoices: BTreeMap<Uuid, Invoice>,
    line_items: HashMap<Uuid, Vec<InvoiceLineItem>>,
    tax_lines: HashMap<Uuid, Vec<InvoiceTaxLine>>,
    transactions: Vec<Transaction>,
    reminders: Vec<PaymentReminder>,
    sequences: HashMap<(DocumentKind, i32), i64>,
}

impl MemoryState {
    fn next_number(&mut self, kind: DocumentKind, at: DateTime<Utc>) -> String {
        let year = sequence_year(at);
        let seq = self.sequences.entry((kind, year)).or_insert(0);
        *seq += 1;
        format_number(kind, year, *seq)
    }

    fn insert_invoice(&mut self, new: NewInvoice) -> Result<Invoice, BillingError> {
        if let Some(request_id) = new.request_id {
            if self
                .invoices
                .values()
                .any(|inv| inv.request_id == Some(request_id))
            {
                return Err(BillingError::Conflict(format!(
                    "Request {} is already invoiced",
                    request_id
                )));
            }
        }

        let invoice_id = Uuid::new_v4();
        let number = self.next_number(DocumentKind::Invoice, new.issue_date);
        let invoice = new.into_invoice(invoice_id, number, new.issue_date);

        let items = new
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| item.into_line_item(invoice_id, i as i32))
            .collect();
        let taxes = new
            .taxes
            .iter()
            .map(|tax| tax.into_tax_line(invoice_id))
            .collect();

        self.line_items.insert(invoice_id, items);
        self.tax_lines.insert(invoice_id, taxes);
        self.invoices.insert(invoice_id, invoice.clone());

        Ok(invoice)
    }

    /// Versioned write; the caller's copy must match the stored version.
    fn write_invoice(&mut self, invoice: &Invoice) -> Result<Invoice, BillingError> {
        let stored = self
            .invoices
            .get_mut(&invoice.invoice_id)
            .ok_or_else(|| BillingError::not_found("Invoice", invoice.invoice_id))?;

        if stored.version != invoice.version {
            return Err(BillingError::ConcurrencyConflict(format!(
                "Invoice {} changed concurrently (expected version {}, found {})",
                invoice.invoice_number, invoice.version, stored.version
            )));
        }

        let mut next = invoice.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }
}

/// `BillingStore` backed by process memory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page<'a>(
    invoices: impl Iterator<Item = &'a Invoice>,
    after: Option<Uuid>,
    limit: i64,
) -> Vec<Invoice> {
    invoices
        .filter(|inv| after.map_or(true, |cursor| inv.invoice_id > cursor))
        .take(limit.max(0) as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl BillingStore for InMemoryStore {
    async fn health_check(&self) -> Result<(), BillingError> {
        Ok(())
    }

    async fn create_invoice(&self, invoice: NewInvoice) -> Result<Invoice, BillingError> {
        self.state.write().await.insert_invoice(invoice)
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, BillingError> {
        Ok(self.state.read().await.invoices.get(&invoice_id).cloned())
    }

    async fn find_invoice_by_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<Invoice>, BillingError> {
        let state = self.state.read().await;
        Ok(state
            .invoices
            .values()
            .find(|inv| inv.request_id == Some(request_id))
            .cloned())
    }

    async fn list_invoices(
        &self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, BillingError> {
        let state = self.state.read().await;
        let matching = state.invoices.values().filter(|inv| {
            filter.status.map_or(true, |s| inv.status == s)
                && filter.customer_id.map_or(true, |c| inv.customer_id == c)
                && filter.issued_from.map_or(true, |from| inv.issue_date >= from)
                && filter.issued_to.map_or(true, |to| inv.issue_date < to)
        });
        Ok(page(
            matching,
            filter.page_token,
            filter.page_size.clamp(1, 100) as i64,
        ))
    }

    async fn get_line_items(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceLineItem>, BillingError> {
        let state = self.state.read().await;
        Ok(state.line_items.get(&invoice_id).cloned().unwrap_or_default())
    }

    async fn get_tax_lines(&self, invoice_id: Uuid) -> Result<Vec<InvoiceTaxLine>, BillingError> {
        let state = self.state.read().await;
        Ok(state.tax_lines.get(&invoice_id).cloned().unwrap_or_default())
    }

    async fn update_invoice(&self, invoice: &Invoice) -> Result<Invoice, BillingError> {
        self.state.write().await.write_invoice(invoice)
    }

    async fn record_payment(
        &self,
        transaction: NewTransaction,
        invoice: Option<&Invoice>,
    ) -> Result<(Transaction, Option<Invoice>), BillingError> {
        let mut state = self.state.write().await;

        // Invoice first: a lost race must not leave a numbered transaction behind.
        let updated = match invoice {
            Some(invoice) => Some(state.write_invoice(invoice)?),
            None => None,
        };

        let number = state.next_number(DocumentKind::Transaction, transaction.created_utc);
        let recorded = transaction.into_transaction(Uuid::new_v4(), number);
        state.transactions.push(recorded.clone());

        Ok((recorded, updated))
    }

    async fn get_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, BillingError> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .find(|t| t.transaction_id == transaction_id)
            .cloned())
    }

    async fn list_transactions(&self, invoice_id: Uuid) -> Result<Vec<Transaction>, BillingError> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.invoice_id == Some(invoice_id))
            .cloned()
            .collect())
    }

    async fn create_successor(
        &self,
        parent: &Invoice,
        successor: NewInvoice,
    ) -> Result<(Invoice, Invoice), BillingError> {
        let mut state = self.state.write().await;

        let stored = state
            .invoices
            .get(&parent.invoice_id)
            .ok_or_else(|| BillingError::not_found("Invoice", parent.invoice_id))?;
        if let Some(existing) = stored.successor_invoice_id {
            return Err(BillingError::Conflict(format!(
                "Invoice {} already has successor {}",
                stored.invoice_number, existing
            )));
        }
        if stored.version != parent.version {
            return Err(BillingError::ConcurrencyConflict(format!(
                "Invoice {} changed concurrently",
                parent.invoice_number
            )));
        }

        let created = state.insert_invoice(successor)?;

        let mut linked = parent.clone();
        linked.successor_invoice_id = Some(created.invoice_id);
        linked.last_generated_at = Some(created.issue_date);
        linked.updated_utc = created.issue_date;
        let linked = state.write_invoice(&linked)?;

        Ok((linked, created))
    }

    async fn recurrence_heads(
        &self,
        now: DateTime<Utc>,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Invoice>, BillingError> {
        let state = self.state.read().await;
        let heads = state
            .invoices
            .values()
            .filter(|inv| inv.is_recurrence_head(now));
        Ok(page(heads, after, limit))
    }

    async fn reminder_candidates(
        &self,
        now: DateTime<Utc>,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Invoice>, BillingError> {
        let state = self.state.read().await;
        let due = state
            .invoices
            .values()
            .filter(|inv| inv.status.is_outstanding() && inv.is_past_due(now));
        Ok(page(due, after, limit))
    }

    async fn latest_reminder(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<PaymentReminder>, BillingError> {
        let state = self.state.read().await;
        Ok(state
            .reminders
            .iter()
            .filter(|r| r.invoice_id == invoice_id)
            .max_by_key(|r| r.created_utc)
            .cloned())
    }

    async fn insert_reminder(
        &self,
        reminder: NewReminder,
        not_after: Option<DateTime<Utc>>,
    ) -> Result<Option<PaymentReminder>, BillingError> {
        let mut state = self.state.write().await;

        if let Some(cutoff) = not_after {
            let recent = state
                .reminders
                .iter()
                .any(|r| r.invoice_id == reminder.invoice_id && r.created_utc > cutoff);
            if recent {
                return Ok(None);
            }
        }

        let stored = reminder.into_reminder(Uuid::new_v4());
        state.reminders.push(stored.clone());
        Ok(Some(stored))
    }

    async fn set_reminder_status(
        &self,
        reminder_id: Uuid,
        status: ReminderStatus,
    ) -> Result<PaymentReminder, BillingError> {
        let mut state = self.state.write().await;
        let reminder = state
            .reminders
            .iter_mut()
            .find(|r| r.reminder_id == reminder_id)
            .ok_or_else(|| BillingError::not_found("Reminder", reminder_id))?;
        reminder.status = status;
        Ok(reminder.clone())
    }

    async fn list_reminders(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<PaymentReminder>, BillingError> {
        let state = self.state.read().await;
        let mut reminders: Vec<PaymentReminder> = state
            .reminders
            .iter()
            .filter(|r| r.invoice_id == invoice_id)
            .cloned()
            .collect();
        reminders.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(reminders)
    }

    async fn mark_overdue(&self, now: DateTime<Utc>) -> Result<u64, BillingError> {
        let mut state = self.state.write().await;
        let mut updated = 0;

        for invoice in state.invoices.values_mut() {
            let flips = matches!(
                invoice.status,
                InvoiceStatus::Sent | InvoiceStatus::PartialPaid
            ) && invoice.is_past_due(now);

            if flips {
                invoice.status = InvoiceStatus::Overdue;
                invoice.version += 1;
                invoice.updated_utc = now;
                updated += 1;
            }
        }

        Ok(updated)
    }

    async fn invoices_issued_between(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Invoice>, BillingError> {
        let state = self.state.read().await;
        Ok(state
            .invoices
            .values()
            .filter(|inv| {
                start.map_or(true, |s| inv.issue_date >= s)
                    && end.map_or(true, |e| inv.issue_date < e)
            })
            .cloned()
            .collect())
    }

    async fn outstanding_invoices(&self) -> Result<Vec<Invoice>, BillingError> {
        let state = self.state.read().await;
        Ok(state
            .invoices
            .values()
            .filter(|inv| inv.status.is_outstanding() && inv.balance_amount > Decimal::ZERO)
            .cloned()
            .collect())
    }
}

//! Invoice model for lab-billing-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::line_item::{InvoiceLineItem, InvoiceTaxLine, NewLineItem, NewTaxLine};
use super::reminder::PaymentReminder;
use super::transaction::Transaction;

/// Invoice type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceType {
    Standard,
    Proforma,
    CreditNote,
    DebitNote,
    Receipt,
}

impl From<String> for InvoiceType {
    fn from(s: String) -> Self {
        Self::from_string(&s)
    }
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Standard => "STANDARD",
            InvoiceType::Proforma => "PROFORMA",
            InvoiceType::CreditNote => "CREDIT_NOTE",
            InvoiceType::DebitNote => "DEBIT_NOTE",
            InvoiceType::Receipt => "RECEIPT",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "PROFORMA" => InvoiceType::Proforma,
            "CREDIT_NOTE" => InvoiceType::CreditNote,
            "DEBIT_NOTE" => InvoiceType::DebitNote,
            "RECEIPT" => InvoiceType::Receipt,
            _ => InvoiceType::Standard,
        }
    }
}

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    PartialPaid,
    Paid,
    Overdue,
    Cancelled,
    Refunded,
}

impl From<String> for InvoiceStatus {
    fn from(s: String) -> Self {
        Self::from_string(&s)
    }
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::PartialPaid => "PARTIAL_PAID",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Overdue => "OVERDUE",
            InvoiceStatus::Cancelled => "CANCELLED",
            InvoiceStatus::Refunded => "REFUNDED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "SENT" => InvoiceStatus::Sent,
            "PARTIAL_PAID" => InvoiceStatus::PartialPaid,
            "PAID" => InvoiceStatus::Paid,
            "OVERDUE" => InvoiceStatus::Overdue,
            "CANCELLED" => InvoiceStatus::Cancelled,
            "REFUNDED" => InvoiceStatus::Refunded,
            _ => InvoiceStatus::Draft,
        }
    }

    /// Statuses that carry a receivable balance.
    pub const OUTSTANDING: [InvoiceStatus; 3] = [
        InvoiceStatus::Sent,
        InvoiceStatus::PartialPaid,
        InvoiceStatus::Overdue,
    ];

    pub fn accepts_payment(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Draft
                | InvoiceStatus::Sent
                | InvoiceStatus::PartialPaid
                | InvoiceStatus::Overdue
        )
    }

    pub fn is_outstanding(&self) -> bool {
        Self::OUTSTANDING.contains(self)
    }

    /// Legal edges of the invoice state machine.
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (*self, next),
            (Draft, Sent)
                | (Draft, PartialPaid)
                | (Draft, Paid)
                | (Draft, Cancelled)
                | (Sent, PartialPaid)
                | (Sent, Paid)
                | (Sent, Overdue)
                | (Sent, Cancelled)
                | (PartialPaid, Paid)
                | (PartialPaid, Overdue)
                | (PartialPaid, Refunded)
                | (Overdue, PartialPaid)
                | (Overdue, Paid)
                | (Overdue, Cancelled)
                | (Overdue, Refunded)
                | (Paid, Refunded)
        )
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recurrence cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceType {
    None,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl From<String> for RecurrenceType {
    fn from(s: String) -> Self {
        Self::from_string(&s)
    }
}

impl RecurrenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceType::None => "NONE",
            RecurrenceType::Daily => "DAILY",
            RecurrenceType::Weekly => "WEEKLY",
            RecurrenceType::Monthly => "MONTHLY",
            RecurrenceType::Quarterly => "QUARTERLY",
            RecurrenceType::Yearly => "YEARLY",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "DAILY" => RecurrenceType::Daily,
            "WEEKLY" => RecurrenceType::Weekly,
            "MONTHLY" => RecurrenceType::Monthly,
            "QUARTERLY" => RecurrenceType::Quarterly,
            "YEARLY" => RecurrenceType::Yearly,
            _ => RecurrenceType::None,
        }
    }
}

/// Invoice header with its totals, payment state and recurrence policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    #[sqlx(try_from = "String")]
    pub invoice_type: InvoiceType,
    #[sqlx(try_from = "String")]
    pub status: InvoiceStatus,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub customer_address: Option<String>,
    pub customer_tax_id: Option<String>,
    pub patient_id: Option<Uuid>,
    pub patient_name: Option<String>,
    pub request_id: Option<Uuid>,
    pub subtotal: Decimal,
    pub discount_percent: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub stamp_tax_amount: Decimal,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub balance_amount: Decimal,
    pub currency: String,
    pub exchange_rate: Decimal,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub paid_date: Option<DateTime<Utc>>,
    #[sqlx(try_from = "String")]
    pub recurrence_type: RecurrenceType,
    pub recurrence_end: Option<DateTime<Utc>>,
    /// Generation cursor, written by recurrence setup and the scheduler only.
    pub last_generated_at: Option<DateTime<Utc>>,
    pub parent_invoice_id: Option<Uuid>,
    pub successor_invoice_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub version: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Effect of one payment on an invoice's paid/balance state.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEffect {
    pub paid_amount: Decimal,
    pub balance_amount: Decimal,
    pub status: InvoiceStatus,
    pub paid_date: Option<DateTime<Utc>>,
}

impl PaymentEffect {
    /// Amount received beyond the invoice total.
    pub fn overpayment(&self) -> Option<Decimal> {
        (self.balance_amount < Decimal::ZERO).then(|| -self.balance_amount)
    }
}

impl Invoice {
    pub fn taxable_amount(&self) -> Decimal {
        self.subtotal - self.discount_amount
    }

    /// Amount expressed in the base currency.
    pub fn to_base(&self, amount: Decimal) -> Decimal {
        amount * self.exchange_rate
    }

    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        self.due_date < now && self.balance_amount > Decimal::ZERO
    }

    /// `subtotal - discount + taxes == total` and `total - paid == balance`.
    pub fn amounts_consistent(&self) -> bool {
        self.taxable_amount() + self.tax_amount + self.stamp_tax_amount == self.total_amount
            && self.total_amount - self.paid_amount == self.balance_amount
    }

    /// Compute the paid/balance/status outcome of applying `amount`.
    pub fn payment_effect(&self, amount: Decimal, now: DateTime<Utc>) -> PaymentEffect {
        let paid_amount = self.paid_amount + amount;
        let balance_amount = self.total_amount - paid_amount;

        let (status, paid_date) = if balance_amount <= Decimal::ZERO {
            (InvoiceStatus::Paid, Some(now))
        } else if paid_amount > Decimal::ZERO {
            (InvoiceStatus::PartialPaid, self.paid_date)
        } else {
            (self.status, self.paid_date)
        };

        PaymentEffect {
            paid_amount,
            balance_amount,
            status,
            paid_date,
        }
    }

    pub fn apply_payment_effect(&mut self, effect: &PaymentEffect) {
        self.paid_amount = effect.paid_amount;
        self.balance_amount = effect.balance_amount;
        self.status = effect.status;
        self.paid_date = effect.paid_date;
    }

    /// Whether this invoice currently drives its recurrence chain.
    pub fn is_recurrence_head(&self, now: DateTime<Utc>) -> bool {
        self.recurrence_type != RecurrenceType::None
            && self.recurrence_end.is_some_and(|end| end >= now)
            && self.status != InvoiceStatus::Cancelled
            && self.successor_invoice_id.is_none()
    }
}

/// Invoice with every record attached to it.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDocument {
    pub invoice: Invoice,
    pub items: Vec<InvoiceLineItem>,
    pub taxes: Vec<InvoiceTaxLine>,
    pub transactions: Vec<Transaction>,
    pub reminders: Vec<PaymentReminder>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub customer_id: Option<Uuid>,
    pub issued_from: Option<DateTime<Utc>>,
    pub issued_to: Option<DateTime<Utc>>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

impl ListInvoicesFilter {
    pub const DEFAULT_PAGE_SIZE: i32 = 20;
    pub const MAX_PAGE_SIZE: i32 = 100;

    /// Page size actually served: unset or non-positive means the default.
    pub fn effective_page_size(&self) -> i32 {
        if self.page_size <= 0 {
            Self::DEFAULT_PAGE_SIZE
        } else {
            self.page_size.min(Self::MAX_PAGE_SIZE)
        }
    }
}

/// Header fields for an invoice about to be persisted. The store assigns
/// the number and ids.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub invoice_type: InvoiceType,
    pub status: InvoiceStatus,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub customer_address: Option<String>,
    pub customer_tax_id: Option<String>,
    pub patient_id: Option<Uuid>,
    pub patient_name: Option<String>,
    pub request_id: Option<Uuid>,
    pub subtotal: Decimal,
    pub discount_percent: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub stamp_tax_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub exchange_rate: Decimal,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub recurrence_type: RecurrenceType,
    pub recurrence_end: Option<DateTime<Utc>>,
    pub last_generated_at: Option<DateTime<Utc>>,
    pub parent_invoice_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub items: Vec<NewLineItem>,
    pub taxes: Vec<NewTaxLine>,
}

impl NewInvoice {
    /// Materialize the header with store-assigned identity.
    pub fn into_invoice(
        &self,
        invoice_id: Uuid,
        invoice_number: String,
        now: DateTime<Utc>,
    ) -> Invoice {
        Invoice {
            invoice_id,
            invoice_number,
            invoice_type: self.invoice_type,
            status: self.status,
            customer_id: self.customer_id,
            customer_name: self.customer_name.clone(),
            customer_address: self.customer_address.clone(),
            customer_tax_id: self.customer_tax_id.clone(),
            patient_id: self.patient_id,
            patient_name: self.patient_name.clone(),
            request_id: self.request_id,
            subtotal: self.subtotal,
            discount_percent: self.discount_percent,
            discount_amount: self.discount_amount,
            tax_amount: self.tax_amount,
            stamp_tax_amount: self.stamp_tax_amount,
            total_amount: self.total_amount,
            paid_amount: Decimal::ZERO,
            balance_amount: self.total_amount,
            currency: self.currency.clone(),
            exchange_rate: self.exchange_rate,
            issue_date: self.issue_date,
            due_date: self.due_date,
            paid_date: None,
            recurrence_type: self.recurrence_type,
            recurrence_end: self.recurrence_end,
            last_generated_at: self.last_generated_at,
            parent_invoice_id: self.parent_invoice_id,
            successor_invoice_id: None,
            notes: self.notes.clone(),
            created_by: self.created_by.clone(),
            version: 1,
            created_utc: now,
            updated_utc: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sent_invoice(total: Decimal) -> Invoice {
        let now = Utc::now();
        NewInvoice {
            invoice_type: InvoiceType::Standard,
            status: InvoiceStatus::Sent,
            customer_id: Uuid::new_v4(),
            customer_name: "Clinique Atlas".to_string(),
            customer_address: None,
            customer_tax_id: None,
            patient_id: None,
            patient_name: None,
            request_id: None,
            subtotal: total,
            discount_percent: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            stamp_tax_amount: Decimal::ZERO,
            total_amount: total,
            currency: "MAD".to_string(),
            exchange_rate: Decimal::ONE,
            issue_date: now,
            due_date: now,
            recurrence_type: RecurrenceType::None,
            recurrence_end: None,
            last_generated_at: None,
            parent_invoice_id: None,
            notes: None,
            created_by: None,
            items: vec![],
            taxes: vec![],
        }
        .into_invoice(Uuid::new_v4(), "INV-2026-000001".to_string(), now)
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            InvoiceStatus::Draft,
            InvoiceStatus::Sent,
            InvoiceStatus::PartialPaid,
            InvoiceStatus::Paid,
            InvoiceStatus::Overdue,
            InvoiceStatus::Cancelled,
            InvoiceStatus::Refunded,
        ] {
            assert_eq!(InvoiceStatus::from_string(status.as_str()), status);
        }
    }

    #[test]
    fn terminal_states_have_no_way_back() {
        use InvoiceStatus::*;
        let all = [Draft, Sent, PartialPaid, Paid, Overdue, Cancelled, Refunded];
        for next in all {
            assert!(!Cancelled.can_transition_to(next));
            assert!(!Refunded.can_transition_to(next));
        }
        assert!(!Paid.can_transition_to(Sent));
        assert!(!Paid.can_transition_to(PartialPaid));
        assert!(Paid.can_transition_to(Refunded));
    }

    #[test]
    fn overdue_can_still_be_paid() {
        assert!(InvoiceStatus::Overdue.can_transition_to(InvoiceStatus::PartialPaid));
        assert!(InvoiceStatus::Overdue.can_transition_to(InvoiceStatus::Paid));
        assert!(InvoiceStatus::Overdue.accepts_payment());
    }

    #[test]
    fn partial_payment_effect() {
        let invoice = sent_invoice(dec!(300.00));
        let effect = invoice.payment_effect(dec!(100.00), Utc::now());

        assert_eq!(effect.paid_amount, dec!(100.00));
        assert_eq!(effect.balance_amount, dec!(200.00));
        assert_eq!(effect.status, InvoiceStatus::PartialPaid);
        assert!(effect.paid_date.is_none());
        assert!(effect.overpayment().is_none());
    }

    #[test]
    fn exact_payment_marks_paid_with_date() {
        let invoice = sent_invoice(dec!(300.00));
        let now = Utc::now();
        let effect = invoice.payment_effect(dec!(300.00), now);

        assert_eq!(effect.balance_amount, dec!(0.00));
        assert_eq!(effect.status, InvoiceStatus::Paid);
        assert_eq!(effect.paid_date, Some(now));
    }

    #[test]
    fn overpayment_is_reported() {
        let invoice = sent_invoice(dec!(300.00));
        let effect = invoice.payment_effect(dec!(350.00), Utc::now());

        assert_eq!(effect.status, InvoiceStatus::Paid);
        assert_eq!(effect.overpayment(), Some(dec!(50.00)));
    }

    #[test]
    fn fresh_invoice_is_consistent() {
        let invoice = sent_invoice(dec!(120.50));
        assert!(invoice.amounts_consistent());
        assert_eq!(invoice.balance_amount, dec!(120.50));
    }
}

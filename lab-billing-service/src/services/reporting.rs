//! Financial rollups for reporting. Read-only.

use crate::error::BillingError;
use crate::models::{FinancialMetrics, Invoice, InvoiceStatus, ReportingPeriod};
use crate::services::context::BillingDeps;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::instrument;

/// Roll up `window` (invoices issued in the period) and `outstanding`
/// (receivables as of `now`). Amounts are converted to the base currency.
pub fn compute(
    window: &[Invoice],
    outstanding: &[Invoice],
    period: (Option<DateTime<Utc>>, Option<DateTime<Utc>>),
    now: DateTime<Utc>,
) -> FinancialMetrics {
    let total_revenue: Decimal = window.iter().map(|i| i.to_base(i.total_amount)).sum();
    let collected: Decimal = window.iter().map(|i| i.to_base(i.paid_amount)).sum();
    let total_paid: Decimal = window
        .iter()
        .filter(|i| i.status == InvoiceStatus::Paid)
        .map(|i| i.to_base(i.total_amount))
        .sum();

    // OVERDUE is outstanding too.
    let receivables = outstanding
        .iter()
        .filter(|i| i.status.is_outstanding() && i.balance_amount > Decimal::ZERO);
    let total_outstanding: Decimal = receivables.clone().map(|i| i.to_base(i.balance_amount)).sum();
    let total_overdue: Decimal = receivables
        .filter(|i| i.is_past_due(now))
        .map(|i| i.to_base(i.balance_amount))
        .sum();

    let invoice_count = window.len() as u64;
    let average_invoice_value = if invoice_count == 0 {
        Decimal::ZERO
    } else {
        total_revenue / Decimal::from(invoice_count)
    };
    let collection_rate = if total_revenue.is_zero() {
        Decimal::ZERO
    } else {
        (collected / total_revenue * dec!(100)).round_dp(2)
    };

    let overpaid: Vec<&Invoice> = window
        .iter()
        .filter(|i| i.balance_amount < Decimal::ZERO)
        .collect();

    FinancialMetrics {
        period_start: period.0,
        period_end: period.1,
        total_revenue,
        total_paid,
        total_outstanding,
        total_overdue,
        invoice_count,
        average_invoice_value,
        collection_rate,
        overpaid_invoice_count: overpaid.len() as u64,
        total_overpaid: overpaid.iter().map(|i| -i.to_base(i.balance_amount)).sum(),
    }
}

pub struct FinancialMetricsAggregator {
    deps: BillingDeps,
}

impl FinancialMetricsAggregator {
    pub fn new(deps: BillingDeps) -> Self {
        Self { deps }
    }

    #[instrument(skip(self))]
    pub async fn financial_metrics(
        &self,
        period: ReportingPeriod,
    ) -> Result<FinancialMetrics, BillingError> {
        let now = self.deps.now();
        let (start, end) = period.bounds(now);
        if let (Some(start), Some(end)) = (start, end) {
            if start >= end {
                return Err(BillingError::InvalidInput(format!(
                    "Reporting period start {} is not before end {}",
                    start, end
                )));
            }
        }

        let (window, outstanding) = futures::try_join!(
            self.deps.store.invoices_issued_between(start, end),
            self.deps.store.outstanding_invoices(),
        )?;

        Ok(compute(&window, &outstanding, (start, end), now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InvoiceType, NewInvoice, RecurrenceType};
    use chrono::Duration;
    use uuid::Uuid;

    fn invoice(total: Decimal, paid: Decimal, status: InvoiceStatus, due_in_days: i64) -> Invoice {
        let now = Utc::now();
        let mut invoice = NewInvoice {
            invoice_type: InvoiceType::Standard,
            status,
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
            due_date: now + Duration::days(due_in_days),
            recurrence_type: RecurrenceType::None,
            recurrence_end: None,
            last_generated_at: None,
            parent_invoice_id: None,
            notes: None,
            created_by: None,
            items: vec![],
            taxes: vec![],
        }
        .into_invoice(Uuid::new_v4(), "INV-2026-000001".to_string(), now);
        invoice.paid_amount = paid;
        invoice.balance_amount = total - paid;
        invoice
    }

    #[test]
    fn empty_window_has_zero_rates() {
        let metrics = compute(&[], &[], (None, None), Utc::now());
        assert_eq!(metrics.invoice_count, 0);
        assert_eq!(metrics.collection_rate, Decimal::ZERO);
        assert_eq!(metrics.average_invoice_value, Decimal::ZERO);
    }

    #[test]
    fn collection_rate_uses_paid_amounts() {
        let window = vec![
            invoice(dec!(300), dec!(300), InvoiceStatus::Paid, 30),
            invoice(dec!(300), dec!(100), InvoiceStatus::PartialPaid, 30),
            invoice(dec!(300), dec!(0), InvoiceStatus::Sent, 30),
        ];
        let metrics = compute(&window, &window, (None, None), Utc::now());

        assert_eq!(metrics.total_revenue, dec!(900));
        assert_eq!(metrics.total_paid, dec!(300));
        assert_eq!(metrics.total_outstanding, dec!(500));
        assert_eq!(metrics.average_invoice_value, dec!(300));
        assert_eq!(metrics.collection_rate, dec!(44.44));
    }

    #[test]
    fn overdue_is_past_due_outstanding() {
        let outstanding = vec![
            invoice(dec!(100), dec!(0), InvoiceStatus::Overdue, -10),
            invoice(dec!(50), dec!(0), InvoiceStatus::Sent, 10),
            invoice(dec!(70), dec!(0), InvoiceStatus::Draft, -10),
        ];
        let metrics = compute(&[], &outstanding, (None, None), Utc::now());

        assert_eq!(metrics.total_outstanding, dec!(150));
        assert_eq!(metrics.total_overdue, dec!(100));
    }

    #[test]
    fn overpayments_are_reported() {
        let window = vec![invoice(dec!(100), dec!(120), InvoiceStatus::Paid, 30)];
        let metrics = compute(&window, &[], (None, None), Utc::now());

        assert_eq!(metrics.overpaid_invoice_count, 1);
        assert_eq!(metrics.total_overpaid, dec!(20));
        assert_eq!(metrics.collection_rate, dec!(120));
    }

    #[test]
    fn amounts_are_converted_to_base_currency() {
        let mut foreign = invoice(dec!(100), dec!(0), InvoiceStatus::Sent, 30);
        foreign.exchange_rate = dec!(10.5);
        let metrics = compute(&[foreign], &[], (None, None), Utc::now());

        assert_eq!(metrics.total_revenue, dec!(1050));
    }
}

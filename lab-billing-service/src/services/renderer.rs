//! Invoice document rendering.
//!
//! Stored amounts keep full precision; rendering is where they are rounded
//! to two decimals for display.

use crate::models::{InvoiceDocument, InvoiceStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub content_type: &'static str,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

pub trait DocumentRenderer: Send + Sync {
    fn render(&self, document: &InvoiceDocument) -> Result<RenderedDocument>;
}

fn money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Serialize)]
struct PrintedLine<'a> {
    description: &'a str,
    quantity: Decimal,
    unit_price: Decimal,
    discount_percent: Decimal,
    line_total: Decimal,
}

#[derive(Serialize)]
struct PrintedTax<'a> {
    name: &'a str,
    taxable_amount: Decimal,
    amount: Decimal,
}

#[derive(Serialize)]
struct PrintedInvoice<'a> {
    invoice_number: &'a str,
    status: InvoiceStatus,
    bill_to: &'a str,
    bill_to_address: Option<&'a str>,
    bill_to_tax_id: Option<&'a str>,
    patient: Option<&'a str>,
    issue_date: DateTime<Utc>,
    due_date: DateTime<Utc>,
    currency: &'a str,
    lines: Vec<PrintedLine<'a>>,
    subtotal: Decimal,
    discount: Decimal,
    taxes: Vec<PrintedTax<'a>>,
    total: Decimal,
    paid: Decimal,
    balance: Decimal,
}

/// Renders a printable JSON document.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDocumentRenderer;

impl DocumentRenderer for JsonDocumentRenderer {
    fn render(&self, document: &InvoiceDocument) -> Result<RenderedDocument> {
        let invoice = &document.invoice;

        let printed = PrintedInvoice {
            invoice_number: &invoice.invoice_number,
            status: invoice.status,
            bill_to: &invoice.customer_name,
            bill_to_address: invoice.customer_address.as_deref(),
            bill_to_tax_id: invoice.customer_tax_id.as_deref(),
            patient: invoice.patient_name.as_deref(),
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            currency: &invoice.currency,
            lines: document
                .items
                .iter()
                .map(|item| PrintedLine {
                    description: &item.description,
                    quantity: item.quantity,
                    unit_price: money(item.unit_price),
                    discount_percent: item.discount_percent,
                    line_total: money(item.line_total),
                })
                .collect(),
            subtotal: money(invoice.subtotal),
            discount: money(invoice.discount_amount),
            taxes: document
                .taxes
                .iter()
                .map(|tax| PrintedTax {
                    name: &tax.tax_name,
                    taxable_amount: money(tax.taxable_amount),
                    amount: money(tax.tax_amount),
                })
                .collect(),
            total: money(invoice.total_amount),
            paid: money(invoice.paid_amount),
            balance: money(invoice.balance_amount),
        };

        let bytes = serde_json::to_vec_pretty(&printed)
            .map_err(|e| anyhow::anyhow!("Failed to render invoice: {}", e))?;

        Ok(RenderedDocument {
            content_type: "application/json",
            file_name: format!("{}.json", invoice.invoice_number),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(money(dec!(271.426)), dec!(271.43));
        assert_eq!(money(dec!(0.225)), dec!(0.23));
        assert_eq!(money(dec!(45.20)), dec!(45.20));
    }
}

//! Invoice totals: line totals, overall discount, VAT and stamp tax.
//!
//! Pure decimal arithmetic with no rounding; amounts keep full precision
//! until presentation.

use crate::config::BillingSettings;
use crate::error::BillingError;
use crate::models::{NewLineItem, NewTaxLine, TaxType};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const HUNDRED: Decimal = dec!(100);

/// Percent rates applied on the taxable amount.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaxRates {
    pub vat_percent: Decimal,
    pub stamp_tax_percent: Decimal,
}

impl From<&BillingSettings> for TaxRates {
    fn from(settings: &BillingSettings) -> Self {
        Self {
            vat_percent: settings.vat_percent,
            stamp_tax_percent: settings.stamp_tax_percent,
        }
    }
}

/// Item as submitted for invoicing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemInput {
    pub service_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount_percent: Decimal,
    pub tax_rate: Option<Decimal>,
}

/// Calculator output, ready to be attached to a new invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceTotals {
    pub items: Vec<NewLineItem>,
    pub taxes: Vec<NewTaxLine>,
    pub subtotal: Decimal,
    pub discount_percent: Decimal,
    pub discount_amount: Decimal,
    pub taxable_amount: Decimal,
    pub tax_amount: Decimal,
    pub stamp_tax_amount: Decimal,
    pub total_amount: Decimal,
}

fn valid_percent(value: Decimal) -> bool {
    value >= Decimal::ZERO && value <= HUNDRED
}

/// `quantity * unit_price * (1 - discount/100)`.
pub fn line_total(item: &LineItemInput) -> Decimal {
    item.quantity * item.unit_price * (Decimal::ONE - item.discount_percent / HUNDRED)
}

/// Compute invoice totals. Both tax lines are always emitted.
pub fn calculate(
    items: &[LineItemInput],
    discount_percent: Decimal,
    rates: &TaxRates,
) -> Result<InvoiceTotals, BillingError> {
    if items.is_empty() {
        return Err(BillingError::InvalidInput(
            "An invoice needs at least one line item".to_string(),
        ));
    }
    if !valid_percent(discount_percent) {
        return Err(BillingError::InvalidInput(format!(
            "Overall discount {}% is outside 0-100",
            discount_percent
        )));
    }
    if rates.vat_percent < Decimal::ZERO || rates.stamp_tax_percent < Decimal::ZERO {
        return Err(BillingError::InvalidInput(
            "Tax rates cannot be negative".to_string(),
        ));
    }

    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity < Decimal::ZERO || item.unit_price < Decimal::ZERO {
            return Err(BillingError::InvalidInput(format!(
                "Line '{}' has a negative quantity or price",
                item.description
            )));
        }
        if !valid_percent(item.discount_percent) {
            return Err(BillingError::InvalidInput(format!(
                "Line '{}' discount {}% is outside 0-100",
                item.description, item.discount_percent
            )));
        }

        lines.push(NewLineItem {
            service_id: item.service_id,
            description: item.description.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            discount_percent: item.discount_percent,
            tax_rate: item.tax_rate,
            line_total: line_total(item),
        });
    }

    let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();
    let discount_amount = subtotal * discount_percent / HUNDRED;
    let taxable_amount = subtotal - discount_amount;
    let tax_amount = taxable_amount * rates.vat_percent / HUNDRED;
    let stamp_tax_amount = taxable_amount * rates.stamp_tax_percent / HUNDRED;
    let total_amount = taxable_amount + tax_amount + stamp_tax_amount;

    let taxes = vec![
        NewTaxLine {
            tax_type: TaxType::Vat,
            tax_name: format!("VAT {}%", rates.vat_percent.normalize()),
            rate: rates.vat_percent,
            taxable_amount,
            tax_amount,
        },
        NewTaxLine {
            tax_type: TaxType::StampTax,
            tax_name: format!("Stamp tax {}%", rates.stamp_tax_percent.normalize()),
            rate: rates.stamp_tax_percent,
            taxable_amount,
            tax_amount: stamp_tax_amount,
        },
    ];

    Ok(InvoiceTotals {
        items: lines,
        taxes,
        subtotal,
        discount_percent,
        discount_amount,
        taxable_amount,
        tax_amount,
        stamp_tax_amount,
        total_amount,
    })
}

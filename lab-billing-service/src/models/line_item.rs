//! Line item and tax line models for lab-billing-service.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Billed service on an invoice. Frozen once the invoice leaves draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct InvoiceLineItem {
    pub line_item_id: Uuid,
    pub invoice_id: Uuid,
    /// Priced service (analysis) this line bills for.
    pub service_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    /// Informational rate carried from the catalog; invoice taxes are computed on the header.
    pub tax_rate: Option<Decimal>,
    pub line_total: Decimal,
    pub sort_order: i32,
}

/// Tax kind applied at invoice level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxType {
    Vat,
    StampTax,
}

impl From<String> for TaxType {
    fn from(s: String) -> Self {
        Self::from_string(&s)
    }
}

impl TaxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxType::Vat => "VAT",
            TaxType::StampTax => "STAMP_TAX",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "STAMP_TAX" => TaxType::StampTax,
            _ => TaxType::Vat,
        }
    }
}

/// Computed tax recorded against an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct InvoiceTaxLine {
    pub tax_line_id: Uuid,
    pub invoice_id: Uuid,
    #[sqlx(try_from = "String")]
    pub tax_type: TaxType,
    pub tax_name: String,
    /// Percentage, e.g. `20` for 20%.
    pub rate: Decimal,
    pub taxable_amount: Decimal,
    pub tax_amount: Decimal,
}

/// Line item before it is attached to a persisted invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLineItem {
    pub service_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    pub tax_rate: Option<Decimal>,
    pub line_total: Decimal,
}

impl NewLineItem {
    pub fn into_line_item(&self, invoice_id: Uuid, sort_order: i32) -> InvoiceLineItem {
        InvoiceLineItem {
            line_item_id: Uuid::new_v4(),
            invoice_id,
            service_id: self.service_id,
            description: self.description.clone(),
            quantity: self.quantity,
            unit_price: self.unit_price,
            discount_percent: self.discount_percent,
            tax_rate: self.tax_rate,
            line_total: self.line_total,
            sort_order,
        }
    }
}

impl From<&InvoiceLineItem> for NewLineItem {
    fn from(item: &InvoiceLineItem) -> Self {
        Self {
            service_id: item.service_id,
            description: item.description.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            discount_percent: item.discount_percent,
            tax_rate: item.tax_rate,
            line_total: item.line_total,
        }
    }
}

/// Tax line before it is attached to a persisted invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTaxLine {
    pub tax_type: TaxType,
    pub tax_name: String,
    pub rate: Decimal,
    pub taxable_amount: Decimal,
    pub tax_amount: Decimal,
}

impl NewTaxLine {
    pub fn into_tax_line(&self, invoice_id: Uuid) -> InvoiceTaxLine {
        InvoiceTaxLine {
            tax_line_id: Uuid::new_v4(),
            invoice_id,
            tax_type: self.tax_type,
            tax_name: self.tax_name.clone(),
            rate: self.rate,
            taxable_amount: self.taxable_amount,
            tax_amount: self.tax_amount,
        }
    }
}

impl From<&InvoiceTaxLine> for NewTaxLine {
    fn from(tax: &InvoiceTaxLine) -> Self {
        Self {
            tax_type: tax.tax_type,
            tax_name: tax.tax_name.clone(),
            rate: tax.rate,
            taxable_amount: tax.taxable_amount,
            tax_amount: tax.tax_amount,
        }
    }
}

//! Customer, patient and service request snapshots consumed by billing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Billing party classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomerType {
    Individual,
    Company,
    Insurance,
}

impl From<String> for CustomerType {
    fn from(s: String) -> Self {
        Self::from_string(&s)
    }
}

impl CustomerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerType::Individual => "INDIVIDUAL",
            CustomerType::Company => "COMPANY",
            CustomerType::Insurance => "INSURANCE",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "COMPANY" => CustomerType::Company,
            "INSURANCE" => CustomerType::Insurance,
            _ => CustomerType::Individual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub customer_id: Uuid,
    #[sqlx(try_from = "String")]
    pub customer_type: CustomerType,
    pub name: String,
    pub address: Option<String>,
    pub tax_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Days until due; falls back to the configured default when absent.
    pub payment_terms_days: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Patient {
    pub patient_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Analysis ordered on a request, with its catalog price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RequestedAnalysis {
    pub analysis_id: Uuid,
    pub name: String,
    pub price: Decimal,
    /// Price negotiated on the request, wins over the catalog price.
    pub override_price: Option<Decimal>,
    pub tax_rate: Option<Decimal>,
}

impl RequestedAnalysis {
    pub fn effective_price(&self) -> Decimal {
        self.override_price.unwrap_or(self.price)
    }
}

/// Service request (lab order) billed by `generate_from_request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub request_id: Uuid,
    pub patient_id: Uuid,
    pub items: Vec<RequestedAnalysis>,
}

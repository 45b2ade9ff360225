//! Payment transaction model for lab-billing-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Money movement kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Payment,
    Refund,
    Adjustment,
}

impl From<String> for TransactionType {
    fn from(s: String) -> Self {
        Self::from_string(&s)
    }
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Payment => "PAYMENT",
            TransactionType::Refund => "REFUND",
            TransactionType::Adjustment => "ADJUSTMENT",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "REFUND" => TransactionType::Refund,
            "ADJUSTMENT" => TransactionType::Adjustment,
            _ => TransactionType::Payment,
        }
    }
}

/// Transaction settlement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl From<String> for TransactionStatus {
    fn from(s: String) -> Self {
        Self::from_string(&s)
    }
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "PENDING" => TransactionStatus::Pending,
            "FAILED" => TransactionStatus::Failed,
            _ => TransactionStatus::Completed,
        }
    }
}

/// How the payer settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Card,
    Check,
    BankTransfer,
    Insurance,
    Other,
}

impl From<String> for PaymentMethod {
    fn from(s: String) -> Self {
        Self::from_string(&s)
    }
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Card => "CARD",
            PaymentMethod::Check => "CHECK",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::Insurance => "INSURANCE",
            PaymentMethod::Other => "OTHER",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "CASH" => PaymentMethod::Cash,
            "CARD" => PaymentMethod::Card,
            "CHECK" => PaymentMethod::Check,
            "BANK_TRANSFER" => PaymentMethod::BankTransfer,
            "INSURANCE" => PaymentMethod::Insurance,
            _ => PaymentMethod::Other,
        }
    }
}

/// Recorded payment. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub transaction_number: String,
    #[sqlx(try_from = "String")]
    pub transaction_type: TransactionType,
    #[sqlx(try_from = "String")]
    pub status: TransactionStatus,
    pub amount: Decimal,
    #[sqlx(try_from = "String")]
    pub payment_method: PaymentMethod,
    pub payment_reference: Option<String>,
    pub invoice_id: Option<Uuid>,
    pub customer_id: Uuid,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub processed_by: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Input for applying a payment.
#[derive(Debug, Clone)]
pub struct ApplyPayment {
    pub invoice_id: Option<Uuid>,
    /// Required when no invoice is linked; must match the invoice's customer otherwise.
    pub customer_id: Option<Uuid>,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_reference: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
}

/// Transaction before the store assigns its number.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_reference: Option<String>,
    pub invoice_id: Option<Uuid>,
    pub customer_id: Uuid,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub processed_by: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl NewTransaction {
    pub fn into_transaction(&self, transaction_id: Uuid, transaction_number: String) -> Transaction {
        Transaction {
            transaction_id,
            transaction_number,
            transaction_type: self.transaction_type,
            status: self.status,
            amount: self.amount,
            payment_method: self.payment_method,
            payment_reference: self.payment_reference.clone(),
            invoice_id: self.invoice_id,
            customer_id: self.customer_id,
            description: self.description.clone(),
            notes: self.notes.clone(),
            processed_by: self.processed_by.clone(),
            created_utc: self.created_utc,
        }
    }
}

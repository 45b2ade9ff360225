//! Domain errors for lab billing.
//!
//! Every component returns `BillingError`; the HTTP layer converts it into
//! `service_core::error::AppError`.

use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidInput(String),

    /// A versioned write lost to a concurrent writer.
    #[error("{0}")]
    ConcurrencyConflict(String),

    #[error("{0}")]
    UpstreamUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl BillingError {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        BillingError::NotFound(format!("{} {} not found", what, id))
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, BillingError::ConcurrencyConflict(_))
    }

    /// Label for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::NotFound(_) => "not_found",
            BillingError::Conflict(_) => "conflict",
            BillingError::InvalidInput(_) => "invalid_input",
            BillingError::ConcurrencyConflict(_) => "concurrency_conflict",
            BillingError::UpstreamUnavailable(_) => "upstream_unavailable",
            BillingError::Storage(_) => "storage",
        }
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            BillingError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            BillingError::InvalidInput(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            BillingError::ConcurrencyConflict(msg) => {
                AppError::ConcurrencyConflict(anyhow::anyhow!(msg), Some(1))
            }
            BillingError::UpstreamUnavailable(msg) => AppError::UpstreamUnavailable(msg),
            BillingError::Storage(e) => AppError::DatabaseError(e),
        }
    }
}

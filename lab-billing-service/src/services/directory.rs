//! Read access to the customer directory and the lab order source.
//!
//! Implementations report an unreachable backend as `UpstreamUnavailable`
//! so that callers fail closed instead of invoicing with partial data.

use crate::error::BillingError;
use crate::models::{Customer, Patient, ServiceRequest};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, BillingError>;

    async fn get_patient(&self, patient_id: Uuid) -> Result<Option<Patient>, BillingError>;

    /// INDIVIDUAL customer named after the patient, created on first use.
    async fn find_or_create_individual(&self, patient: &Patient)
        -> Result<Customer, BillingError>;
}

#[async_trait]
pub trait RequestSource: Send + Sync {
    async fn get_request(&self, request_id: Uuid)
        -> Result<Option<ServiceRequest>, BillingError>;
}

pub mod health;
pub mod invoices;
pub mod jobs;
pub mod reports;
pub mod transactions;

pub use health::{health_check, metrics_endpoint, readiness_check};

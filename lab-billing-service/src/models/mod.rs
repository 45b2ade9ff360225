//! Domain models for lab-billing-service.

mod customer;
mod invoice;
mod line_item;
mod reminder;
mod report;
mod run;
mod transaction;

pub use customer::{Customer, CustomerType, Patient, RequestedAnalysis, ServiceRequest};
pub use invoice::{
    Invoice, InvoiceDocument, InvoiceStatus, InvoiceType, ListInvoicesFilter, NewInvoice,
    PaymentEffect, RecurrenceType,
};
pub use line_item::{InvoiceLineItem, InvoiceTaxLine, NewLineItem, NewTaxLine, TaxType};
pub use reminder::{NewReminder, PaymentReminder, ReminderMethod, ReminderStatus};
pub use report::{FinancialMetrics, ReportingPeriod};
pub use run::{JobKind, RunItemResult, RunItemStatus, RunReport};
pub use transaction::{
    ApplyPayment, NewTransaction, PaymentMethod, Transaction, TransactionStatus, TransactionType,
};

pub mod audit;
pub mod billing;
pub mod calculator;
pub mod clock;
pub mod context;
pub mod database;
pub mod directory;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod notification;
pub mod numbering;
pub mod payments;
pub mod recurrence;
pub mod reminders;
pub mod renderer;
pub mod reporting;
pub mod store;

pub use audit::{AuditAction, AuditEvent, AuditSeverity, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use billing::BillingService;
pub use calculator::{calculate, InvoiceTotals, LineItemInput, TaxRates};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::BillingDeps;
pub use database::Database;
pub use directory::{CustomerDirectory, RequestSource};
pub use lifecycle::{BillTo, CreateInvoice, InvoiceManager};
pub use memory::InMemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use notification::{LogNotifier, NotificationDispatcher, ReminderNotice, WebhookNotifier};
pub use payments::{PaymentApplicator, PaymentOutcome};
pub use recurrence::{should_generate, RecurringScheduler};
pub use reminders::{next_reminder_level, ReminderEngine};
pub use renderer::{DocumentRenderer, JsonDocumentRenderer, RenderedDocument};
pub use reporting::FinancialMetricsAggregator;
pub use store::BillingStore;

//! Batch run reports for the scheduled jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scheduled job kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    RecurringInvoices,
    PaymentReminders,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::RecurringInvoices => "recurring_invoices",
            JobKind::PaymentReminders => "payment_reminders",
        }
    }
}

/// Outcome for one invoice in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunItemStatus {
    Success,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunItemResult {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub status: RunItemStatus,
    /// Successor invoice or reminder produced for this item.
    pub produced_id: Option<Uuid>,
    pub detail: Option<String>,
}

/// Summary of one scheduled run. Item failures never abort the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub job: JobKind,
    pub started_utc: DateTime<Utc>,
    pub completed_utc: Option<DateTime<Utc>>,
    pub processed: u32,
    pub succeeded: u32,
    pub skipped: u32,
    pub failed: u32,
    /// Invoices flipped to OVERDUE by the sweep that follows a reminder run.
    pub overdue_updated: u64,
    pub results: Vec<RunItemResult>,
}

impl RunReport {
    pub fn start(job: JobKind, now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            job,
            started_utc: now,
            completed_utc: None,
            processed: 0,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            overdue_updated: 0,
            results: Vec::new(),
        }
    }

    pub fn record(&mut self, result: RunItemResult) {
        self.processed += 1;
        match result.status {
            RunItemStatus::Success => self.succeeded += 1,
            RunItemStatus::Skipped => self.skipped += 1,
            RunItemStatus::Failed => self.failed += 1,
        }
        self.results.push(result);
    }

    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.completed_utc = Some(now);
    }
}

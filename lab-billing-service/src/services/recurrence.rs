//! Recurring invoice generation.
//!
//! Only the head of a recurrence chain (the invoice without a successor)
//! generates. The store links parent to successor with a compare-and-set on
//! the parent's empty successor slot, so a retried or concurrent run cannot
//! produce a second successor for the same period.

use crate::error::BillingError;
use crate::models::{
    Invoice, InvoiceStatus, JobKind, NewInvoice, NewLineItem, NewTaxLine, RecurrenceType,
    RunItemResult, RunItemStatus, RunReport,
};
use crate::services::audit::{AuditAction, AuditEvent};
use crate::services::context::BillingDeps;
use crate::services::metrics::{JOB_RUNS_TOTAL, RECURRING_INVOICES_TOTAL};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

const SCHEDULER_ACTOR: &str = "system:recurring-scheduler";

fn quarter(at: DateTime<Utc>) -> u32 {
    at.month0() / 3
}

/// Whether a chain whose last generation happened at `cursor` is due at `now`.
pub fn should_generate(
    recurrence: RecurrenceType,
    cursor: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    match recurrence {
        RecurrenceType::None => false,
        RecurrenceType::Daily => now - cursor >= Duration::hours(24),
        RecurrenceType::Weekly => now - cursor >= Duration::days(7),
        RecurrenceType::Monthly => (now.year(), now.month()) > (cursor.year(), cursor.month()),
        RecurrenceType::Quarterly => (now.year(), quarter(now)) > (cursor.year(), quarter(cursor)),
        RecurrenceType::Yearly => now.year() > cursor.year(),
    }
}

/// Generation cursor of a chain head.
pub fn generation_cursor(invoice: &Invoice) -> DateTime<Utc> {
    invoice.last_generated_at.unwrap_or(invoice.issue_date)
}

pub struct RecurringScheduler {
    deps: BillingDeps,
    run_lock: Mutex<()>,
}

impl RecurringScheduler {
    pub fn new(deps: BillingDeps) -> Self {
        Self {
            deps,
            run_lock: Mutex::new(()),
        }
    }

    /// Scan chain heads in pages and generate every successor that is due.
    #[instrument(skip(self))]
    pub async fn run_recurring_generation(&self) -> Result<RunReport, BillingError> {
        let _guard = self.run_lock.lock().await;
        let job = JobKind::RecurringInvoices;
        let now = self.deps.now();
        let mut report = RunReport::start(job, now);

        info!(run_id = %report.run_id, "Recurring invoice run started");

        let mut after = None;
        loop {
            let page = match self
                .deps
                .store
                .recurrence_heads(now, after, self.deps.settings.batch_size)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(run_id = %report.run_id, error = %e, "Recurring invoice run aborted");
                    JOB_RUNS_TOTAL
                        .with_label_values(&[job.as_str(), "failed"])
                        .inc();
                    return Err(e);
                }
            };
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.invoice_id);

            for invoice in &page {
                if !should_generate(invoice.recurrence_type, generation_cursor(invoice), now) {
                    debug!(invoice_number = %invoice.invoice_number, "Recurrence not due");
                    continue;
                }
                report.record(self.generate(invoice, now).await);
            }
        }

        report.finish(self.deps.now());
        JOB_RUNS_TOTAL
            .with_label_values(&[job.as_str(), "completed"])
            .inc();

        info!(
            run_id = %report.run_id,
            processed = report.processed,
            generated = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            "Recurring invoice run completed"
        );

        Ok(report)
    }

    async fn generate(&self, head: &Invoice, now: DateTime<Utc>) -> RunItemResult {
        let result = self
            .deps
            .with_lock_retry("generate_successor", || async {
                // Re-read so a retry sees the parent's latest version.
                let parent = self
                    .deps
                    .store
                    .get_invoice(head.invoice_id)
                    .await?
                    .ok_or_else(|| BillingError::not_found("Invoice", head.invoice_id))?;
                if !parent.is_recurrence_head(now)
                    || !should_generate(parent.recurrence_type, generation_cursor(&parent), now)
                {
                    return Ok(None);
                }

                let successor = self.successor_of(&parent, now).await?;
                let (_, created) = self.deps.store.create_successor(&parent, successor).await?;
                Ok(Some(created))
            })
            .await;

        let (status, produced_id, detail) = match result {
            Ok(Some(successor)) => {
                RECURRING_INVOICES_TOTAL
                    .with_label_values(&["generated"])
                    .inc();
                info!(
                    parent = %head.invoice_number,
                    successor = %successor.invoice_number,
                    "Recurring invoice generated"
                );
                self.deps
                    .record_audit(
                        AuditEvent::new(
                            AuditAction::RecurringInvoiceGenerated,
                            SCHEDULER_ACTOR,
                            successor.invoice_id,
                            now,
                        )
                        .with_after(&json!({
                            "invoice_number": successor.invoice_number,
                            "parent_invoice_id": head.invoice_id,
                            "total_amount": successor.total_amount,
                        })),
                    )
                    .await;
                (RunItemStatus::Success, Some(successor.invoice_id), None)
            }
            Ok(None) => {
                RECURRING_INVOICES_TOTAL
                    .with_label_values(&["skipped"])
                    .inc();
                (
                    RunItemStatus::Skipped,
                    None,
                    Some("no longer due".to_string()),
                )
            }
            Err(BillingError::Conflict(msg)) => {
                RECURRING_INVOICES_TOTAL
                    .with_label_values(&["skipped"])
                    .inc();
                (RunItemStatus::Skipped, None, Some(msg))
            }
            Err(e) => {
                RECURRING_INVOICES_TOTAL
                    .with_label_values(&["failed"])
                    .inc();
                error!(
                    invoice_number = %head.invoice_number,
                    error = %e,
                    "Recurring invoice generation failed"
                );
                (RunItemStatus::Failed, None, Some(e.to_string()))
            }
        };

        RunItemResult {
            invoice_id: head.invoice_id,
            invoice_number: head.invoice_number.clone(),
            status,
            produced_id,
            detail,
        }
    }

    /// Copy of `parent` as a fresh draft, lines and taxes verbatim.
    async fn successor_of(
        &self,
        parent: &Invoice,
        now: DateTime<Utc>,
    ) -> Result<NewInvoice, BillingError> {
        let (items, taxes) = futures::try_join!(
            self.deps.store.get_line_items(parent.invoice_id),
            self.deps.store.get_tax_lines(parent.invoice_id),
        )?;

        Ok(NewInvoice {
            invoice_type: parent.invoice_type,
            status: InvoiceStatus::Draft,
            customer_id: parent.customer_id,
            customer_name: parent.customer_name.clone(),
            customer_address: parent.customer_address.clone(),
            customer_tax_id: parent.customer_tax_id.clone(),
            patient_id: parent.patient_id,
            patient_name: parent.patient_name.clone(),
            request_id: None,
            subtotal: parent.subtotal,
            discount_percent: parent.discount_percent,
            discount_amount: parent.discount_amount,
            tax_amount: parent.tax_amount,
            stamp_tax_amount: parent.stamp_tax_amount,
            total_amount: parent.total_amount,
            currency: parent.currency.clone(),
            exchange_rate: parent.exchange_rate,
            issue_date: now,
            due_date: now + Duration::days(self.deps.settings.recurring_due_days),
            recurrence_type: parent.recurrence_type,
            recurrence_end: parent.recurrence_end,
            last_generated_at: Some(now),
            parent_invoice_id: Some(parent.invoice_id),
            notes: Some(format!("Recurring invoice from {}", parent.invoice_number)),
            created_by: Some(SCHEDULER_ACTOR.to_string()),
            items: items.iter().map(NewLineItem::from).collect(),
            taxes: taxes.iter().map(NewTaxLine::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn daily_needs_a_full_day() {
        let cursor = at(2026, 3, 1, 10);
        assert!(!should_generate(RecurrenceType::Daily, cursor, at(2026, 3, 2, 9)));
        assert!(should_generate(RecurrenceType::Daily, cursor, at(2026, 3, 2, 10)));
    }

    #[test]
    fn weekly_needs_seven_days() {
        let cursor = at(2026, 3, 1, 10);
        assert!(!should_generate(RecurrenceType::Weekly, cursor, at(2026, 3, 8, 9)));
        assert!(should_generate(RecurrenceType::Weekly, cursor, at(2026, 3, 8, 10)));
    }

    #[test]
    fn monthly_compares_calendar_months() {
        let cursor = at(2026, 1, 31, 23);
        assert!(!should_generate(RecurrenceType::Monthly, cursor, at(2026, 1, 31, 23)));
        assert!(should_generate(RecurrenceType::Monthly, cursor, at(2026, 2, 1, 0)));
        assert!(should_generate(RecurrenceType::Monthly, at(2025, 12, 15, 0), at(2026, 1, 2, 0)));
    }

    #[test]
    fn quarterly_compares_calendar_quarters() {
        let cursor = at(2026, 1, 5, 0);
        assert!(!should_generate(RecurrenceType::Quarterly, cursor, at(2026, 3, 31, 0)));
        assert!(should_generate(RecurrenceType::Quarterly, cursor, at(2026, 4, 1, 0)));
    }

    #[test]
    fn yearly_compares_calendar_years() {
        let cursor = at(2026, 6, 1, 0);
        assert!(!should_generate(RecurrenceType::Yearly, cursor, at(2026, 12, 31, 0)));
        assert!(should_generate(RecurrenceType::Yearly, cursor, at(2027, 1, 1, 0)));
    }

    #[test]
    fn calendar_rules_never_fire_backwards() {
        let cursor = at(2026, 5, 1, 0);
        assert!(!should_generate(RecurrenceType::Monthly, cursor, at(2026, 4, 1, 0)));
        assert!(!should_generate(RecurrenceType::None, cursor, at(2030, 1, 1, 0)));
    }
}

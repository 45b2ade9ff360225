//! Escalating payment reminders and the overdue sweep.

use crate::error::BillingError;
use crate::models::{
    Invoice, InvoiceStatus, JobKind, NewReminder, PaymentReminder, ReminderMethod,
    ReminderStatus, RunItemResult, RunItemStatus, RunReport,
};
use crate::services::audit::{AuditAction, AuditEvent, AuditSeverity};
use crate::services::context::BillingDeps;
use crate::services::metrics::{JOB_RUNS_TOTAL, OVERDUE_FLIPPED_TOTAL, REMINDERS_TOTAL};
use crate::services::notification::ReminderNotice;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const SWEEP_ACTOR: &str = "system:reminder-sweep";

/// Level of the next reminder: one above the last, capped at `max_level`.
pub fn escalate(last_level: Option<i32>, max_level: i32) -> i32 {
    let max_level = max_level.max(1);
    last_level.map_or(1, |level| (level + 1).clamp(1, max_level))
}

/// Level of the reminder the sweep should send now, or `None` while the
/// last reminder is still inside its cooldown.
pub fn next_reminder_level(
    last: Option<&PaymentReminder>,
    now: DateTime<Utc>,
    cooldown: Duration,
    max_level: i32,
) -> Option<i32> {
    match last {
        Some(reminder) if now - reminder.created_utc < cooldown => None,
        _ => Some(escalate(last.map(|r| r.reminder_level), max_level)),
    }
}

pub struct ReminderEngine {
    deps: BillingDeps,
    run_lock: Mutex<()>,
}

impl ReminderEngine {
    pub fn new(deps: BillingDeps) -> Self {
        Self {
            deps,
            run_lock: Mutex::new(()),
        }
    }

    fn cooldown(&self) -> Duration {
        Duration::days(self.deps.settings.reminder_cooldown_days)
    }

    /// Reminder pass over every past-due invoice, then the overdue sweep.
    #[instrument(skip(self))]
    pub async fn run_reminder_sweep_and_overdue_update(&self) -> Result<RunReport, BillingError> {
        let _guard = self.run_lock.lock().await;
        let job = JobKind::PaymentReminders;
        let now = self.deps.now();
        let mut report = RunReport::start(job, now);

        info!(run_id = %report.run_id, "Reminder sweep started");

        let outcome = self.sweep(&mut report, now).await;
        let outcome = match outcome {
            Ok(()) => self.update_overdue_invoices().await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(flipped) => {
                report.overdue_updated = flipped;
                report.finish(self.deps.now());
                JOB_RUNS_TOTAL
                    .with_label_values(&[job.as_str(), "completed"])
                    .inc();
                info!(
                    run_id = %report.run_id,
                    processed = report.processed,
                    sent = report.succeeded,
                    skipped = report.skipped,
                    failed = report.failed,
                    overdue_updated = report.overdue_updated,
                    "Reminder sweep completed"
                );
                Ok(report)
            }
            Err(e) => {
                JOB_RUNS_TOTAL
                    .with_label_values(&[job.as_str(), "failed"])
                    .inc();
                error!(run_id = %report.run_id, error = %e, "Reminder sweep aborted");
                Err(e)
            }
        }
    }

    async fn sweep(&self, report: &mut RunReport, now: DateTime<Utc>) -> Result<(), BillingError> {
        let mut after: Option<Uuid> = None;
        loop {
            let page = self
                .deps
                .store
                .reminder_candidates(now, after, self.deps.settings.batch_size)
                .await?;
            let Some(last) = page.last() else {
                return Ok(());
            };
            after = Some(last.invoice_id);

            for invoice in &page {
                report.record(self.remind(invoice, now).await);
            }
        }
    }

    async fn remind(&self, invoice: &Invoice, now: DateTime<Utc>) -> RunItemResult {
        let mut result = RunItemResult {
            invoice_id: invoice.invoice_id,
            invoice_number: invoice.invoice_number.clone(),
            status: RunItemStatus::Success,
            produced_id: None,
            detail: None,
        };

        let last = match self.deps.store.latest_reminder(invoice.invoice_id).await {
            Ok(last) => last,
            Err(e) => {
                error!(invoice_number = %invoice.invoice_number, error = %e, "Reminder lookup failed");
                REMINDERS_TOTAL.with_label_values(&["none", "failed"]).inc();
                result.status = RunItemStatus::Failed;
                result.detail = Some(e.to_string());
                return result;
            }
        };

        let Some(level) = next_reminder_level(
            last.as_ref(),
            now,
            self.cooldown(),
            self.deps.settings.max_reminder_level,
        ) else {
            debug!(invoice_number = %invoice.invoice_number, "Reminder cooldown active");
            result.status = RunItemStatus::Skipped;
            result.detail = Some("cooldown".to_string());
            return result;
        };

        let issued = self
            .issue(
                invoice,
                level,
                self.deps.settings.reminder_method,
                SWEEP_ACTOR,
                Some(now - self.cooldown()),
            )
            .await;

        match issued {
            Ok(Some(reminder)) => {
                result.produced_id = Some(reminder.reminder_id);
                if reminder.status == ReminderStatus::Failed {
                    result.detail = Some("delivery failed".to_string());
                }
            }
            Ok(None) => {
                result.status = RunItemStatus::Skipped;
                result.detail = Some("reminder issued concurrently".to_string());
            }
            Err(e) => {
                error!(invoice_number = %invoice.invoice_number, error = %e, "Reminder failed");
                REMINDERS_TOTAL
                    .with_label_values(&[level.to_string().as_str(), "failed"])
                    .inc();
                result.status = RunItemStatus::Failed;
                result.detail = Some(e.to_string());
            }
        }

        result
    }

    /// Claim the reminder under the cooldown guard, then dispatch it. Only a
    /// claimed reminder reaches the customer.
    async fn issue(
        &self,
        invoice: &Invoice,
        level: i32,
        method: ReminderMethod,
        actor: &str,
        not_after: Option<DateTime<Utc>>,
    ) -> Result<Option<PaymentReminder>, BillingError> {
        let now = self.deps.now();
        let reminder = NewReminder {
            invoice_id: invoice.invoice_id,
            reminder_level: level,
            due_date: invoice.due_date,
            amount: invoice.balance_amount,
            method,
            status: ReminderStatus::Sent,
            sent_by: Some(actor.to_string()),
            created_utc: now,
        };

        let Some(mut stored) = self.deps.store.insert_reminder(reminder, not_after).await? else {
            return Ok(None);
        };

        let notice = ReminderNotice::for_invoice(invoice, level, method);
        if let Err(e) = self.deps.notifier.dispatch(&notice).await {
            warn!(
                invoice_number = %invoice.invoice_number,
                reminder_level = level,
                error = %e,
                "Reminder delivery failed"
            );
            match self
                .deps
                .store
                .set_reminder_status(stored.reminder_id, ReminderStatus::Failed)
                .await
            {
                Ok(updated) => stored = updated,
                Err(e) => {
                    error!(
                        reminder_id = %stored.reminder_id,
                        error = %e,
                        "Failed to record reminder delivery failure"
                    );
                    stored.status = ReminderStatus::Failed;
                }
            }
        }

        let outcome = match stored.status {
            ReminderStatus::Sent => "sent",
            ReminderStatus::Failed => "delivery_failed",
        };
        REMINDERS_TOTAL
            .with_label_values(&[level.to_string().as_str(), outcome])
            .inc();

        info!(
            invoice_number = %invoice.invoice_number,
            reminder_level = level,
            status = stored.status.as_str(),
            "Payment reminder issued"
        );

        let severity = if level >= self.deps.settings.max_reminder_level {
            AuditSeverity::Warning
        } else {
            AuditSeverity::Info
        };
        self.deps
            .record_audit(
                AuditEvent::new(AuditAction::ReminderIssued, actor, stored.reminder_id, now)
                    .with_severity(severity)
                    .with_after(&json!({
                        "invoice_number": invoice.invoice_number,
                        "reminder_level": level,
                        "amount": stored.amount,
                        "status": stored.status,
                    })),
            )
            .await;

        Ok(Some(stored))
    }

    /// Send a reminder now, regardless of cooldown.
    #[instrument(skip(self))]
    pub async fn send_reminder(
        &self,
        invoice_id: Uuid,
        method: Option<ReminderMethod>,
        actor: &str,
    ) -> Result<PaymentReminder, BillingError> {
        let invoice = self
            .deps
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))?;

        if matches!(
            invoice.status,
            InvoiceStatus::Paid | InvoiceStatus::Cancelled | InvoiceStatus::Refunded
        ) {
            return Err(BillingError::Conflict(format!(
                "Invoice {} is {}; nothing to remind",
                invoice.invoice_number, invoice.status
            )));
        }

        let last = self.deps.store.latest_reminder(invoice_id).await?;
        let level = escalate(
            last.map(|r| r.reminder_level),
            self.deps.settings.max_reminder_level,
        );
        let method = method.unwrap_or(self.deps.settings.reminder_method);

        self.issue(&invoice, level, method, actor, None)
            .await?
            .ok_or_else(|| {
                BillingError::Conflict(format!(
                    "Reminder for invoice {} was not recorded",
                    invoice.invoice_number
                ))
            })
    }

    /// Newest first.
    pub async fn list_reminders(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<PaymentReminder>, BillingError> {
        if self.deps.store.get_invoice(invoice_id).await?.is_none() {
            return Err(BillingError::not_found("Invoice", invoice_id));
        }
        self.deps.store.list_reminders(invoice_id).await
    }

    /// Flip past-due SENT/PARTIAL_PAID invoices to OVERDUE. Idempotent.
    #[instrument(skip(self))]
    pub async fn update_overdue_invoices(&self) -> Result<u64, BillingError> {
        let flipped = self.deps.store.mark_overdue(self.deps.now()).await?;
        OVERDUE_FLIPPED_TOTAL.inc_by(flipped);
        if flipped > 0 {
            info!(count = flipped, "Invoices marked overdue");
        }
        Ok(flipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn reminder(level: i32, created_utc: DateTime<Utc>) -> PaymentReminder {
        PaymentReminder {
            reminder_id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            reminder_level: level,
            due_date: created_utc,
            amount: dec!(100),
            method: ReminderMethod::Email,
            status: ReminderStatus::Sent,
            sent_by: None,
            created_utc,
        }
    }

    #[test]
    fn first_reminder_is_level_one() {
        assert_eq!(next_reminder_level(None, Utc::now(), Duration::days(7), 3), Some(1));
    }

    #[test]
    fn cooldown_blocks_until_seven_days() {
        let now = Utc::now();
        let last = reminder(1, now - Duration::days(6));
        assert_eq!(next_reminder_level(Some(&last), now, Duration::days(7), 3), None);

        let last = reminder(1, now - Duration::days(7));
        assert_eq!(next_reminder_level(Some(&last), now, Duration::days(7), 3), Some(2));
    }

    #[test]
    fn level_is_capped() {
        let now = Utc::now();
        let last = reminder(3, now - Duration::days(30));
        assert_eq!(next_reminder_level(Some(&last), now, Duration::days(7), 3), Some(3));
        assert_eq!(escalate(Some(5), 3), 3);
        assert_eq!(escalate(Some(1), 0), 1);
    }
}

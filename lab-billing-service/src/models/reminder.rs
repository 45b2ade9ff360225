//! Payment reminder model for lab-billing-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Reminder delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReminderMethod {
    Email,
    Sms,
}

impl From<String> for ReminderMethod {
    fn from(s: String) -> Self {
        Self::from_string(&s)
    }
}

impl ReminderMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderMethod::Email => "EMAIL",
            ReminderMethod::Sms => "SMS",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "SMS" => ReminderMethod::Sms,
            _ => ReminderMethod::Email,
        }
    }
}

/// Outcome of handing the reminder to the notification collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReminderStatus {
    Sent,
    Failed,
}

impl From<String> for ReminderStatus {
    fn from(s: String) -> Self {
        Self::from_string(&s)
    }
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Sent => "SENT",
            ReminderStatus::Failed => "FAILED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "FAILED" => ReminderStatus::Failed,
            _ => ReminderStatus::Sent,
        }
    }
}

/// Reminder issued for an unpaid invoice. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PaymentReminder {
    pub reminder_id: Uuid,
    pub invoice_id: Uuid,
    /// Starts at 1, escalates by one per reminder up to the configured cap.
    pub reminder_level: i32,
    /// Invoice due date at the time of the reminder.
    pub due_date: DateTime<Utc>,
    /// Outstanding balance at the time of the reminder.
    pub amount: Decimal,
    #[sqlx(try_from = "String")]
    pub method: ReminderMethod,
    #[sqlx(try_from = "String")]
    pub status: ReminderStatus,
    pub sent_by: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Reminder before it is persisted.
#[derive(Debug, Clone)]
pub struct NewReminder {
    pub invoice_id: Uuid,
    pub reminder_level: i32,
    pub due_date: DateTime<Utc>,
    pub amount: Decimal,
    pub method: ReminderMethod,
    pub status: ReminderStatus,
    pub sent_by: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl NewReminder {
    pub fn into_reminder(&self, reminder_id: Uuid) -> PaymentReminder {
        PaymentReminder {
            reminder_id,
            invoice_id: self.invoice_id,
            reminder_level: self.reminder_level,
            due_date: self.due_date,
            amount: self.amount,
            method: self.method,
            status: self.status,
            sent_by: self.sent_by.clone(),
            created_utc: self.created_utc,
        }
    }
}

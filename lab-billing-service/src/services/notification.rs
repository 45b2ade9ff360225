//! Hand-off of payment reminders to the notification channel.

use crate::models::{Invoice, ReminderMethod};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Payload describing one reminder to deliver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReminderNotice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub reminder_level: i32,
    pub amount: Decimal,
    pub currency: String,
    pub due_date: DateTime<Utc>,
    pub method: ReminderMethod,
}

impl ReminderNotice {
    pub fn for_invoice(invoice: &Invoice, level: i32, method: ReminderMethod) -> Self {
        Self {
            invoice_id: invoice.invoice_id,
            invoice_number: invoice.invoice_number.clone(),
            customer_id: invoice.customer_id,
            customer_name: invoice.customer_name.clone(),
            reminder_level: level,
            amount: invoice.balance_amount,
            currency: invoice.currency.clone(),
            due_date: invoice.due_date,
            method,
        }
    }
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notice: &ReminderNotice) -> Result<()>;
}

/// Logs reminders without delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn dispatch(&self, notice: &ReminderNotice) -> Result<()> {
        tracing::info!(
            invoice_number = %notice.invoice_number,
            customer_id = %notice.customer_id,
            reminder_level = notice.reminder_level,
            amount = %notice.amount,
            method = notice.method.as_str(),
            "Payment reminder queued for delivery"
        );
        Ok(())
    }
}

/// POSTs reminders as JSON to the notification service.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build notification client: {}", e))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookNotifier {
    async fn dispatch(&self, notice: &ReminderNotice) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notice)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send reminder to {}: {}", self.url, e);
                anyhow::anyhow!("HTTP request failed: {}", e)
            })?;

        response
            .error_for_status()
            .map_err(|e| anyhow::anyhow!("Notification service rejected reminder: {}", e))?;

        Ok(())
    }
}

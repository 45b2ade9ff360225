//! Audit trail for financial mutations.
//!
//! Recording is best-effort: a failing sink is logged and never rolls back
//! the billing operation that produced the event.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    InvoiceCreated,
    InvoiceStatusChanged,
    PaymentApplied,
    RecurrenceConfigured,
    RecurrenceCancelled,
    RecurringInvoiceGenerated,
    ReminderIssued,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvoiceCreated => "invoice_created",
            Self::InvoiceStatusChanged => "invoice_status_changed",
            Self::PaymentApplied => "payment_applied",
            Self::RecurrenceConfigured => "recurrence_configured",
            Self::RecurrenceCancelled => "recurrence_cancelled",
            Self::RecurringInvoiceGenerated => "recurring_invoice_generated",
            Self::ReminderIssued => "reminder_issued",
        }
    }

    /// Entity the action is recorded against.
    pub fn entity_type(&self) -> &'static str {
        match self {
            Self::PaymentApplied => "transaction",
            Self::ReminderIssued => "payment_reminder",
            _ => "invoice",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AuditSeverity {
    Info,
    Notice,
    Warning,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub action: AuditAction,
    pub severity: AuditSeverity,
    pub actor: String,
    pub entity_id: Uuid,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        action: AuditAction,
        actor: impl Into<String>,
        entity_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            severity: AuditSeverity::Info,
            actor: actor.into(),
            entity_id,
            before: None,
            after: None,
            timestamp,
        }
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_before<T: Serialize>(mut self, before: &T) -> Self {
        self.before = serde_json::to_value(before).ok();
        self
    }

    pub fn with_after<T: Serialize>(mut self, after: &T) -> Self {
        self.after = serde_json::to_value(after).ok();
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<()>;
}

/// Writes audit events to the structured log under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        let before = event.before.map(|v| v.to_string()).unwrap_or_default();
        let after = event.after.map(|v| v.to_string()).unwrap_or_default();

        tracing::info!(
            target: "audit",
            audit_id = %event.id,
            action = event.action.as_str(),
            severity = event.severity.as_str(),
            entity_type = event.action.entity_type(),
            entity_id = %event.entity_id,
            actor = %event.actor,
            before = %before,
            after = %after,
            "Audit event"
        );
        Ok(())
    }
}

/// Keeps events in memory, oldest evicted past `max_events`.
#[derive(Clone)]
pub struct InMemoryAuditSink {
    events: Arc<RwLock<Vec<AuditEvent>>>,
    max_events: usize,
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl InMemoryAuditSink {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            max_events,
        }
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_for(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        let mut events = self.events.write().await;
        if events.len() >= self.max_events {
            events.remove(0);
        }
        events.push(event);
        Ok(())
    }
}

//! Collaborators shared by the billing components.

use crate::config::BillingSettings;
use crate::error::BillingError;
use crate::services::audit::{AuditEvent, AuditSink};
use crate::services::clock::Clock;
use crate::services::directory::{CustomerDirectory, RequestSource};
use crate::services::notification::NotificationDispatcher;
use crate::services::renderer::DocumentRenderer;
use crate::services::store::BillingStore;
use chrono::{DateTime, Utc};
use service_core::retry::{retry_async, RetryConfig};
use std::future::Future;
use std::sync::Arc;

#[derive(Clone)]
pub struct BillingDeps {
    pub store: Arc<dyn BillingStore>,
    pub directory: Arc<dyn CustomerDirectory>,
    pub requests: Arc<dyn RequestSource>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub clock: Arc<dyn Clock>,
    pub settings: BillingSettings,
}

impl BillingDeps {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Best-effort: a failing sink never fails the caller.
    pub async fn record_audit(&self, event: AuditEvent) {
        let action = event.action;
        let entity_id = event.entity_id;
        if let Err(e) = self.audit.record(event).await {
            tracing::warn!(
                action = action.as_str(),
                entity_id = %entity_id,
                error = %e,
                "Failed to record audit event"
            );
        }
    }

    /// Re-run `f` after losing an optimistic-lock race, up to the configured budget.
    pub async fn with_lock_retry<T, F, Fut>(
        &self,
        operation: &str,
        f: F,
    ) -> Result<T, BillingError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BillingError>>,
    {
        let config = RetryConfig::contention(self.settings.lock_retries);
        retry_async(
            &config,
            operation,
            BillingError::is_concurrency_conflict,
            f,
        )
        .await
    }
}

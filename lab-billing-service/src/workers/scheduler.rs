use crate::config::JobsConfig;
use crate::models::{JobKind, RunReport};
use crate::services::BillingService;
use crate::error::BillingError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Drives the two billing timers on a fixed interval until shut down.
pub struct JobScheduler {
    config: JobsConfig,
    billing: Arc<BillingService>,
    shutdown_token: CancellationToken,
}

impl JobScheduler {
    pub fn new(config: JobsConfig, billing: Arc<BillingService>) -> Self {
        Self {
            config,
            billing,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn start(&self) -> Vec<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Billing jobs disabled by configuration");
            return Vec::new();
        }

        let period = Duration::from_secs(self.config.interval_seconds.max(1));
        tracing::info!(interval_seconds = period.as_secs(), "Starting billing jobs");

        vec![
            self.spawn_loop(JobKind::RecurringInvoices, period),
            self.spawn_loop(JobKind::PaymentReminders, period),
        ]
    }

    fn spawn_loop(&self, job: JobKind, period: Duration) -> JoinHandle<()> {
        let billing = self.billing.clone();
        let shutdown = self.shutdown_token.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!(job = job.as_str(), "Billing job loop shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = run_once(&billing, job).await {
                            tracing::error!(job = job.as_str(), error = %e, "Billing job run failed");
                        }
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        tracing::info!("Stopping billing jobs");
        self.shutdown_token.cancel();
    }
}

async fn run_once(billing: &BillingService, job: JobKind) -> Result<RunReport, BillingError> {
    match job {
        JobKind::RecurringInvoices => billing.run_recurring_invoice_generation().await,
        JobKind::PaymentReminders => billing.run_reminder_sweep_and_overdue_update().await,
    }
}

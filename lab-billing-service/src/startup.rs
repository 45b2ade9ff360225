use crate::config::BillingConfig;
use crate::handlers;
use crate::services::{
    BillingDeps, BillingService, Database, JsonDocumentRenderer, LogNotifier,
    NotificationDispatcher, SystemClock, TracingAuditSink, WebhookNotifier,
};
use crate::workers::JobScheduler;
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingService>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route(
            "/invoices",
            post(handlers::invoices::create_invoice).get(handlers::invoices::list_invoices),
        )
        .route(
            "/invoices/from-request",
            post(handlers::invoices::create_from_request),
        )
        .route("/invoices/:id", get(handlers::invoices::get_invoice))
        .route(
            "/invoices/:id/status",
            patch(handlers::invoices::update_status),
        )
        .route(
            "/invoices/:id/recurring",
            post(handlers::invoices::setup_recurrence)
                .delete(handlers::invoices::cancel_recurrence),
        )
        .route(
            "/invoices/:id/reminders",
            post(handlers::invoices::send_reminder).get(handlers::invoices::list_reminders),
        )
        .route(
            "/invoices/:id/document",
            get(handlers::invoices::get_document),
        )
        .route(
            "/transactions",
            post(handlers::transactions::apply_payment),
        )
        .route(
            "/transactions/:id",
            get(handlers::transactions::get_transaction),
        )
        .route(
            "/reports/financial-metrics",
            get(handlers::reports::financial_metrics),
        )
        .route(
            "/jobs/recurring-invoices",
            post(handlers::jobs::run_recurring_invoices),
        )
        .route(
            "/jobs/payment-reminders",
            post(handlers::jobs::run_payment_reminders),
        )
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    scheduler: JobScheduler,
    db: Database,
}

impl Application {
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to PostgreSQL: {}", e);
            e
        })?;
        db.run_migrations().await.map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            e
        })?;

        let notifier: Arc<dyn NotificationDispatcher> = match &config.notification.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
            None => {
                tracing::warn!("No reminder webhook configured, reminders are only logged");
                Arc::new(LogNotifier)
            }
        };

        let store = Arc::new(db.clone());
        let deps = BillingDeps {
            store: store.clone(),
            directory: store.clone(),
            requests: store,
            audit: Arc::new(TracingAuditSink),
            notifier,
            renderer: Arc::new(JsonDocumentRenderer),
            clock: Arc::new(SystemClock),
            settings: config.billing.clone(),
        };
        let billing = Arc::new(BillingService::new(deps));

        let scheduler = JobScheduler::new(config.jobs.clone(), billing.clone());
        let router = build_router(AppState { billing });

        let addr: SocketAddr = format!("{}:{}", config.common.host, config.common.port)
            .parse()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid listen address: {}", e)))?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        Ok(Self {
            port,
            listener,
            router,
            scheduler,
            db,
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve HTTP and run the billing jobs until `shutdown` resolves.
    pub async fn run_until_stopped<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handles = self.scheduler.start();

        let result = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await;

        self.scheduler.shutdown();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Billing job loop ended abnormally");
            }
        }

        result
    }
}

//! Manual triggers for the scheduled runs, for catch-up after downtime.

use crate::middleware::Actor;
use crate::models::RunReport;
use crate::startup::AppState;
use axum::{extract::State, Json};
use service_core::error::AppError;

#[tracing::instrument(skip(state), fields(user_id = %actor.0))]
pub async fn run_recurring_invoices(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<RunReport>, AppError> {
    tracing::info!("Recurring invoice run triggered manually");
    Ok(Json(state.billing.run_recurring_invoice_generation().await?))
}

#[tracing::instrument(skip(state), fields(user_id = %actor.0))]
pub async fn run_payment_reminders(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<RunReport>, AppError> {
    tracing::info!("Reminder sweep triggered manually");
    Ok(Json(
        state.billing.run_reminder_sweep_and_overdue_update().await?,
    ))
}

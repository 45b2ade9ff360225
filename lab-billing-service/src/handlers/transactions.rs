use crate::dtos::ApplyPaymentRequest;
use crate::middleware::Actor;
use crate::models::{ApplyPayment, Transaction};
use crate::services::PaymentOutcome;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[tracing::instrument(skip(state, request), fields(user_id = %actor.0))]
pub async fn apply_payment(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<ApplyPaymentRequest>,
) -> Result<(StatusCode, Json<PaymentOutcome>), AppError> {
    request.validate()?;

    let outcome = state
        .billing
        .apply_payment(ApplyPayment::from(request), &actor.0)
        .await?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(state.billing.get_transaction(transaction_id).await?))
}

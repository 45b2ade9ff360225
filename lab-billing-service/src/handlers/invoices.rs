use crate::dtos::{
    CreateInvoiceRequest, GenerateFromRequest, InvoiceListResponse, ListInvoicesParams,
    SendReminderRequest, SetupRecurrenceRequest, UpdateStatusRequest,
};
use crate::middleware::Actor;
use crate::models::{Invoice, InvoiceDocument, ListInvoicesFilter, PaymentReminder};
use crate::services::CreateInvoice;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[tracing::instrument(skip(state, request), fields(user_id = %actor.0))]
pub async fn create_invoice(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<Invoice>), AppError> {
    request.validate()?;
    let input = CreateInvoice::try_from(request)?;

    let invoice = state.billing.create_invoice(input, &actor.0).await?;

    Ok((StatusCode::CREATED, Json(invoice)))
}

#[tracing::instrument(skip(state, request), fields(user_id = %actor.0))]
pub async fn create_from_request(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<GenerateFromRequest>,
) -> Result<(StatusCode, Json<Invoice>), AppError> {
    let invoice = state
        .billing
        .generate_invoice_from_request(request.request_id, &actor.0)
        .await?;

    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Query(params): Query<ListInvoicesParams>,
) -> Result<Json<InvoiceListResponse>, AppError> {
    let filter = ListInvoicesFilter::from(params);
    let page_size = filter.effective_page_size() as usize;

    let invoices = state.billing.list_invoices(filter).await?;
    let next_page_token = if invoices.len() == page_size {
        invoices.last().map(|i| i.invoice_id)
    } else {
        None
    };

    Ok(Json(InvoiceListResponse {
        invoices,
        next_page_token,
    }))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDocument>, AppError> {
    Ok(Json(state.billing.get_invoice(invoice_id).await?))
}

#[tracing::instrument(skip(state, request), fields(user_id = %actor.0))]
pub async fn update_status(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    actor: Actor,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Invoice>, AppError> {
    let invoice = state
        .billing
        .transition_status(invoice_id, request.status, &actor.0)
        .await?;
    Ok(Json(invoice))
}

#[tracing::instrument(skip(state, request), fields(user_id = %actor.0))]
pub async fn setup_recurrence(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    actor: Actor,
    Json(request): Json<SetupRecurrenceRequest>,
) -> Result<Json<Invoice>, AppError> {
    let invoice = state
        .billing
        .setup_recurrence(
            invoice_id,
            request.recurrence_type,
            request.end_date,
            &actor.0,
        )
        .await?;
    Ok(Json(invoice))
}

#[tracing::instrument(skip(state), fields(user_id = %actor.0))]
pub async fn cancel_recurrence(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Invoice>, AppError> {
    Ok(Json(
        state.billing.cancel_recurrence(invoice_id, &actor.0).await?,
    ))
}

/// Manual reminder. The body is optional; without it the configured method is used.
#[tracing::instrument(skip(state, request), fields(user_id = %actor.0))]
pub async fn send_reminder(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    actor: Actor,
    request: Option<Json<SendReminderRequest>>,
) -> Result<(StatusCode, Json<PaymentReminder>), AppError> {
    let Json(request) = request.unwrap_or_default();

    let reminder = state
        .billing
        .send_reminder(invoice_id, request.method, &actor.0)
        .await?;

    Ok((StatusCode::CREATED, Json(reminder)))
}

pub async fn list_reminders(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Vec<PaymentReminder>>, AppError> {
    Ok(Json(state.billing.list_reminders(invoice_id).await?))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let document = state.billing.render_invoice(invoice_id).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, document.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", document.file_name),
            ),
        ],
        document.bytes,
    ))
}

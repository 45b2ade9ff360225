use crate::dtos::MetricsParams;
use crate::models::{FinancialMetrics, ReportingPeriod};
use crate::startup::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;

pub async fn financial_metrics(
    State(state): State<AppState>,
    Query(params): Query<MetricsParams>,
) -> Result<Json<FinancialMetrics>, AppError> {
    let period = ReportingPeriod::from(params);
    Ok(Json(state.billing.get_financial_metrics(period).await?))
}

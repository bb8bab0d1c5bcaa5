use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::queries;
use crate::error::AppError;
use crate::AppState;

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = queries::get_transaction(&state.db, id).await.map_err(|e| match e {
        sqlx::Error::RowNotFound => AppError::NotFound(format!("Transaction {} not found", id)),
        _ => AppError::Database(e),
    })?;

    Ok(Json(tx))
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let deliveries = queries::list_deliveries_for_transaction(&state.db, id).await?;
    Ok(Json(deliveries))
}

#[derive(Debug, Deserialize)]
pub struct AnomalyListParams {
    pub limit: Option<i64>,
}

/// Events that were acknowledged to the provider but not applied, for
/// manual review.
pub async fn list_anomalies(
    State(state): State<AppState>,
    Query(params): Query<AnomalyListParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let anomalies = queries::list_recent_anomalies(&state.db, limit).await?;
    Ok(Json(anomalies))
}

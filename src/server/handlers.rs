//! Route handlers of the proxy

use crate::{
    constants::SERVICE_NAME,
    types::{ChartQuery, HealthResponse, LogicalRequest, MarketsQuery},
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{error::ApiError, AppState};

type ApiResult = Result<Json<Value>, ApiError>;

/// `GET /api/markets`
pub async fn markets(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let request = LogicalRequest::markets(MarketsQuery::from_params(&params)?);
    Ok(Json(state.serve(request).await?))
}

/// `GET /api/coins/:coin_id`
pub async fn coin(State(state): State<AppState>, Path(coin_id): Path<String>) -> ApiResult {
    let request = LogicalRequest::coin(&coin_id)?;
    Ok(Json(state.serve(request).await?))
}

/// `GET /api/coins/:coin_id/market_chart`
pub async fn market_chart(
    State(state): State<AppState>,
    Path(coin_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let request = LogicalRequest::chart(&coin_id, ChartQuery::from_params(&params)?)?;
    Ok(Json(state.serve(request).await?))
}

/// `GET /api/cache/stats`
pub async fn cache_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.caches.report()))
}

/// `DELETE /api/cache/clear`
pub async fn cache_clear(State(state): State<AppState>) -> Json<Value> {
    state.caches.clear_all();
    Json(json!({ "message": "All caches cleared" }))
}

/// `GET /api/health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::ok(SERVICE_NAME))
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("Route not found")
}

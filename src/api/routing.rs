use super::{error_response, AppState};
use crate::error::AppError;
use crate::middleware::error::{get_request_id_from_headers, json_rejection, query_rejection};
use crate::payments::types::TransactionRequest;
use crate::routing::arbiter::{DecisionRecord, RoutingDecision};
use crate::routing::model::{InsightFilters, RoutingInsights};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::HeaderMap,
    response::Response,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// `POST /api/v1/routing/decide`: a decision without dispatching anything.
pub async fn decide(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<TransactionRequest>, JsonRejection>,
) -> Result<Json<RoutingDecision>, Response> {
    let request_id = get_request_id_from_headers(&headers);
    let Json(request) = payload.map_err(|e| json_rejection(e, request_id.clone()))?;
    request
        .validate()
        .map_err(|e| error_response(e, request_id))?;

    let transaction_id = format!("TXN-{}", Uuid::new_v4());
    let decision = state
        .orchestrator
        .arbiter()
        .decide(&transaction_id, &request)
        .await;
    Ok(Json(decision))
}

/// `GET /api/v1/routing/decisions?limit=`
pub async fn decisions(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<DecisionRecord>>, Response> {
    let request_id = get_request_id_from_headers(&headers);
    let Query(query) = query.map_err(|e| query_rejection(e, request_id))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    Ok(Json(state.orchestrator.arbiter().history(limit).await))
}

/// `GET /api/v1/routing/decisions/{id}`
pub async fn decision(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(transaction_id): Path<String>,
) -> Result<Json<DecisionRecord>, Response> {
    let request_id = get_request_id_from_headers(&headers);
    state
        .orchestrator
        .arbiter()
        .decision(&transaction_id)
        .await
        .map(Json)
        .ok_or_else(|| error_response(AppError::not_found(transaction_id), request_id))
}

/// `GET /api/v1/routing/insights`
pub async fn insights(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<InsightFilters>, QueryRejection>,
) -> Result<Json<RoutingInsights>, Response> {
    let request_id = get_request_id_from_headers(&headers);
    let Query(filters) = query.map_err(|e| query_rejection(e, request_id))?;
    Ok(Json(state.orchestrator.arbiter().model().insights(&filters)))
}

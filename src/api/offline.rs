use super::{error_response, AppState};
use crate::error::AppError;
use crate::middleware::error::{get_request_id_from_headers, json_rejection};
use crate::offline::{CaptureReceipt, CaptureRequest, OfflineStatus, StatusReport, SyncRecord, SyncReport};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SyncBatch {
    #[serde(default)]
    pub transactions: Vec<SyncRecord>,
}

type Captured = Result<(StatusCode, Json<CaptureReceipt>), Response>;

pub async fn capture_ussd(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CaptureRequest>, JsonRejection>,
) -> Captured {
    let request_id = get_request_id_from_headers(&headers);
    let Json(request) = payload.map_err(|e| json_rejection(e, request_id.clone()))?;
    let receipt = state
        .capture
        .capture_ussd(request)
        .await
        .map_err(|e| error_response(e, request_id))?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn capture_sms(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CaptureRequest>, JsonRejection>,
) -> Captured {
    let request_id = get_request_id_from_headers(&headers);
    let Json(request) = payload.map_err(|e| json_rejection(e, request_id.clone()))?;
    let receipt = state
        .capture
        .capture_sms(request)
        .await
        .map_err(|e| error_response(e, request_id))?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn capture_qr(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CaptureRequest>, JsonRejection>,
) -> Captured {
    let request_id = get_request_id_from_headers(&headers);
    let Json(request) = payload.map_err(|e| json_rejection(e, request_id.clone()))?;
    let receipt = state
        .capture
        .capture_qr(request)
        .await
        .map_err(|e| error_response(e, request_id))?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// `POST /api/v1/offline/sync`. Per-record failures are reported in the
/// body; only an empty batch is an error.
pub async fn sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SyncBatch>, JsonRejection>,
) -> Result<Json<SyncReport>, Response> {
    let request_id = get_request_id_from_headers(&headers);
    let Json(batch) = payload.map_err(|e| json_rejection(e, request_id.clone()))?;
    let report = state
        .sync
        .sync(&batch.transactions)
        .await
        .map_err(|e| error_response(e, request_id))?;
    Ok(Json(report))
}

pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(transaction_id): Path<String>,
) -> Result<Json<StatusReport>, Response> {
    let request_id = get_request_id_from_headers(&headers);
    let report = state
        .capture
        .check_status(&transaction_id)
        .await
        .map_err(|e| error_response(e, request_id.clone()))?;
    if report.status == OfflineStatus::NotFound {
        return Err(error_response(AppError::not_found(transaction_id), request_id));
    }
    Ok(Json(report))
}

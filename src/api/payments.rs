use super::{error_response, AppState};
use crate::middleware::error::{get_request_id_from_headers, json_rejection};
use crate::payments::types::{PaymentMethod, TransactionRequest};
use crate::services::payment_orchestrator::{PaymentOutcome, PaymentRequest};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    response::Response,
    Json,
};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct FallbackPaymentRequest {
    #[serde(flatten)]
    pub transaction: TransactionRequest,
    pub methods: Vec<PaymentMethod>,
}

/// `POST /api/v1/payments`. A failed charge is still a 200 with
/// `success: false`; rejections before dispatch are errors.
pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PaymentRequest>, JsonRejection>,
) -> Result<Json<PaymentOutcome>, Response> {
    let request_id = get_request_id_from_headers(&headers);
    let Json(request) = payload.map_err(|e| json_rejection(e, request_id.clone()))?;

    info!(
        amount = request.transaction.amount,
        currency = %request.transaction.currency,
        source_region = %request.transaction.source(),
        "Payment requested"
    );
    let outcome = state
        .orchestrator
        .process_payment(request)
        .await
        .map_err(|e| error_response(e, request_id))?;
    Ok(Json(outcome))
}

/// `POST /api/v1/payments/fallback`
pub async fn create_payment_with_fallback(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<FallbackPaymentRequest>, JsonRejection>,
) -> Result<Json<PaymentOutcome>, Response> {
    let request_id = get_request_id_from_headers(&headers);
    let Json(request) = payload.map_err(|e| json_rejection(e, request_id.clone()))?;

    let outcome = state
        .orchestrator
        .process_with_fallback(request.transaction, &request.methods)
        .await
        .map_err(|e| error_response(e, request_id))?;
    Ok(Json(outcome))
}

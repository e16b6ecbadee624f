//! HTTP surface

pub mod offline;
pub mod payments;
pub mod routing;

use crate::error::AppError;
use crate::health::HealthChecker;
use crate::middleware::error::success_response;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::offline::{OfflineCaptureService, OfflineSyncService};
use crate::services::payment_orchestrator::PaymentOrchestrator;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub capture: Arc<OfflineCaptureService>,
    pub sync: Arc<OfflineSyncService>,
    pub health: HealthChecker,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .route("/api/v1/payments", post(payments::create_payment))
        .route("/api/v1/payments/fallback", post(payments::create_payment_with_fallback))
        .route("/api/v1/routing/decide", post(routing::decide))
        .route("/api/v1/routing/decisions", get(routing::decisions))
        .route("/api/v1/routing/decisions/{id}", get(routing::decision))
        .route("/api/v1/routing/insights", get(routing::insights))
        .route("/api/v1/offline/ussd", post(offline::capture_ussd))
        .route("/api/v1/offline/sms", post(offline::capture_sms))
        .route("/api/v1/offline/qr", post(offline::capture_qr))
        .route("/api/v1/offline/sync", post(offline::sync))
        .route("/api/v1/offline/{id}/status", get(offline::status))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

/// Render a module error with the caller's request id attached.
pub(crate) fn error_response(err: impl Into<AppError>, request_id: Option<String>) -> Response {
    let err = err.into();
    match request_id {
        Some(id) => err.with_request_id(id).into_response(),
        None => err.into_response(),
    }
}

async fn root() -> &'static str {
    "Paygrid routing and offline settlement API"
}

async fn health(State(state): State<AppState>) -> Response {
    let status = state.health.check_health().await;
    let code = match status.status {
        crate::health::HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (code, Json(status)).into_response()
}

async fn liveness() -> impl IntoResponse {
    success_response(serde_json::json!({ "status": "alive" }))
}

//! HTTP surface: webhook intake, order creation, availability, confirmation polling,
//! on-demand reconciliation and health probes.

pub mod admin;
pub mod bookings;
pub mod orders;
pub mod slots;
pub mod webhooks;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::database::store::BookingStore;
use crate::error::AppError;
use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::middleware::error::get_request_id_from_headers;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::order_service::OrderService;
use crate::services::slot_conflict::SlotConflictChecker;
use crate::services::webhook_processor::WebhookProcessor;
use crate::workers::reconciliation::ReconciliationSweeper;
use crate::workers::webhook_dispatch::WebhookDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BookingStore>,
    pub processor: Arc<WebhookProcessor>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub order_service: Arc<OrderService>,
    pub slot_checker: Arc<SlotConflictChecker>,
    pub sweeper: Arc<ReconciliationSweeper>,
    pub health_checker: HealthChecker,
    pub confirmation_max_wait: Duration,
}

pub(crate) fn with_request_id(error: AppError, headers: &HeaderMap) -> AppError {
    match get_request_id_from_headers(headers) {
        Some(id) => error.with_request_id(id),
        None => error,
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .route("/webhooks/razorpay", post(webhooks::handle_razorpay_webhook))
        .route("/api/payments/orders", post(orders::create_order))
        .route("/api/slots/check", post(slots::check_slots))
        .route(
            "/api/bookings/{id}/confirmation",
            get(bookings::get_confirmation),
        )
        .route("/api/admin/reconcile", post(admin::run_reconciliation))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let health_status = state.health_checker.check_health().await;
    if health_status.status == HealthState::Unhealthy {
        error!("Health check failed - service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - all dependencies must answer
async fn readiness(
    state: State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    health(state).await
}

/// Liveness probe - the process is running
async fn liveness() -> &'static str {
    "OK"
}

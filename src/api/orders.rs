//! POST /api/payments/orders: open the gateway order for a booking's deposit.

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use uuid::Uuid;

use super::{with_request_id, AppState};
use crate::error::AppError;
use crate::services::order_service::CreatedOrder;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub booking_id: Uuid,
    #[serde(default)]
    pub currency: Option<String>,
}

pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<CreatedOrder>, AppError> {
    state
        .order_service
        .create_order(request.booking_id, request.currency.as_deref())
        .await
        .map(Json)
        .map_err(|e| with_request_id(e, &headers))
}

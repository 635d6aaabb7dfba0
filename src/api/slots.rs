//! POST /api/slots/check: read-only availability check used before submission.

use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{with_request_id, AppState};
use crate::error::{AppError, AppErrorKind, AppResult, ValidationError};
use crate::services::slot_conflict::parse_slot;

#[derive(Debug, Deserialize)]
pub struct SlotInput {
    pub date: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Deserialize)]
pub struct SlotCheckRequest {
    pub service_id: Uuid,
    #[serde(default)]
    pub exclude_booking_id: Option<Uuid>,
    pub slots: Vec<SlotInput>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotCheckResponse {
    pub free: bool,
    pub conflicts: Vec<String>,
}

async fn check(state: &AppState, request: SlotCheckRequest) -> AppResult<SlotCheckResponse> {
    if request.slots.is_empty() {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::MissingField {
                field: "slots".to_string(),
            },
        )));
    }

    let windows = request
        .slots
        .iter()
        .map(|s| parse_slot(&s.date, &s.start, &s.end))
        .collect::<Result<Vec<_>, _>>()?;

    let report = state
        .slot_checker
        .check_free(&windows, request.service_id, request.exclude_booking_id)
        .await?;

    Ok(SlotCheckResponse {
        free: report.free,
        conflicts: report.reasons(),
    })
}

pub async fn check_slots(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SlotCheckRequest>,
) -> Result<Json<SlotCheckResponse>, AppError> {
    check(&state, request)
        .await
        .map(Json)
        .map_err(|e| with_request_id(e, &headers))
}

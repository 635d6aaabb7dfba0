use axum::{extract::State, http::HeaderMap, Json};
use tracing::info;

use super::{with_request_id, AppState};
use crate::error::AppError;
use crate::workers::reconciliation::SweepReport;

/// POST /api/admin/reconcile: runs one reconciliation pass immediately.
pub async fn run_reconciliation(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SweepReport>, AppError> {
    info!("on-demand reconciliation requested");
    state
        .sweeper
        .run_pass()
        .await
        .map(Json)
        .map_err(|e| with_request_id(AppError::from(e), &headers))
}

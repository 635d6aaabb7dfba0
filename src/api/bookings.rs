//! GET /api/bookings/{id}/confirmation
//!
//! Lets the paying client wait for the webhook to land. The server polls the booking
//! for at most `wait_secs` (capped by configuration) and then answers
//! `check_back_later` instead of holding the request open.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::{with_request_id, AppState};
use crate::database::models::{Booking, BookingPaymentStatus, BookingStatus};
use crate::error::{AppError, AppResult};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationState {
    Confirmed,
    /// Still pending; payment may be on its way.
    Confirming,
    /// Money moved but the booking cannot stand as is (slot conflict, cancelled booking).
    NeedsAttention,
    /// The wait ran out before the booking settled.
    CheckBackLater,
    Failed,
}

impl ConfirmationState {
    pub fn of(booking: &Booking) -> Self {
        let money_taken = booking.payment_status.rank() >= BookingPaymentStatus::Paid.rank();
        match booking.status {
            BookingStatus::Confirmed => ConfirmationState::Confirmed,
            BookingStatus::CapturedConflict => ConfirmationState::NeedsAttention,
            BookingStatus::Cancelled if money_taken => ConfirmationState::NeedsAttention,
            BookingStatus::Cancelled => ConfirmationState::Failed,
            BookingStatus::Pending if booking.payment_status == BookingPaymentStatus::Failed => {
                ConfirmationState::Failed
            }
            BookingStatus::Pending => ConfirmationState::Confirming,
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(
            self,
            ConfirmationState::Confirming | ConfirmationState::CheckBackLater
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmationQuery {
    #[serde(default)]
    pub wait_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmationResponse {
    pub booking_id: Uuid,
    pub state: ConfirmationState,
    pub booking_status: BookingStatus,
    pub payment_status: BookingPaymentStatus,
    pub waited_ms: u64,
}

async fn load(state: &AppState, booking_id: Uuid) -> AppResult<Booking> {
    state
        .store
        .find_booking(booking_id)
        .await?
        .ok_or_else(|| AppError::not_found("Booking", booking_id))
}

async fn wait_for_confirmation(
    state: &AppState,
    booking_id: Uuid,
    wait: Duration,
) -> AppResult<ConfirmationResponse> {
    let started = Instant::now();
    let deadline = started + wait;

    let mut booking = load(state, booking_id).await?;
    let mut current = ConfirmationState::of(&booking);

    while !current.is_settled() && Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
        booking = load(state, booking_id).await?;
        current = ConfirmationState::of(&booking);
    }

    if !current.is_settled() && !wait.is_zero() {
        current = ConfirmationState::CheckBackLater;
    }

    Ok(ConfirmationResponse {
        booking_id,
        state: current,
        booking_status: booking.status,
        payment_status: booking.payment_status,
        waited_ms: started.elapsed().as_millis() as u64,
    })
}

pub async fn get_confirmation(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Query(query): Query<ConfirmationQuery>,
    headers: HeaderMap,
) -> Result<Json<ConfirmationResponse>, AppError> {
    let wait = Duration::from_secs(
        query
            .wait_secs
            .unwrap_or(0)
            .min(state.confirmation_max_wait.as_secs()),
    );

    wait_for_confirmation(&state, booking_id, wait)
        .await
        .map(Json)
        .map_err(|e| with_request_id(e, &headers))
}

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{error, warn};
use uuid::Uuid;

/// Alerts that need a human to look at a booking or an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorAlert {
    /// Payment captured but the slots were already taken.
    CapturedConflict { booking_id: Uuid, reasons: Vec<String> },
    /// Payment captured for a booking that had been cancelled; a refund is due.
    PaidWhileCancelled { booking_id: Uuid, order_id: String },
    /// No booking could be matched to a gateway event.
    UnresolvableEvent { idempotency_key: String, reason: String },
    /// Processing gave up after the last retry.
    RetriesExhausted { idempotency_key: String, error: String },
}

const HISTORY_LIMIT: usize = 256;

pub struct NotificationService {
    history: Mutex<Vec<OperatorAlert>>,
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationService {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn alert(&self, alert: OperatorAlert) {
        // Delivery channel (email, chat) is outside this service; alerts go to the log.
        match &alert {
            OperatorAlert::CapturedConflict { booking_id, reasons } => {
                error!(
                    booking_id = %booking_id,
                    conflicts = %reasons.join("; "),
                    "🔔 NOTIFICATION: Payment captured for conflicted slots - manual resolution needed"
                );
            }
            OperatorAlert::PaidWhileCancelled {
                booking_id,
                order_id,
            } => {
                error!(
                    booking_id = %booking_id,
                    order_id = %order_id,
                    "🔔 NOTIFICATION: Payment captured for cancelled booking - refund needed"
                );
            }
            OperatorAlert::UnresolvableEvent {
                idempotency_key,
                reason,
            } => {
                error!(
                    idempotency_key = %idempotency_key,
                    reason = %reason,
                    "🔔 NOTIFICATION: Gateway event could not be matched to a booking"
                );
            }
            OperatorAlert::RetriesExhausted {
                idempotency_key,
                error,
            } => {
                warn!(
                    idempotency_key = %idempotency_key,
                    error = %error,
                    "🔔 NOTIFICATION: Gateway event processing exhausted retries"
                );
            }
        }

        if let Ok(mut history) = self.history.lock() {
            if history.len() == HISTORY_LIMIT {
                history.remove(0);
            }
            history.push(alert);
        }
    }

    /// Most recent alerts, oldest first.
    pub fn recent(&self) -> Vec<OperatorAlert> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }
}

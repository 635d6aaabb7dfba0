//! Idempotency ledger for gateway events.
//!
//! Each delivery is reduced to one key and recorded with a single atomic insert; only
//! the first delivery of a key is processed. The stored payload lets a crashed or failed
//! event be replayed later by the retry worker.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::models::{KeySource, LedgerEntry, LedgerStatus, NewLedgerEvent};
use crate::database::store::BookingStore;
use crate::payments::types::WebhookEnvelope;

pub const EVENT_ID_HEADER: &str = "x-razorpay-event-id";

/// Derives the ledger key: gateway event id, else `{payment_id}:{target status}`,
/// else a digest of the raw body.
pub fn derive_key(
    event_id_header: Option<&str>,
    envelope: Option<&WebhookEnvelope>,
    raw_body: &[u8],
) -> (String, KeySource) {
    let event_id = event_id_header
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .or_else(|| {
            envelope
                .and_then(|e| e.id.as_deref())
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        });
    if let Some(id) = event_id {
        return (id, KeySource::EventId);
    }

    if let Some(details) = envelope.map(WebhookEnvelope::details) {
        if let (Some(payment_id), Some(target)) = (&details.payment_id, details.target_status()) {
            return (format!("{}:{}", payment_id, target), KeySource::PaymentStatus);
        }
    }

    let digest = Sha256::digest(raw_body);
    (
        format!("sha256:{}", hex::encode(digest)),
        KeySource::PayloadDigest,
    )
}

pub struct IdempotencyLedger {
    store: Arc<dyn BookingStore>,
}

impl IdempotencyLedger {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }

    pub async fn record_if_new(&self, event: &NewLedgerEvent) -> Result<LedgerEntry, DatabaseError> {
        let entry = self.store.record_event_if_new(event).await?;
        if entry.is_new {
            debug!(
                idempotency_key = %event.idempotency_key,
                key_source = %event.key_source,
                event_type = %event.event_type,
                "gateway event recorded"
            );
        } else {
            info!(
                idempotency_key = %event.idempotency_key,
                event_type = %event.event_type,
                "duplicate gateway event"
            );
        }
        Ok(entry)
    }

    pub async fn mark_processing(&self, record_id: Uuid) -> Result<(), DatabaseError> {
        self.store
            .mark_event(record_id, LedgerStatus::Processing, None)
            .await
    }

    pub async fn mark_processed(&self, record_id: Uuid) -> Result<(), DatabaseError> {
        self.store
            .mark_event(record_id, LedgerStatus::Processed, None)
            .await
    }

    pub async fn mark_failed(&self, record_id: Uuid, error: &str) -> Result<(), DatabaseError> {
        self.store
            .mark_event(record_id, LedgerStatus::Failed, Some(error))
            .await
    }

    pub async fn mark_unresolved(&self, record_id: Uuid, reason: &str) -> Result<(), DatabaseError> {
        self.store
            .mark_event(record_id, LedgerStatus::Unresolved, Some(reason))
            .await
    }
}

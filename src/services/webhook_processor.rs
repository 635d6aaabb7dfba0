use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::models::{LedgerRecord, NewLedgerEvent};
use crate::database::store::BookingStore;
use crate::payments::signature::{SignatureError, SignatureVerifier};
use crate::payments::types::{EventEffect, WebhookEnvelope};
use crate::services::booking_state::{BookingStateMachine, TransitionError, TransitionOutcome};
use crate::services::idempotency::{derive_key, IdempotencyLedger};
use crate::services::notification::{NotificationService, OperatorAlert};
use crate::services::order_resolver::{OrderResolver, ResolveError};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),
    #[error("Transient failure: {0}")]
    Transient(String),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl WebhookProcessorError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, WebhookProcessorError::InvalidSignature(_))
    }
}

/// A recorded event waiting for a worker.
#[derive(Debug, Clone)]
pub struct WebhookJob {
    pub record_id: Uuid,
    pub idempotency_key: String,
    pub envelope: WebhookEnvelope,
}

#[derive(Debug)]
pub enum Acceptance {
    Queued(WebhookJob),
    Duplicate,
    /// Acknowledged without further work (unknown event type, unparseable body).
    Ignored(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Applied(TransitionOutcome),
    Ignored,
    Unresolved(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetrySummary {
    pub claimed: usize,
    pub processed: usize,
    pub failed: usize,
}

pub struct WebhookProcessor {
    verifier: SignatureVerifier,
    ledger: IdempotencyLedger,
    resolver: Arc<OrderResolver>,
    state_machine: Arc<BookingStateMachine>,
    notifier: Arc<NotificationService>,
    store: Arc<dyn BookingStore>,
}

impl WebhookProcessor {
    pub fn new(
        verifier: SignatureVerifier,
        store: Arc<dyn BookingStore>,
        resolver: Arc<OrderResolver>,
        state_machine: Arc<BookingStateMachine>,
        notifier: Arc<NotificationService>,
    ) -> Self {
        Self {
            verifier,
            ledger: IdempotencyLedger::new(store.clone()),
            resolver,
            state_machine,
            notifier,
            store,
        }
    }

    /// Authenticates a delivery and records it in the ledger. Nothing is written
    /// when the signature is wrong.
    pub async fn accept(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
        event_id_header: Option<&str>,
    ) -> Result<Acceptance, WebhookProcessorError> {
        if let Err(e) = self.verifier.verify(raw_body, signature) {
            warn!(
                security_event = "webhook_signature_rejected",
                reason = %e,
                body_len = raw_body.len(),
                "rejected webhook with invalid signature"
            );
            return Err(e.into());
        }

        let payload: JsonValue = match serde_json::from_slice(raw_body) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "signed webhook body is not JSON; acknowledging");
                return Ok(Acceptance::Ignored("unparseable body"));
            }
        };
        let envelope: WebhookEnvelope = match serde_json::from_value(payload.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "signed webhook has no recognizable envelope; acknowledging");
                return Ok(Acceptance::Ignored("unrecognized envelope"));
            }
        };

        let (idempotency_key, key_source) = derive_key(event_id_header, Some(&envelope), raw_body);
        let entry = self
            .ledger
            .record_if_new(&NewLedgerEvent {
                idempotency_key: idempotency_key.clone(),
                key_source,
                event_type: envelope.event.clone(),
                payload,
            })
            .await?;

        if !entry.is_new {
            return Ok(Acceptance::Duplicate);
        }

        if envelope.gateway_event().effect() == EventEffect::Ignore {
            info!(event = %envelope.event, "gateway event needs no booking change");
            self.ledger.mark_processed(entry.record_id).await?;
            return Ok(Acceptance::Ignored("no booking effect"));
        }

        Ok(Acceptance::Queued(WebhookJob {
            record_id: entry.record_id,
            idempotency_key,
            envelope,
        }))
    }

    pub async fn mark_processing(&self, job: &WebhookJob) -> Result<(), DatabaseError> {
        self.ledger.mark_processing(job.record_id).await
    }

    /// Resolves the booking and applies the event. Safe to call again for the same job.
    pub async fn process(&self, job: &WebhookJob) -> Result<ProcessOutcome, WebhookProcessorError> {
        let details = job.envelope.details();
        let effect = details.event.effect();
        if effect == EventEffect::Ignore {
            self.ledger.mark_processed(job.record_id).await?;
            return Ok(ProcessOutcome::Ignored);
        }

        let resolved = match self.resolver.resolve(&details).await {
            Ok(resolved) => resolved,
            Err(ResolveError::Unresolvable(reason)) => {
                return self.unresolved(job, reason).await;
            }
            Err(ResolveError::Transient(reason)) => {
                return Err(WebhookProcessorError::Transient(reason));
            }
        };

        let evidence = details.evidence();
        let result = match effect {
            EventEffect::Capture => {
                self.state_machine
                    .confirm(resolved.booking_id, &evidence)
                    .await
            }
            EventEffect::Fail => self.state_machine.fail(resolved.booking_id, &evidence).await,
            EventEffect::Refund => {
                self.state_machine
                    .refund(resolved.booking_id, &evidence, details.refund_partial)
                    .await
            }
            EventEffect::Ignore => {
                self.ledger.mark_processed(job.record_id).await?;
                return Ok(ProcessOutcome::Ignored);
            }
        };

        let stored = match result {
            Ok(stored) => stored,
            Err(TransitionError::BookingNotFound(booking_id)) => {
                return self
                    .unresolved(job, format!("booking {} does not exist", booking_id))
                    .await;
            }
            Err(e) => return Err(WebhookProcessorError::Transient(e.to_string())),
        };

        self.ledger.mark_processed(job.record_id).await?;
        info!(
            idempotency_key = %job.idempotency_key,
            booking_id = %resolved.booking_id,
            event = %details.event.name(),
            outcome = stored.outcome.as_str(),
            "gateway event processed"
        );
        Ok(ProcessOutcome::Applied(stored.outcome))
    }

    async fn unresolved(
        &self,
        job: &WebhookJob,
        reason: String,
    ) -> Result<ProcessOutcome, WebhookProcessorError> {
        error!(
            idempotency_key = %job.idempotency_key,
            event = %job.envelope.event,
            reason = %reason,
            "gateway event cannot be matched to a booking"
        );
        self.ledger.mark_unresolved(job.record_id, &reason).await?;
        self.notifier.alert(OperatorAlert::UnresolvableEvent {
            idempotency_key: job.idempotency_key.clone(),
            reason: reason.clone(),
        });
        Ok(ProcessOutcome::Unresolved(reason))
    }

    /// Marks the ledger row failed so the retry worker can pick it up again.
    pub async fn record_failure(
        &self,
        job: &WebhookJob,
        error: &str,
        exhausted: bool,
    ) -> Result<(), DatabaseError> {
        self.ledger.mark_failed(job.record_id, error).await?;
        if exhausted {
            self.notifier.alert(OperatorAlert::RetriesExhausted {
                idempotency_key: job.idempotency_key.clone(),
                error: error.to_string(),
            });
        }
        Ok(())
    }

    fn job_from_record(record: &LedgerRecord) -> Result<WebhookJob, serde_json::Error> {
        let envelope = serde_json::from_value(record.payload.clone())?;
        Ok(WebhookJob {
            record_id: record.id,
            idempotency_key: record.idempotency_key.clone(),
            envelope,
        })
    }

    /// Re-processes ledger rows left unfinished before `stale_before`
    /// (called by the retry worker).
    pub async fn retry_pending(
        &self,
        stale_before: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<RetrySummary, DatabaseError> {
        let records = self
            .store
            .claim_stale_events(stale_before, max_attempts, limit)
            .await?;

        let mut summary = RetrySummary {
            claimed: records.len(),
            ..RetrySummary::default()
        };

        for record in records {
            let job = match Self::job_from_record(&record) {
                Ok(job) => job,
                Err(e) => {
                    self.ledger
                        .mark_unresolved(record.id, &format!("stored payload unreadable: {}", e))
                        .await?;
                    summary.failed += 1;
                    continue;
                }
            };

            match self.process(&job).await {
                Ok(_) => summary.processed += 1,
                Err(e) => {
                    let exhausted = record.attempts >= max_attempts;
                    warn!(
                        idempotency_key = %job.idempotency_key,
                        attempts = record.attempts,
                        error = %e,
                        "retry of gateway event failed"
                    );
                    self.record_failure(&job, &e.to_string(), exhausted).await?;
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}

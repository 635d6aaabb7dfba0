//! Reconciliation sweeper.
//!
//! Backstop for lost or failed webhooks. Each pass looks at pending bookings whose
//! payment is captured locally (or is an open order old enough to ask the gateway
//! about) and runs the confirmation with skip-locked semantics, so bookings the webhook
//! path holds are left for the next pass. A second pass over the same data changes
//! nothing.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ReconcileConfig;
use crate::database::error::DatabaseError;
use crate::database::models::{Payment, PaymentStatus};
use crate::database::store::BookingStore;
use crate::payments::gateway::PaymentGateway;
use crate::services::booking_state::{BookingStateMachine, PaymentEvidence, TransitionOutcome};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub confirmed: usize,
    pub conflicted: usize,
    pub skipped_locked: usize,
    pub unchanged: usize,
    pub errors: usize,
    pub pruned: u64,
}

impl SweepReport {
    pub fn changed(&self) -> usize {
        self.confirmed + self.conflicted
    }
}

fn evidence_from_payment(payment: &Payment) -> PaymentEvidence {
    PaymentEvidence {
        order_id: Some(payment.gateway_order_id.clone()),
        payment_id: payment.gateway_payment_id.clone(),
        amount: Some(payment.amount),
        currency: Some(payment.currency.clone()),
        receipt: payment.receipt.clone(),
    }
}

pub struct ReconciliationSweeper {
    store: Arc<dyn BookingStore>,
    state_machine: Arc<BookingStateMachine>,
    gateway: Arc<dyn PaymentGateway>,
    config: ReconcileConfig,
}

impl ReconciliationSweeper {
    pub fn new(
        store: Arc<dyn BookingStore>,
        state_machine: Arc<BookingStateMachine>,
        gateway: Arc<dyn PaymentGateway>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            state_machine,
            gateway,
            config,
        }
    }

    pub async fn run_pass(&self) -> Result<SweepReport, DatabaseError> {
        let now = Utc::now();
        let since = now - chrono::Duration::hours(self.config.lookback_hours);
        let created_before = now - chrono::Duration::seconds(self.config.probe_min_age_secs);

        let candidates = self
            .store
            .find_reconcile_candidates(since, created_before, self.config.batch_size)
            .await?;

        let mut report = SweepReport {
            examined: candidates.len(),
            ..SweepReport::default()
        };

        for candidate in candidates {
            let evidence = match candidate.payment.status {
                PaymentStatus::Captured => Some(evidence_from_payment(&candidate.payment)),
                _ => match self.probe_gateway(&candidate.payment).await {
                    Ok(evidence) => evidence,
                    Err(e) => {
                        warn!(
                            booking_id = %candidate.booking_id,
                            order_id = %candidate.payment.gateway_order_id,
                            error = %e,
                            "gateway probe failed during reconciliation"
                        );
                        report.errors += 1;
                        continue;
                    }
                },
            };

            let Some(evidence) = evidence else {
                report.unchanged += 1;
                continue;
            };

            match self
                .state_machine
                .try_confirm(candidate.booking_id, &evidence)
                .await
            {
                Ok(Some(stored)) => match stored.outcome {
                    TransitionOutcome::Confirmed => report.confirmed += 1,
                    TransitionOutcome::CapturedConflict { .. } if stored.written => {
                        report.conflicted += 1
                    }
                    _ => report.unchanged += 1,
                },
                Ok(None) => {
                    debug!(booking_id = %candidate.booking_id, "booking busy; skipping this pass");
                    report.skipped_locked += 1;
                }
                Err(e) => {
                    error!(
                        booking_id = %candidate.booking_id,
                        error = %e,
                        "reconciliation transition failed"
                    );
                    report.errors += 1;
                }
            }
        }

        let retention_cutoff = now - chrono::Duration::days(self.config.ledger_retention_days);
        match self.store.prune_events_before(retention_cutoff).await {
            Ok(pruned) => report.pruned = pruned,
            Err(e) => {
                warn!(error = %e, "ledger pruning failed");
                report.errors += 1;
            }
        }

        if report.examined > 0 || report.pruned > 0 {
            info!(
                examined = report.examined,
                confirmed = report.confirmed,
                conflicted = report.conflicted,
                skipped_locked = report.skipped_locked,
                unchanged = report.unchanged,
                errors = report.errors,
                pruned = report.pruned,
                "reconciliation pass finished"
            );
        }
        Ok(report)
    }

    /// Asks the gateway whether an open order has a captured payment.
    async fn probe_gateway(
        &self,
        payment: &Payment,
    ) -> Result<Option<PaymentEvidence>, crate::payments::error::GatewayError> {
        let payments = self
            .gateway
            .fetch_order_payments(&payment.gateway_order_id)
            .await?;

        Ok(payments.into_iter().find(|p| p.is_captured()).map(|captured| {
            PaymentEvidence {
                order_id: Some(payment.gateway_order_id.clone()),
                payment_id: Some(captured.id),
                amount: captured.amount.or(Some(payment.amount)),
                currency: captured.currency.or_else(|| Some(payment.currency.clone())),
                receipt: payment.receipt.clone(),
            }
        }))
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.interval_secs,
            lookback_hours = self.config.lookback_hours,
            batch_size = self.config.batch_size,
            "reconciliation sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_pass().await {
                        error!(error = %e, "reconciliation pass failed");
                    }
                }
            }
        }

        info!("reconciliation sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn evidence_carries_order_and_payment_ids() {
        let payment = Payment {
            id: Uuid::new_v4(),
            booking_id: Uuid::new_v4(),
            gateway_order_id: "order_r1".to_string(),
            gateway_payment_id: Some("pay_r1".to_string()),
            amount: 25_000,
            currency: "INR".to_string(),
            receipt: None,
            status: PaymentStatus::Captured,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let evidence = evidence_from_payment(&payment);
        assert_eq!(evidence.order_id.as_deref(), Some("order_r1"));
        assert_eq!(evidence.payment_id.as_deref(), Some("pay_r1"));
        assert_eq!(evidence.amount, Some(25_000));
    }

    #[test]
    fn changed_counts_confirmations_and_conflicts() {
        let report = SweepReport {
            confirmed: 2,
            conflicted: 1,
            unchanged: 4,
            ..SweepReport::default()
        };
        assert_eq!(report.changed(), 3);
    }
}

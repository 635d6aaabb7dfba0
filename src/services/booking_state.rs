//! Booking state machine.
//!
//! Booking status moves `pending -> confirmed | cancelled | captured_conflict` and never
//! back. Payment status follows the gateway but only ever moves up the precedence ladder
//! `pending < failed < paid < partially_refunded < refunded`; a late, lower-ranked event
//! is reported as stale and dropped.
//!
//! The `decide_*` functions are pure and run inside the store's locked unit of work, so the
//! conflict check and the write that depends on it see the same snapshot.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::models::{
    BookingPaymentStatus, BookingStatus, NewPayment, PaymentStatus, SlotWindow,
};
use crate::database::store::{
    BookingStore, DecideFn, LockMode, PaymentWrite, StoredTransition, TransitionContext,
    TransitionDecision, TransitionPlan, TransitionResult, TransitionScope,
};
use crate::services::notification::{NotificationService, OperatorAlert};
use crate::services::slot_conflict::find_conflicts;

/// What the gateway told us about the payment behind a transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentEvidence {
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    /// Minor units.
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub receipt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Confirmed,
    AlreadyConfirmed,
    CapturedConflict { reasons: Vec<String> },
    AlreadyConflicted,
    /// Capture recorded on a cancelled booking; it stays cancelled.
    PaidWhileCancelled,
    PaymentFailed,
    Refunded { partial: bool },
    /// The same status was already recorded.
    AlreadyApplied,
    Stale {
        current: BookingPaymentStatus,
        incoming: BookingPaymentStatus,
    },
}

impl TransitionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionOutcome::Confirmed => "confirmed",
            TransitionOutcome::AlreadyConfirmed => "already_confirmed",
            TransitionOutcome::CapturedConflict { .. } => "captured_conflict",
            TransitionOutcome::AlreadyConflicted => "already_conflicted",
            TransitionOutcome::PaidWhileCancelled => "paid_while_cancelled",
            TransitionOutcome::PaymentFailed => "payment_failed",
            TransitionOutcome::Refunded { partial: true } => "partially_refunded",
            TransitionOutcome::Refunded { partial: false } => "refunded",
            TransitionOutcome::AlreadyApplied => "already_applied",
            TransitionOutcome::Stale { .. } => "stale",
        }
    }
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("booking {0} not found")]
    BookingNotFound(Uuid),
    #[error("booking {0} is locked by another transition")]
    Busy(Uuid),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl TransitionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TransitionError::BookingNotFound(_) => false,
            TransitionError::Busy(_) => true,
            TransitionError::Database(err) => err.is_retryable(),
        }
    }
}

// ----------------------------------------------------------------------------
// Pure decisions
// ----------------------------------------------------------------------------

fn payment_write(
    ctx: &TransitionContext,
    target: PaymentStatus,
    evidence: &PaymentEvidence,
) -> Option<PaymentWrite> {
    match &ctx.payment {
        Some(payment) if payment.status == target => {
            // Still fill in a payment id we did not know yet.
            match (&payment.gateway_payment_id, &evidence.payment_id) {
                (None, Some(id)) => Some(PaymentWrite::Update {
                    status: target,
                    gateway_payment_id: Some(id.clone()),
                }),
                _ => None,
            }
        }
        Some(payment) if payment.status.rank() > target.rank() => None,
        Some(_) => Some(PaymentWrite::Update {
            status: target,
            gateway_payment_id: evidence.payment_id.clone(),
        }),
        None => evidence.order_id.as_ref().map(|order_id| {
            PaymentWrite::Insert(NewPayment {
                booking_id: ctx.booking.id,
                gateway_order_id: order_id.clone(),
                gateway_payment_id: evidence.payment_id.clone(),
                amount: evidence.amount.unwrap_or(0),
                currency: evidence.currency.clone().unwrap_or_default(),
                receipt: evidence.receipt.clone(),
                status: target,
            })
        }),
    }
}

fn stale(current: BookingPaymentStatus, incoming: BookingPaymentStatus) -> TransitionDecision {
    TransitionDecision::no_op(TransitionOutcome::Stale { current, incoming })
}

pub fn decide_confirm(ctx: &TransitionContext, evidence: &PaymentEvidence) -> TransitionDecision {
    let booking = &ctx.booking;
    let paid = BookingPaymentStatus::Paid;

    match booking.status {
        BookingStatus::Confirmed => {
            if booking.payment_status == paid {
                TransitionDecision::no_op(TransitionOutcome::AlreadyConfirmed)
            } else {
                stale(booking.payment_status, paid)
            }
        }
        BookingStatus::CapturedConflict => {
            TransitionDecision::no_op(TransitionOutcome::AlreadyConflicted)
        }
        BookingStatus::Cancelled => {
            if booking.payment_status == paid {
                TransitionDecision::no_op(TransitionOutcome::AlreadyApplied)
            } else if booking.payment_status.rank() > paid.rank() {
                stale(booking.payment_status, paid)
            } else {
                TransitionDecision {
                    plan: Some(TransitionPlan {
                        status: BookingStatus::Cancelled,
                        payment_status: paid,
                        payment: payment_write(ctx, PaymentStatus::Captured, evidence),
                    }),
                    outcome: TransitionOutcome::PaidWhileCancelled,
                }
            }
        }
        BookingStatus::Pending => {
            if booking.payment_status.rank() > paid.rank() {
                return stale(booking.payment_status, paid);
            }

            let windows: Vec<SlotWindow> = ctx.slots.iter().map(|s| s.window()).collect();
            let conflicts = find_conflicts(&windows, &ctx.occupied, &ctx.blocked);
            let payment = payment_write(ctx, PaymentStatus::Captured, evidence);

            if conflicts.is_empty() {
                TransitionDecision {
                    plan: Some(TransitionPlan {
                        status: BookingStatus::Confirmed,
                        payment_status: paid,
                        payment,
                    }),
                    outcome: TransitionOutcome::Confirmed,
                }
            } else {
                TransitionDecision {
                    plan: Some(TransitionPlan {
                        status: BookingStatus::CapturedConflict,
                        payment_status: paid,
                        payment,
                    }),
                    outcome: TransitionOutcome::CapturedConflict {
                        reasons: conflicts.iter().map(|c| c.to_string()).collect(),
                    },
                }
            }
        }
    }
}

pub fn decide_fail(ctx: &TransitionContext, evidence: &PaymentEvidence) -> TransitionDecision {
    let booking = &ctx.booking;
    let failed = BookingPaymentStatus::Failed;

    if booking.payment_status == failed {
        return TransitionDecision::no_op(TransitionOutcome::AlreadyApplied);
    }
    if booking.payment_status.rank() > failed.rank() {
        return stale(booking.payment_status, failed);
    }

    TransitionDecision {
        plan: Some(TransitionPlan {
            status: booking.status,
            payment_status: failed,
            payment: payment_write(ctx, PaymentStatus::Failed, evidence),
        }),
        outcome: TransitionOutcome::PaymentFailed,
    }
}

pub fn decide_refund(
    ctx: &TransitionContext,
    evidence: &PaymentEvidence,
    partial: bool,
) -> TransitionDecision {
    let booking = &ctx.booking;
    let (target, payment_target) = if partial {
        (
            BookingPaymentStatus::PartiallyRefunded,
            PaymentStatus::PartiallyRefunded,
        )
    } else {
        (BookingPaymentStatus::Refunded, PaymentStatus::Refunded)
    };

    if booking.payment_status == target {
        return TransitionDecision::no_op(TransitionOutcome::AlreadyApplied);
    }
    if booking.payment_status.rank() > target.rank() {
        return stale(booking.payment_status, target);
    }

    TransitionDecision {
        plan: Some(TransitionPlan {
            status: booking.status,
            payment_status: target,
            payment: payment_write(ctx, payment_target, evidence),
        }),
        outcome: TransitionOutcome::Refunded { partial },
    }
}

// ----------------------------------------------------------------------------
// State machine
// ----------------------------------------------------------------------------

pub struct BookingStateMachine {
    store: Arc<dyn BookingStore>,
    notifier: Arc<NotificationService>,
}

impl BookingStateMachine {
    pub fn new(store: Arc<dyn BookingStore>, notifier: Arc<NotificationService>) -> Self {
        Self { store, notifier }
    }

    /// Confirms a paid booking, waiting for any concurrent transition on it.
    pub async fn confirm(
        &self,
        booking_id: Uuid,
        evidence: &PaymentEvidence,
    ) -> Result<StoredTransition, TransitionError> {
        let decide = |ctx: &TransitionContext| decide_confirm(ctx, evidence);
        self.run(booking_id, TransitionScope::WithConflicts, LockMode::Wait, &decide)
            .await?
            .ok_or(TransitionError::Busy(booking_id))
    }

    /// Like `confirm`, but returns `None` when another transition holds the booking.
    pub async fn try_confirm(
        &self,
        booking_id: Uuid,
        evidence: &PaymentEvidence,
    ) -> Result<Option<StoredTransition>, TransitionError> {
        let decide = |ctx: &TransitionContext| decide_confirm(ctx, evidence);
        self.run(
            booking_id,
            TransitionScope::WithConflicts,
            LockMode::SkipLocked,
            &decide,
        )
        .await
    }

    pub async fn fail(
        &self,
        booking_id: Uuid,
        evidence: &PaymentEvidence,
    ) -> Result<StoredTransition, TransitionError> {
        let decide = |ctx: &TransitionContext| decide_fail(ctx, evidence);
        self.run(booking_id, TransitionScope::BookingOnly, LockMode::Wait, &decide)
            .await?
            .ok_or(TransitionError::Busy(booking_id))
    }

    pub async fn refund(
        &self,
        booking_id: Uuid,
        evidence: &PaymentEvidence,
        partial: bool,
    ) -> Result<StoredTransition, TransitionError> {
        let decide = |ctx: &TransitionContext| decide_refund(ctx, evidence, partial);
        self.run(booking_id, TransitionScope::BookingOnly, LockMode::Wait, &decide)
            .await?
            .ok_or(TransitionError::Busy(booking_id))
    }

    async fn run(
        &self,
        booking_id: Uuid,
        scope: TransitionScope,
        lock: LockMode,
        decide: &DecideFn<'_>,
    ) -> Result<Option<StoredTransition>, TransitionError> {
        let stored = match self
            .store
            .apply_transition(booking_id, scope, lock, decide)
            .await?
        {
            TransitionResult::Applied(stored) => stored,
            TransitionResult::Busy => return Ok(None),
            TransitionResult::Missing => return Err(TransitionError::BookingNotFound(booking_id)),
        };

        match &stored.outcome {
            TransitionOutcome::Stale { current, incoming } => {
                info!(
                    booking_id = %booking_id,
                    current = %current,
                    incoming = %incoming,
                    "stale payment event ignored"
                );
            }
            TransitionOutcome::CapturedConflict { reasons } if stored.written => {
                warn!(booking_id = %booking_id, "payment captured but slots are taken");
                self.notifier.alert(OperatorAlert::CapturedConflict {
                    booking_id,
                    reasons: reasons.clone(),
                });
            }
            TransitionOutcome::PaidWhileCancelled if stored.written => {
                self.notifier.alert(OperatorAlert::PaidWhileCancelled {
                    booking_id,
                    order_id: stored
                        .payment
                        .as_ref()
                        .map(|p| p.gateway_order_id.clone())
                        .unwrap_or_default(),
                });
            }
            outcome => {
                info!(
                    booking_id = %booking_id,
                    outcome = outcome.as_str(),
                    status = %stored.booking.status,
                    payment_status = %stored.booking.payment_status,
                    written = stored.written,
                    "booking transition"
                );
            }
        }

        Ok(Some(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{BlockedSlot, Booking, BookingSlot, OccupiedSlot, Payment};
    use bigdecimal::BigDecimal;
    use chrono::{NaiveDate, Utc};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, 2).unwrap()
    }

    fn context(status: BookingStatus, payment_status: BookingPaymentStatus) -> TransitionContext {
        let booking_id = Uuid::new_v4();
        TransitionContext {
            booking: Booking {
                id: booking_id,
                customer_id: Uuid::new_v4(),
                service_id: Uuid::new_v4(),
                booking_date: date(),
                display_start: "10:00".to_string(),
                display_end: "12:00".to_string(),
                total_amount: BigDecimal::from(4000),
                advance_amount: BigDecimal::from(1000),
                status,
                payment_status,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            slots: vec![BookingSlot {
                id: Uuid::new_v4(),
                booking_id,
                slot_date: date(),
                start_minute: 600,
                end_minute: 720,
            }],
            payment: Some(Payment {
                id: Uuid::new_v4(),
                booking_id,
                gateway_order_id: "order_1".to_string(),
                gateway_payment_id: None,
                amount: 100_000,
                currency: "INR".to_string(),
                receipt: Some(format!("bk_{}", booking_id)),
                status: PaymentStatus::Created,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }),
            occupied: Vec::new(),
            blocked: Vec::new(),
        }
    }

    fn evidence() -> PaymentEvidence {
        PaymentEvidence {
            order_id: Some("order_1".to_string()),
            payment_id: Some("pay_1".to_string()),
            amount: Some(100_000),
            currency: Some("INR".to_string()),
            receipt: None,
        }
    }

    #[test]
    fn confirms_free_pending_booking() {
        let ctx = context(BookingStatus::Pending, BookingPaymentStatus::Pending);
        let decision = decide_confirm(&ctx, &evidence());

        assert_eq!(decision.outcome, TransitionOutcome::Confirmed);
        let plan = decision.plan.unwrap();
        assert_eq!(plan.status, BookingStatus::Confirmed);
        assert_eq!(plan.payment_status, BookingPaymentStatus::Paid);
        assert_eq!(
            plan.payment,
            Some(PaymentWrite::Update {
                status: PaymentStatus::Captured,
                gateway_payment_id: Some("pay_1".to_string()),
            })
        );
    }

    #[test]
    fn conflicting_capture_becomes_captured_conflict() {
        let mut ctx = context(BookingStatus::Pending, BookingPaymentStatus::Pending);
        ctx.occupied.push(OccupiedSlot {
            booking_id: Uuid::new_v4(),
            slot_date: date(),
            start_minute: 660,
            end_minute: 720,
        });

        let decision = decide_confirm(&ctx, &evidence());
        let plan = decision.plan.unwrap();
        assert_eq!(plan.status, BookingStatus::CapturedConflict);
        assert_eq!(plan.payment_status, BookingPaymentStatus::Paid);
        match decision.outcome {
            TransitionOutcome::CapturedConflict { reasons } => assert_eq!(reasons.len(), 1),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn blocked_time_also_conflicts() {
        let mut ctx = context(BookingStatus::Pending, BookingPaymentStatus::Failed);
        ctx.blocked.push(BlockedSlot {
            id: Uuid::new_v4(),
            blocked_date: date(),
            start_minute: 540,
            end_minute: 610,
            reason: Some("Holiday".to_string()),
        });
        let decision = decide_confirm(&ctx, &evidence());
        assert!(matches!(
            decision.outcome,
            TransitionOutcome::CapturedConflict { .. }
        ));
    }

    #[test]
    fn confirmed_booking_is_not_rewritten() {
        let ctx = context(BookingStatus::Confirmed, BookingPaymentStatus::Paid);
        let decision = decide_confirm(&ctx, &evidence());
        assert!(decision.plan.is_none());
        assert_eq!(decision.outcome, TransitionOutcome::AlreadyConfirmed);
    }

    #[test]
    fn captured_conflict_is_sticky() {
        let ctx = context(BookingStatus::CapturedConflict, BookingPaymentStatus::Paid);
        let decision = decide_confirm(&ctx, &evidence());
        assert!(decision.plan.is_none());
        assert_eq!(decision.outcome, TransitionOutcome::AlreadyConflicted);
    }

    #[test]
    fn capture_on_cancelled_booking_records_payment_only() {
        let ctx = context(BookingStatus::Cancelled, BookingPaymentStatus::Pending);
        let decision = decide_confirm(&ctx, &evidence());
        assert_eq!(decision.outcome, TransitionOutcome::PaidWhileCancelled);
        let plan = decision.plan.unwrap();
        assert_eq!(plan.status, BookingStatus::Cancelled);
        assert_eq!(plan.payment_status, BookingPaymentStatus::Paid);
    }

    #[test]
    fn late_failure_after_capture_is_stale() {
        let ctx = context(BookingStatus::Confirmed, BookingPaymentStatus::Paid);
        let decision = decide_fail(&ctx, &evidence());
        assert!(decision.plan.is_none());
        assert_eq!(
            decision.outcome,
            TransitionOutcome::Stale {
                current: BookingPaymentStatus::Paid,
                incoming: BookingPaymentStatus::Failed,
            }
        );
    }

    #[test]
    fn failure_keeps_booking_status() {
        let ctx = context(BookingStatus::Pending, BookingPaymentStatus::Pending);
        let plan = decide_fail(&ctx, &evidence()).plan.unwrap();
        assert_eq!(plan.status, BookingStatus::Pending);
        assert_eq!(plan.payment_status, BookingPaymentStatus::Failed);
    }

    #[test]
    fn refund_never_cancels() {
        let ctx = context(BookingStatus::Confirmed, BookingPaymentStatus::Paid);
        let decision = decide_refund(&ctx, &evidence(), false);
        let plan = decision.plan.unwrap();
        assert_eq!(plan.status, BookingStatus::Confirmed);
        assert_eq!(plan.payment_status, BookingPaymentStatus::Refunded);
    }

    #[test]
    fn partial_refund_after_full_refund_is_stale() {
        let ctx = context(BookingStatus::Confirmed, BookingPaymentStatus::Refunded);
        let decision = decide_refund(&ctx, &evidence(), true);
        assert!(decision.plan.is_none());
        assert!(matches!(decision.outcome, TransitionOutcome::Stale { .. }));
    }

    #[test]
    fn missing_payment_row_is_inserted_from_evidence() {
        let mut ctx = context(BookingStatus::Pending, BookingPaymentStatus::Pending);
        ctx.payment = None;
        let plan = decide_confirm(&ctx, &evidence()).plan.unwrap();
        match plan.payment {
            Some(PaymentWrite::Insert(new_payment)) => {
                assert_eq!(new_payment.gateway_order_id, "order_1");
                assert_eq!(new_payment.status, PaymentStatus::Captured);
            }
            other => panic!("unexpected payment write {:?}", other),
        }
    }
}

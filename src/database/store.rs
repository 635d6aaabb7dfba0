//! Storage seam shared by the Postgres repository and the in-memory store.
//!
//! Booking transitions run as one unit of work: the store locks the booking,
//! loads everything the decision needs, calls the decision function, and writes
//! the booking and payment rows before releasing the lock. The decision logic
//! itself lives in `services::booking_state` and never touches storage.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::models::{
    BlockedSlot, Booking, BookingPaymentStatus, BookingSlot, BookingStatus, LedgerEntry,
    LedgerRecord, LedgerStatus, NewLedgerEvent, NewPayment, OccupiedSlot, Payment,
    PaymentStatus, ReconcileCandidate,
};
use crate::services::booking_state::TransitionOutcome;

/// How to treat a booking row that another transaction already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Wait,
    SkipLocked,
}

/// Whether the transition needs the competing-slot snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionScope {
    BookingOnly,
    WithConflicts,
}

/// Everything a transition decision may look at, read under lock.
#[derive(Debug, Clone)]
pub struct TransitionContext {
    pub booking: Booking,
    pub slots: Vec<BookingSlot>,
    pub payment: Option<Payment>,
    /// Slots of other confirmed+paid bookings of the same service on the booking's dates.
    pub occupied: Vec<OccupiedSlot>,
    pub blocked: Vec<BlockedSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentWrite {
    /// Update the booking's existing payment row.
    Update {
        status: PaymentStatus,
        gateway_payment_id: Option<String>,
    },
    /// The booking has no payment row yet.
    Insert(NewPayment),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub status: BookingStatus,
    pub payment_status: BookingPaymentStatus,
    pub payment: Option<PaymentWrite>,
}

#[derive(Debug, Clone)]
pub struct TransitionDecision {
    /// `None` means nothing is written.
    pub plan: Option<TransitionPlan>,
    pub outcome: TransitionOutcome,
}

impl TransitionDecision {
    pub fn no_op(outcome: TransitionOutcome) -> Self {
        Self {
            plan: None,
            outcome,
        }
    }
}

pub type DecideFn<'a> = dyn Fn(&TransitionContext) -> TransitionDecision + Send + Sync + 'a;

#[derive(Debug, Clone)]
pub struct StoredTransition {
    pub outcome: TransitionOutcome,
    pub booking: Booking,
    pub payment: Option<Payment>,
    pub written: bool,
}

#[derive(Debug, Clone)]
pub enum TransitionResult {
    Applied(StoredTransition),
    /// Another unit of work holds the booking (only with `LockMode::SkipLocked`).
    Busy,
    Missing,
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    // --- idempotency ledger ---

    /// Atomic insert; an existing key yields `is_new = false` and the existing row id.
    async fn record_event_if_new(&self, event: &NewLedgerEvent)
        -> Result<LedgerEntry, DatabaseError>;

    async fn mark_event(
        &self,
        record_id: Uuid,
        status: LedgerStatus,
        error: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Claims ledger rows left unfinished before `stale_before`, bumping their attempt count.
    async fn claim_stale_events(
        &self,
        stale_before: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<LedgerRecord>, DatabaseError>;

    async fn prune_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError>;

    // --- bookings and slots ---

    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, DatabaseError>;

    async fn find_slots(&self, booking_id: Uuid) -> Result<Vec<BookingSlot>, DatabaseError>;

    async fn occupied_slots(
        &self,
        service_id: Uuid,
        dates: &[NaiveDate],
        exclude_booking_id: Option<Uuid>,
    ) -> Result<Vec<OccupiedSlot>, DatabaseError>;

    async fn blocked_slots(&self, dates: &[NaiveDate]) -> Result<Vec<BlockedSlot>, DatabaseError>;

    // --- payments ---

    async fn find_payment_by_order(&self, order_id: &str)
        -> Result<Option<Payment>, DatabaseError>;

    async fn find_payment_by_gateway_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<Payment>, DatabaseError>;

    async fn find_payment_by_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<Payment>, DatabaseError>;

    /// Repairs the order → booking link; concurrent calls for one order yield one row.
    async fn link_order(&self, payment: &NewPayment) -> Result<Payment, DatabaseError>;

    /// Records a freshly opened order, keyed by booking.
    async fn upsert_order_for_booking(&self, payment: &NewPayment)
        -> Result<Payment, DatabaseError>;

    // --- transitions ---

    async fn apply_transition(
        &self,
        booking_id: Uuid,
        scope: TransitionScope,
        lock: LockMode,
        decide: &DecideFn<'_>,
    ) -> Result<TransitionResult, DatabaseError>;

    /// Pending, unpaid bookings whose payment row was touched after `since` and is either
    /// captured, or still `created` from before `created_before`.
    async fn find_reconcile_candidates(
        &self,
        since: DateTime<Utc>,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ReconcileCandidate>, DatabaseError>;

    async fn ping(&self) -> Result<(), DatabaseError>;
}

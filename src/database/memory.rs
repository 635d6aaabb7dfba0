//! In-memory `BookingStore` used by tests and by `SKIP_EXTERNALS` runs.
//!
//! All data sits behind one `RwLock`, which makes every trait call atomic. Per-booking
//! and per-service mutexes mirror the row lock and advisory lock of the Postgres
//! store so that skip-locked behaviour can be exercised without a database.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{
    BlockedSlot, Booking, BookingPaymentStatus, BookingSlot, BookingStatus, LedgerEntry,
    LedgerRecord, LedgerStatus, NewLedgerEvent, NewPayment, OccupiedSlot, Payment,
    PaymentStatus, ReconcileCandidate, SlotWindow,
};
use crate::database::store::{
    BookingStore, DecideFn, LockMode, PaymentWrite, StoredTransition, TransitionContext,
    TransitionResult, TransitionScope,
};

#[derive(Default)]
struct MemoryState {
    bookings: HashMap<Uuid, Booking>,
    slots: HashMap<Uuid, Vec<BookingSlot>>,
    blocked: Vec<BlockedSlot>,
    /// Keyed by payment row id.
    payments: HashMap<Uuid, Payment>,
    /// Keyed by idempotency key.
    ledger: HashMap<String, LedgerRecord>,
}

impl MemoryState {
    fn payment_by_order(&self, order_id: &str) -> Option<&Payment> {
        self.payments
            .values()
            .find(|p| p.gateway_order_id == order_id)
    }

    fn payment_by_booking(&self, booking_id: Uuid) -> Option<&Payment> {
        self.payments.values().find(|p| p.booking_id == booking_id)
    }

    fn occupied(
        &self,
        service_id: Uuid,
        dates: &[NaiveDate],
        exclude_booking_id: Option<Uuid>,
    ) -> Vec<OccupiedSlot> {
        self.bookings
            .values()
            .filter(|b| {
                b.service_id == service_id
                    && b.status == BookingStatus::Confirmed
                    && b.payment_status == BookingPaymentStatus::Paid
                    && Some(b.id) != exclude_booking_id
            })
            .flat_map(|b| self.slots.get(&b.id).into_iter().flatten())
            .filter(|s| dates.contains(&s.slot_date))
            .map(|s| OccupiedSlot {
                booking_id: s.booking_id,
                slot_date: s.slot_date,
                start_minute: s.start_minute,
                end_minute: s.end_minute,
            })
            .collect()
    }

    fn blocked_on(&self, dates: &[NaiveDate]) -> Vec<BlockedSlot> {
        self.blocked
            .iter()
            .filter(|b| dates.contains(&b.blocked_date))
            .cloned()
            .collect()
    }

    fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, DatabaseError> {
        if self.payment_by_booking(payment.booking_id).is_some() {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "payments_booking_id_key".to_string(),
            }));
        }
        let now = Utc::now();
        let row = Payment {
            id: Uuid::new_v4(),
            booking_id: payment.booking_id,
            gateway_order_id: payment.gateway_order_id.clone(),
            gateway_payment_id: payment.gateway_payment_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            receipt: payment.receipt.clone(),
            status: payment.status,
            created_at: now,
            updated_at: now,
        };
        self.payments.insert(row.id, row.clone());
        Ok(row)
    }
}

type LockMap = Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>;

fn lock_for(map: &LockMap, id: Uuid) -> Arc<AsyncMutex<()>> {
    let mut locks = match map.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    locks
        .entry(id)
        .or_insert_with(|| Arc::new(AsyncMutex::new(())))
        .clone()
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
    booking_locks: LockMap,
    service_locks: LockMap,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a pending, unpaid booking covering `windows` and returns it.
    pub async fn seed_pending_booking(
        &self,
        service_id: Uuid,
        windows: &[SlotWindow],
        advance_amount: BigDecimal,
    ) -> Booking {
        let now = Utc::now();
        let first = windows.first().copied();
        let booking = Booking {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            service_id,
            booking_date: first.map(|w| w.date).unwrap_or_else(|| now.date_naive()),
            display_start: first.map(|w| clock(w.start_minute)).unwrap_or_default(),
            display_end: windows
                .last()
                .map(|w| clock(w.end_minute))
                .unwrap_or_default(),
            total_amount: advance_amount.clone() * BigDecimal::from(4),
            advance_amount,
            status: BookingStatus::Pending,
            payment_status: BookingPaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.insert_booking(booking.clone(), windows).await;
        booking
    }

    pub async fn insert_booking(&self, booking: Booking, windows: &[SlotWindow]) {
        let slots = windows
            .iter()
            .map(|w| BookingSlot {
                id: Uuid::new_v4(),
                booking_id: booking.id,
                slot_date: w.date,
                start_minute: w.start_minute,
                end_minute: w.end_minute,
            })
            .collect();
        let mut state = self.state.write().await;
        state.slots.insert(booking.id, slots);
        state.bookings.insert(booking.id, booking);
    }

    pub async fn insert_blocked_slot(&self, window: SlotWindow, reason: Option<&str>) {
        self.state.write().await.blocked.push(BlockedSlot {
            id: Uuid::new_v4(),
            blocked_date: window.date,
            start_minute: window.start_minute,
            end_minute: window.end_minute,
            reason: reason.map(str::to_string),
        });
    }

    pub async fn insert_payment(&self, payment: &NewPayment) -> Result<Payment, DatabaseError> {
        self.state.write().await.insert_payment(payment)
    }

    /// Moves a payment's timestamps into the past.
    pub async fn backdate_payment(&self, booking_id: Uuid, by: Duration) {
        let mut state = self.state.write().await;
        if let Some(payment) = state.payments.values_mut().find(|p| p.booking_id == booking_id) {
            payment.created_at = payment.created_at - by;
            payment.updated_at = payment.updated_at - by;
        }
    }

    /// Moves a ledger row's timestamps into the past.
    pub async fn backdate_event(&self, idempotency_key: &str, by: Duration) {
        let mut state = self.state.write().await;
        if let Some(record) = state.ledger.get_mut(idempotency_key) {
            record.received_at = record.received_at - by;
            record.updated_at = record.updated_at - by;
        }
    }

    pub async fn payments_for_booking(&self, booking_id: Uuid) -> Vec<Payment> {
        self.state
            .read()
            .await
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect()
    }

    pub async fn ledger_records(&self) -> Vec<LedgerRecord> {
        let mut records: Vec<LedgerRecord> =
            self.state.read().await.ledger.values().cloned().collect();
        records.sort_by_key(|r| r.received_at);
        records
    }

    /// Holds the booking's row lock until the guard is dropped.
    pub async fn lock_booking(&self, booking_id: Uuid) -> OwnedMutexGuard<()> {
        lock_for(&self.booking_locks, booking_id).lock_owned().await
    }
}

fn clock(minute: i32) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn record_event_if_new(
        &self,
        event: &NewLedgerEvent,
    ) -> Result<LedgerEntry, DatabaseError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.ledger.get(&event.idempotency_key) {
            return Ok(LedgerEntry {
                is_new: false,
                record_id: existing.id,
            });
        }

        let now = Utc::now();
        let record = LedgerRecord {
            id: Uuid::new_v4(),
            idempotency_key: event.idempotency_key.clone(),
            key_source: event.key_source,
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            status: LedgerStatus::Received,
            attempts: 0,
            last_error: None,
            received_at: now,
            updated_at: now,
            processed_at: None,
        };
        let record_id = record.id;
        state.ledger.insert(event.idempotency_key.clone(), record);
        Ok(LedgerEntry {
            is_new: true,
            record_id,
        })
    }

    async fn mark_event(
        &self,
        record_id: Uuid,
        status: LedgerStatus,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        if let Some(record) = state.ledger.values_mut().find(|r| r.id == record_id) {
            let now = Utc::now();
            record.status = status;
            record.last_error = error.map(str::to_string);
            record.updated_at = now;
            if status == LedgerStatus::Processing {
                record.attempts += 1;
            }
            if matches!(status, LedgerStatus::Processed | LedgerStatus::Unresolved) {
                record.processed_at = Some(now);
            }
        }
        Ok(())
    }

    async fn claim_stale_events(
        &self,
        stale_before: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<LedgerRecord>, DatabaseError> {
        let mut state = self.state.write().await;
        let mut stale: Vec<&mut LedgerRecord> = state
            .ledger
            .values_mut()
            .filter(|r| {
                matches!(
                    r.status,
                    LedgerStatus::Received | LedgerStatus::Processing | LedgerStatus::Failed
                ) && r.updated_at < stale_before
                    && r.attempts < max_attempts
            })
            .collect();
        stale.sort_by_key(|r| r.received_at);

        let now = Utc::now();
        Ok(stale
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|record| {
                record.status = LedgerStatus::Processing;
                record.attempts += 1;
                record.updated_at = now;
                record.clone()
            })
            .collect())
    }

    async fn prune_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut state = self.state.write().await;
        let before = state.ledger.len();
        state.ledger.retain(|_, r| r.received_at >= cutoff);
        Ok((before - state.ledger.len()) as u64)
    }

    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, DatabaseError> {
        Ok(self.state.read().await.bookings.get(&booking_id).cloned())
    }

    async fn find_slots(&self, booking_id: Uuid) -> Result<Vec<BookingSlot>, DatabaseError> {
        Ok(self
            .state
            .read()
            .await
            .slots
            .get(&booking_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn occupied_slots(
        &self,
        service_id: Uuid,
        dates: &[NaiveDate],
        exclude_booking_id: Option<Uuid>,
    ) -> Result<Vec<OccupiedSlot>, DatabaseError> {
        Ok(self
            .state
            .read()
            .await
            .occupied(service_id, dates, exclude_booking_id))
    }

    async fn blocked_slots(&self, dates: &[NaiveDate]) -> Result<Vec<BlockedSlot>, DatabaseError> {
        Ok(self.state.read().await.blocked_on(dates))
    }

    async fn find_payment_by_order(
        &self,
        order_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        Ok(self.state.read().await.payment_by_order(order_id).cloned())
    }

    async fn find_payment_by_gateway_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .find(|p| p.gateway_payment_id.as_deref() == Some(payment_id))
            .cloned())
    }

    async fn find_payment_by_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<Payment>, DatabaseError> {
        Ok(self.state.read().await.payment_by_booking(booking_id).cloned())
    }

    async fn link_order(&self, payment: &NewPayment) -> Result<Payment, DatabaseError> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        if let Some(existing_id) = state
            .payment_by_order(&payment.gateway_order_id)
            .map(|p| p.id)
        {
            let row = state
                .payments
                .get_mut(&existing_id)
                .ok_or_else(|| DatabaseError::invalid_data("payment index out of sync"))?;
            if row.gateway_payment_id.is_none() && payment.gateway_payment_id.is_some() {
                row.gateway_payment_id = payment.gateway_payment_id.clone();
                row.updated_at = now;
            }
            return Ok(row.clone());
        }

        if let Some(existing_id) = state.payment_by_booking(payment.booking_id).map(|p| p.id) {
            let row = state
                .payments
                .get_mut(&existing_id)
                .ok_or_else(|| DatabaseError::invalid_data("payment index out of sync"))?;
            if row.status.rank() >= PaymentStatus::Captured.rank() {
                return Err(DatabaseError::invalid_data(format!(
                    "booking {} already settled on order {}",
                    payment.booking_id, row.gateway_order_id
                )));
            }
            row.gateway_order_id = payment.gateway_order_id.clone();
            if payment.gateway_payment_id.is_some() {
                row.gateway_payment_id = payment.gateway_payment_id.clone();
            }
            row.amount = payment.amount;
            row.currency = payment.currency.clone();
            if payment.receipt.is_some() {
                row.receipt = payment.receipt.clone();
            }
            row.updated_at = now;
            return Ok(row.clone());
        }

        state.insert_payment(payment)
    }

    async fn upsert_order_for_booking(
        &self,
        payment: &NewPayment,
    ) -> Result<Payment, DatabaseError> {
        let mut state = self.state.write().await;

        if let Some(existing_id) = state.payment_by_booking(payment.booking_id).map(|p| p.id) {
            let row = state
                .payments
                .get_mut(&existing_id)
                .ok_or_else(|| DatabaseError::invalid_data("payment index out of sync"))?;
            if matches!(row.status, PaymentStatus::Created | PaymentStatus::Failed) {
                row.gateway_order_id = payment.gateway_order_id.clone();
                row.amount = payment.amount;
                row.currency = payment.currency.clone();
                row.receipt = payment.receipt.clone();
                row.status = payment.status;
                row.updated_at = Utc::now();
            }
            return Ok(row.clone());
        }

        state.insert_payment(payment)
    }

    async fn apply_transition(
        &self,
        booking_id: Uuid,
        scope: TransitionScope,
        lock: LockMode,
        decide: &DecideFn<'_>,
    ) -> Result<TransitionResult, DatabaseError> {
        let service_id = match self.state.read().await.bookings.get(&booking_id) {
            Some(booking) => booking.service_id,
            None => return Ok(TransitionResult::Missing),
        };

        let booking_lock = lock_for(&self.booking_locks, booking_id);
        let _row_guard = match lock {
            LockMode::Wait => booking_lock.lock_owned().await,
            LockMode::SkipLocked => match booking_lock.try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => return Ok(TransitionResult::Busy),
            },
        };
        let _service_guard = match scope {
            TransitionScope::WithConflicts => Some(
                lock_for(&self.service_locks, service_id)
                    .lock_owned()
                    .await,
            ),
            TransitionScope::BookingOnly => None,
        };

        let mut state = self.state.write().await;
        let booking = state
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or_else(|| DatabaseError::invalid_data("booking disappeared under lock"))?;
        let slots = state.slots.get(&booking_id).cloned().unwrap_or_default();
        let payment = state.payment_by_booking(booking_id).cloned();

        let (occupied, blocked) = match scope {
            TransitionScope::WithConflicts => {
                let mut dates: Vec<NaiveDate> = slots.iter().map(|s| s.slot_date).collect();
                dates.sort();
                dates.dedup();
                (
                    state.occupied(booking.service_id, &dates, Some(booking_id)),
                    state.blocked_on(&dates),
                )
            }
            TransitionScope::BookingOnly => (Vec::new(), Vec::new()),
        };

        let context = TransitionContext {
            booking,
            slots,
            payment,
            occupied,
            blocked,
        };
        let decision = decide(&context);

        let Some(plan) = decision.plan else {
            return Ok(TransitionResult::Applied(StoredTransition {
                outcome: decision.outcome,
                booking: context.booking,
                payment: context.payment,
                written: false,
            }));
        };

        let now = Utc::now();
        let payment = match plan.payment {
            Some(PaymentWrite::Update {
                status,
                gateway_payment_id,
            }) => match context.payment.as_ref().map(|p| p.id) {
                Some(payment_id) => state.payments.get_mut(&payment_id).map(|row| {
                    row.status = status;
                    if gateway_payment_id.is_some() {
                        row.gateway_payment_id = gateway_payment_id;
                    }
                    row.updated_at = now;
                    row.clone()
                }),
                None => None,
            },
            Some(PaymentWrite::Insert(new_payment)) => {
                match state
                    .payment_by_order(&new_payment.gateway_order_id)
                    .map(|p| p.id)
                {
                    Some(payment_id) => state.payments.get_mut(&payment_id).map(|row| {
                        row.status = new_payment.status;
                        if row.gateway_payment_id.is_none() {
                            row.gateway_payment_id = new_payment.gateway_payment_id.clone();
                        }
                        row.updated_at = now;
                        row.clone()
                    }),
                    None => Some(state.insert_payment(&new_payment)?),
                }
            }
            None => context.payment,
        };

        let booking = state
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| DatabaseError::invalid_data("booking disappeared under lock"))?;
        booking.status = plan.status;
        booking.payment_status = plan.payment_status;
        booking.updated_at = now;
        let booking = booking.clone();

        Ok(TransitionResult::Applied(StoredTransition {
            outcome: decision.outcome,
            booking,
            payment,
            written: true,
        }))
    }

    async fn find_reconcile_candidates(
        &self,
        since: DateTime<Utc>,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ReconcileCandidate>, DatabaseError> {
        let state = self.state.read().await;
        let mut candidates: Vec<ReconcileCandidate> = state
            .payments
            .values()
            .filter(|p| {
                state.bookings.get(&p.booking_id).is_some_and(|b| {
                    b.status == BookingStatus::Pending
                        && b.payment_status != BookingPaymentStatus::Paid
                })
            })
            .filter(|p| p.updated_at >= since)
            .filter(|p| {
                p.status == PaymentStatus::Captured
                    || (p.status == PaymentStatus::Created && p.created_at <= created_before)
            })
            .map(|p| ReconcileCandidate {
                booking_id: p.booking_id,
                payment: p.clone(),
            })
            .collect();
        candidates.sort_by_key(|c| c.payment.updated_at);
        candidates.truncate(limit.max(0) as usize);
        Ok(candidates)
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

//! Persistent entities and their status enums.
//!
//! Statuses are stored as TEXT and parsed through `FromStr` when rows are
//! loaded, so a corrupt value surfaces as a `DatabaseError` instead of a panic.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::database::error::DatabaseError;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DatabaseError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err(DatabaseError::invalid_data(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

/// Lifecycle of the reservation itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    /// Paid, but the slots were taken by the time the payment landed.
    CapturedConflict,
}

text_enum!(BookingStatus {
    Pending => "pending",
    Confirmed => "confirmed",
    Cancelled => "cancelled",
    CapturedConflict => "captured_conflict",
});

impl BookingStatus {
    /// Terminal on the booking-status axis; only operators move a booking out.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Pending)
    }
}

/// Payment progress as seen from the booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingPaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    PartiallyRefunded,
}

text_enum!(BookingPaymentStatus {
    Pending => "pending",
    Paid => "paid",
    Failed => "failed",
    Refunded => "refunded",
    PartiallyRefunded => "partially_refunded",
});

impl BookingPaymentStatus {
    /// Precedence used to discard late, lower-ranked events.
    pub fn rank(&self) -> u8 {
        match self {
            BookingPaymentStatus::Pending => 0,
            BookingPaymentStatus::Failed => 1,
            BookingPaymentStatus::Paid => 2,
            BookingPaymentStatus::PartiallyRefunded => 3,
            BookingPaymentStatus::Refunded => 4,
        }
    }
}

/// Mirror of the gateway's payment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    Captured,
    Failed,
    Refunded,
    PartiallyRefunded,
}

text_enum!(PaymentStatus {
    Created => "created",
    Captured => "captured",
    Failed => "failed",
    Refunded => "refunded",
    PartiallyRefunded => "partially_refunded",
});

impl PaymentStatus {
    pub fn rank(&self) -> u8 {
        match self {
            PaymentStatus::Created => 0,
            PaymentStatus::Failed => 1,
            PaymentStatus::Captured => 2,
            PaymentStatus::PartiallyRefunded => 3,
            PaymentStatus::Refunded => 4,
        }
    }

    /// The booking-side payment status this gateway status implies.
    pub fn booking_status(&self) -> BookingPaymentStatus {
        match self {
            PaymentStatus::Created => BookingPaymentStatus::Pending,
            PaymentStatus::Captured => BookingPaymentStatus::Paid,
            PaymentStatus::Failed => BookingPaymentStatus::Failed,
            PaymentStatus::Refunded => BookingPaymentStatus::Refunded,
            PaymentStatus::PartiallyRefunded => BookingPaymentStatus::PartiallyRefunded,
        }
    }
}

/// A half-open `[start, end)` interval on one calendar date, in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotWindow {
    pub date: NaiveDate,
    pub start_minute: i32,
    pub end_minute: i32,
}

impl SlotWindow {
    pub fn overlaps(&self, other: &SlotWindow) -> bool {
        self.date == other.date
            && self.start_minute < other.end_minute
            && other.start_minute < self.end_minute
    }
}

impl fmt::Display for SlotWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}:{:02}-{:02}:{:02}",
            self.date,
            self.start_minute / 60,
            self.start_minute % 60,
            self.end_minute / 60,
            self.end_minute % 60
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Booking {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub service_id: Uuid,
    pub booking_date: NaiveDate,
    pub display_start: String,
    pub display_end: String,
    pub total_amount: BigDecimal,
    pub advance_amount: BigDecimal,
    pub status: BookingStatus,
    pub payment_status: BookingPaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct BookingRow {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub service_id: Uuid,
    pub booking_date: NaiveDate,
    pub display_start: String,
    pub display_end: String,
    pub total_amount: BigDecimal,
    pub advance_amount: BigDecimal,
    pub status: String,
    pub payment_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = DatabaseError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            customer_id: row.customer_id,
            service_id: row.service_id,
            booking_date: row.booking_date,
            display_start: row.display_start,
            display_end: row.display_end,
            total_amount: row.total_amount,
            advance_amount: row.advance_amount,
            status: row.status.parse()?,
            payment_status: row.payment_status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct BookingSlot {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub slot_date: NaiveDate,
    pub start_minute: i32,
    pub end_minute: i32,
}

impl BookingSlot {
    pub fn window(&self) -> SlotWindow {
        SlotWindow {
            date: self.slot_date,
            start_minute: self.start_minute,
            end_minute: self.end_minute,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct BlockedSlot {
    pub id: Uuid,
    pub blocked_date: NaiveDate,
    pub start_minute: i32,
    pub end_minute: i32,
    pub reason: Option<String>,
}

impl BlockedSlot {
    pub fn window(&self) -> SlotWindow {
        SlotWindow {
            date: self.blocked_date,
            start_minute: self.start_minute,
            end_minute: self.end_minute,
        }
    }
}

/// A slot held by another confirmed, paid booking.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct OccupiedSlot {
    pub booking_id: Uuid,
    pub slot_date: NaiveDate,
    pub start_minute: i32,
    pub end_minute: i32,
}

impl OccupiedSlot {
    pub fn window(&self) -> SlotWindow {
        SlotWindow {
            date: self.slot_date,
            start_minute: self.start_minute,
            end_minute: self.end_minute,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    /// Minor currency units (paise, cents).
    pub amount: i64,
    pub currency: String,
    pub receipt: Option<String>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub receipt: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            booking_id: row.booking_id,
            gateway_order_id: row.gateway_order_id,
            gateway_payment_id: row.gateway_payment_id,
            amount: row.amount,
            currency: row.currency,
            receipt: row.receipt,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Values for creating (or re-linking) a payment row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub booking_id: Uuid,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub receipt: Option<String>,
    pub status: PaymentStatus,
}

/// Where a ledger key came from; weaker sources are logged as such.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    EventId,
    PaymentStatus,
    PayloadDigest,
}

text_enum!(KeySource {
    EventId => "event_id",
    PaymentStatus => "payment_status",
    PayloadDigest => "payload_digest",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Received,
    Processing,
    Processed,
    Failed,
    /// No booking could ever be matched; waiting for manual review.
    Unresolved,
}

text_enum!(LedgerStatus {
    Received => "received",
    Processing => "processing",
    Processed => "processed",
    Failed => "failed",
    Unresolved => "unresolved",
});

#[derive(Debug, Clone)]
pub struct NewLedgerEvent {
    pub idempotency_key: String,
    pub key_source: KeySource,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Outcome of the atomic ledger insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub is_new: bool,
    pub record_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct LedgerRecord {
    pub id: Uuid,
    pub idempotency_key: String,
    pub key_source: KeySource,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: LedgerStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct LedgerRow {
    pub id: Uuid,
    pub idempotency_key: String,
    pub key_source: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<LedgerRow> for LedgerRecord {
    type Error = DatabaseError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        Ok(LedgerRecord {
            id: row.id,
            idempotency_key: row.idempotency_key,
            key_source: row.key_source.parse()?,
            event_type: row.event_type,
            payload: row.payload,
            status: row.status.parse()?,
            attempts: row.attempts,
            last_error: row.last_error,
            received_at: row.received_at,
            updated_at: row.updated_at,
            processed_at: row.processed_at,
        })
    }
}

/// A booking the sweeper should look at, with the payment row that makes it suspicious.
#[derive(Debug, Clone)]
pub struct ReconcileCandidate {
    pub booking_id: Uuid,
    pub payment: Payment,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: i32, end: i32) -> SlotWindow {
        SlotWindow {
            date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            start_minute: start,
            end_minute: end,
        }
    }

    #[test]
    fn status_text_round_trips() {
        assert_eq!(
            "captured_conflict".parse::<BookingStatus>().unwrap(),
            BookingStatus::CapturedConflict
        );
        assert_eq!(BookingPaymentStatus::PartiallyRefunded.as_str(), "partially_refunded");
        assert!("settled".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!BookingStatus::Pending.is_terminal());
        assert!(BookingStatus::Confirmed.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(BookingStatus::CapturedConflict.is_terminal());
    }

    #[test]
    fn payment_rank_orders_lifecycle() {
        assert!(PaymentStatus::Failed.rank() < PaymentStatus::Captured.rank());
        assert!(PaymentStatus::Captured.rank() < PaymentStatus::Refunded.rank());
        assert_eq!(
            PaymentStatus::Captured.booking_status(),
            BookingPaymentStatus::Paid
        );
    }

    #[test]
    fn adjacent_windows_do_not_overlap() {
        assert!(!window(600, 660).overlaps(&window(660, 720)));
        assert!(window(600, 720).overlaps(&window(660, 720)));
        assert!(window(660, 690).overlaps(&window(600, 720)));
    }

    #[test]
    fn windows_on_different_dates_never_overlap() {
        let mut other = window(600, 720);
        other.date = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        assert!(!window(600, 720).overlaps(&other));
    }

    #[test]
    fn window_display_uses_wall_clock() {
        assert_eq!(window(570, 1440).to_string(), "2026-03-14 09:30-24:00");
    }
}

//! Slot conflict detection.
//!
//! Slots are half-open `[start, end)` minute ranges on a calendar date. Wall-clock
//! strings are parsed as plain `HH:MM[:SS]` with no timezone involved, so a slot
//! ending at 11:00 never collides with one starting at 11:00.

use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::models::{BlockedSlot, OccupiedSlot, SlotWindow};
use crate::database::store::BookingStore;
use crate::error::{AppError, AppErrorKind, ValidationError};

pub const MINUTES_PER_DAY: i32 = 24 * 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlotParseError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid time '{0}', expected HH:MM or HH:MM:00")]
    InvalidTime(String),
    #[error("slot must end after it starts ({start} - {end})")]
    EmptyInterval { start: String, end: String },
}

impl From<SlotParseError> for AppError {
    fn from(err: SlotParseError) -> Self {
        let value = match &err {
            SlotParseError::InvalidDate(v) | SlotParseError::InvalidTime(v) => v.clone(),
            SlotParseError::EmptyInterval { start, end } => format!("{}-{}", start, end),
        };
        AppError::new(AppErrorKind::Validation(ValidationError::InvalidSlot {
            value,
            reason: err.to_string(),
        }))
    }
}

/// Parses `HH:MM` or `HH:MM:SS` into minutes since midnight.
///
/// `24:00` is accepted only when `is_end` is set. Slots are minute-aligned, so a
/// seconds field must be `00`.
pub fn parse_wall_clock(value: &str, is_end: bool) -> Result<i32, SlotParseError> {
    let invalid = || SlotParseError::InvalidTime(value.to_string());
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(invalid());
    }

    let mut fields = [0i32; 3];
    for (slot, part) in fields.iter_mut().zip(parts.iter()) {
        if part.is_empty() || part.len() > 2 || !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        *slot = part.parse().map_err(|_| invalid())?;
    }
    let [hours, minutes, seconds] = fields;

    if minutes > 59 || seconds != 0 {
        return Err(invalid());
    }
    if hours == 24 && is_end && minutes == 0 && seconds == 0 {
        return Ok(MINUTES_PER_DAY);
    }
    if hours > 23 {
        return Err(invalid());
    }
    Ok(hours * 60 + minutes)
}

pub fn parse_slot(date: &str, start: &str, end: &str) -> Result<SlotWindow, SlotParseError> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| SlotParseError::InvalidDate(date.to_string()))?;
    let start_minute = parse_wall_clock(start, false)?;
    let end_minute = parse_wall_clock(end, true)?;
    if start_minute >= end_minute {
        return Err(SlotParseError::EmptyInterval {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    Ok(SlotWindow {
        date,
        start_minute,
        end_minute,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    Booked { booking_id: Uuid },
    Blocked { reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub candidate: SlotWindow,
    pub existing: SlotWindow,
    pub kind: ConflictKind,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ConflictKind::Booked { booking_id } => write!(
                f,
                "{} overlaps confirmed booking {} ({})",
                self.candidate, booking_id, self.existing
            ),
            ConflictKind::Blocked { reason } => match reason {
                Some(reason) if !reason.trim().is_empty() => write!(
                    f,
                    "{} overlaps blocked time {}: {}",
                    self.candidate, self.existing, reason
                ),
                _ => write!(f, "{} overlaps blocked time {}", self.candidate, self.existing),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    pub free: bool,
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    pub fn from_conflicts(conflicts: Vec<Conflict>) -> Self {
        Self {
            free: conflicts.is_empty(),
            conflicts,
        }
    }

    pub fn reasons(&self) -> Vec<String> {
        self.conflicts.iter().map(|c| c.to_string()).collect()
    }
}

/// Every collision between the candidates and the given occupied/blocked slots.
pub fn find_conflicts(
    candidates: &[SlotWindow],
    occupied: &[OccupiedSlot],
    blocked: &[BlockedSlot],
) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    for candidate in candidates {
        for slot in occupied {
            let existing = slot.window();
            if candidate.overlaps(&existing) {
                conflicts.push(Conflict {
                    candidate: *candidate,
                    existing,
                    kind: ConflictKind::Booked {
                        booking_id: slot.booking_id,
                    },
                });
            }
        }
        for block in blocked {
            let existing = block.window();
            if candidate.overlaps(&existing) {
                conflicts.push(Conflict {
                    candidate: *candidate,
                    existing,
                    kind: ConflictKind::Blocked {
                        reason: block.reason.clone(),
                    },
                });
            }
        }
    }

    conflicts
}

pub struct SlotConflictChecker {
    store: Arc<dyn BookingStore>,
}

impl SlotConflictChecker {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }

    /// Read-only availability check; the authoritative check runs inside confirmation.
    pub async fn check_free(
        &self,
        candidates: &[SlotWindow],
        service_id: Uuid,
        exclude_booking_id: Option<Uuid>,
    ) -> Result<ConflictReport, DatabaseError> {
        if candidates.is_empty() {
            return Ok(ConflictReport::from_conflicts(Vec::new()));
        }

        let dates: Vec<NaiveDate> = candidates
            .iter()
            .map(|c| c.date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let occupied = self
            .store
            .occupied_slots(service_id, &dates, exclude_booking_id)
            .await?;
        let blocked = self.store.blocked_slots(&dates).await?;

        let report = ConflictReport::from_conflicts(find_conflicts(candidates, &occupied, &blocked));
        debug!(
            service_id = %service_id,
            candidates = candidates.len(),
            conflicts = report.conflicts.len(),
            "slot availability checked"
        );
        Ok(report)
    }
}

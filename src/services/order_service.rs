use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::database::models::{BookingPaymentStatus, BookingStatus, NewPayment, PaymentStatus};
use crate::database::store::BookingStore;
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ValidationError};
use crate::payments::gateway::{OrderRequest, PaymentGateway};
use crate::payments::types::build_receipt;
use crate::services::slot_conflict::SlotConflictChecker;

/// Checkout parameters returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedOrder {
    pub order_id: String,
    pub receipt: String,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    pub key_id: String,
}

/// Converts a major-unit amount to minor units.
pub fn to_minor_units(amount: &BigDecimal) -> Option<i64> {
    (amount * BigDecimal::from(100)).round(0).to_i64()
}

fn validate_currency(currency: &str) -> AppResult<String> {
    let currency = currency.trim().to_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidCurrency {
                currency,
                reason: "expected a three-letter ISO 4217 code".to_string(),
            },
        )));
    }
    Ok(currency)
}

fn not_payable(booking_id: Uuid, reason: impl Into<String>) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::BookingNotPayable {
        booking_id: booking_id.to_string(),
        reason: reason.into(),
    }))
}

pub struct OrderService {
    store: Arc<dyn BookingStore>,
    gateway: Arc<dyn PaymentGateway>,
    checker: SlotConflictChecker,
    default_currency: String,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn BookingStore>,
        gateway: Arc<dyn PaymentGateway>,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            checker: SlotConflictChecker::new(store.clone()),
            store,
            gateway,
            default_currency: default_currency.into(),
        }
    }

    /// Opens (or reuses) the gateway order for a booking's advance payment.
    pub async fn create_order(
        &self,
        booking_id: Uuid,
        currency: Option<&str>,
    ) -> AppResult<CreatedOrder> {
        let currency = validate_currency(currency.unwrap_or(&self.default_currency))?;

        let booking = self
            .store
            .find_booking(booking_id)
            .await?
            .ok_or_else(|| AppError::not_found("Booking", booking_id))?;

        if booking.status != BookingStatus::Pending {
            return Err(not_payable(booking_id, format!("booking is {}", booking.status)));
        }
        if booking.payment_status.rank() >= BookingPaymentStatus::Paid.rank() {
            return Err(not_payable(
                booking_id,
                format!("payment is already {}", booking.payment_status),
            ));
        }

        let amount = to_minor_units(&booking.advance_amount)
            .filter(|amount| *amount > 0)
            .ok_or_else(|| not_payable(booking_id, "no advance amount is due"))?;

        if let Some(existing) = self.store.find_payment_by_booking(booking_id).await? {
            if existing.status == PaymentStatus::Created
                && existing.amount == amount
                && existing.currency == currency
            {
                info!(
                    booking_id = %booking_id,
                    order_id = %existing.gateway_order_id,
                    "reusing open gateway order"
                );
                let receipt = existing
                    .receipt
                    .clone()
                    .unwrap_or_else(|| build_receipt(booking_id));
                return Ok(CreatedOrder {
                    order_id: existing.gateway_order_id,
                    receipt,
                    amount,
                    currency,
                    key_id: self.gateway.key_id().to_string(),
                });
            }
        }

        let slots = self.store.find_slots(booking_id).await?;
        let windows: Vec<_> = slots.iter().map(|s| s.window()).collect();
        let report = self
            .checker
            .check_free(&windows, booking.service_id, Some(booking_id))
            .await?;
        if !report.free {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::SlotUnavailable {
                    reasons: report.reasons(),
                },
            )));
        }

        let receipt = build_receipt(booking_id);
        let mut notes = BTreeMap::new();
        notes.insert("booking_id".to_string(), booking_id.to_string());

        let order = self
            .gateway
            .create_order(&OrderRequest {
                amount,
                currency: currency.clone(),
                receipt: receipt.clone(),
                notes,
            })
            .await?;

        let payment = self
            .store
            .upsert_order_for_booking(&NewPayment {
                booking_id,
                gateway_order_id: order.id.clone(),
                gateway_payment_id: None,
                amount,
                currency: currency.clone(),
                receipt: Some(receipt.clone()),
                status: PaymentStatus::Created,
            })
            .await?;

        if payment.gateway_order_id != order.id {
            return Err(not_payable(
                booking_id,
                format!("payment is already {}", payment.status),
            ));
        }

        info!(
            booking_id = %booking_id,
            order_id = %order.id,
            amount = amount,
            currency = %currency,
            "gateway order opened"
        );

        Ok(CreatedOrder {
            order_id: order.id,
            receipt,
            amount,
            currency,
            key_id: self.gateway.key_id().to_string(),
        })
    }
}

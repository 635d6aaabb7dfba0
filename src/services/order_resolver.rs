//! Maps a gateway event to the booking it pays for.
//!
//! Lookup order: the local payment row (by order id, else by gateway payment id), then a
//! booking id carried in the event (`notes.booking_id` or the receipt), then the gateway's
//! own record of the order. The last two repair the local order link so the next event
//! for the same order resolves locally.

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{NewPayment, Payment, PaymentStatus};
use crate::database::store::BookingStore;
use crate::payments::error::GatewayError;
use crate::payments::gateway::PaymentGateway;
use crate::payments::types::{extract_booking_id, EventDetails};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionPath {
    LocalOrder,
    LocalPayment,
    EventHint,
    GatewayLookup,
}

#[derive(Debug, Clone)]
pub struct ResolvedBooking {
    pub booking_id: Uuid,
    pub payment: Option<Payment>,
    pub path: ResolutionPath,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Worth retrying: the gateway or the datastore was unavailable.
    #[error("transient resolution failure: {0}")]
    Transient(String),
    /// No booking can be matched to this event.
    #[error("unresolvable event: {0}")]
    Unresolvable(String),
}

impl From<DatabaseError> for ResolveError {
    fn from(err: DatabaseError) -> Self {
        match err.kind {
            DatabaseErrorKind::InvalidData { message } => ResolveError::Unresolvable(message),
            _ => ResolveError::Transient(err.to_string()),
        }
    }
}

impl From<GatewayError> for ResolveError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound { .. } | GatewayError::Validation { .. } => {
                ResolveError::Unresolvable(err.to_string())
            }
            other => ResolveError::Transient(other.to_string()),
        }
    }
}

pub struct OrderResolver {
    store: Arc<dyn BookingStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl OrderResolver {
    pub fn new(store: Arc<dyn BookingStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    pub async fn resolve(&self, details: &EventDetails) -> Result<ResolvedBooking, ResolveError> {
        if let Some(order_id) = details.order_id.as_deref() {
            if let Some(payment) = self.store.find_payment_by_order(order_id).await? {
                return Ok(ResolvedBooking {
                    booking_id: payment.booking_id,
                    payment: Some(payment),
                    path: ResolutionPath::LocalOrder,
                });
            }
        } else if let Some(payment_id) = details.payment_id.as_deref() {
            if let Some(payment) = self.store.find_payment_by_gateway_payment(payment_id).await? {
                return Ok(ResolvedBooking {
                    booking_id: payment.booking_id,
                    payment: Some(payment),
                    path: ResolutionPath::LocalPayment,
                });
            }
        }

        if let Some(booking_id) = details.booking_hint {
            if self.store.find_booking(booking_id).await?.is_some() {
                let payment = self.repair_link(booking_id, details, None).await?;
                info!(
                    booking_id = %booking_id,
                    order_id = ?details.order_id,
                    "resolved booking from event notes"
                );
                return Ok(ResolvedBooking {
                    booking_id,
                    payment,
                    path: ResolutionPath::EventHint,
                });
            }
            warn!(booking_id = %booking_id, "event names a booking that does not exist");
        }

        let Some(order_id) = details.order_id.as_deref() else {
            error!(
                payment_id = ?details.payment_id,
                event = %details.event.name(),
                "event carries no order id and matches no local payment"
            );
            return Err(ResolveError::Unresolvable(
                "no order id and no local payment match".to_string(),
            ));
        };

        let order = self.gateway.fetch_order(order_id).await?;
        let booking_id = extract_booking_id(&order.notes, order.receipt.as_deref())
            .ok_or_else(|| {
                error!(order_id = %order_id, "gateway order carries no booking reference");
                ResolveError::Unresolvable(format!("order {} has no booking reference", order_id))
            })?;

        if self.store.find_booking(booking_id).await?.is_none() {
            error!(order_id = %order_id, booking_id = %booking_id, "gateway order references unknown booking");
            return Err(ResolveError::Unresolvable(format!(
                "order {} references unknown booking {}",
                order_id, booking_id
            )));
        }

        let payment = self.repair_link(booking_id, details, order.amount).await?;
        info!(
            booking_id = %booking_id,
            order_id = %order_id,
            "resolved booking through gateway order lookup"
        );
        Ok(ResolvedBooking {
            booking_id,
            payment,
            path: ResolutionPath::GatewayLookup,
        })
    }

    async fn repair_link(
        &self,
        booking_id: Uuid,
        details: &EventDetails,
        order_amount: Option<i64>,
    ) -> Result<Option<Payment>, ResolveError> {
        let Some(order_id) = details.order_id.clone() else {
            return Ok(self.store.find_payment_by_booking(booking_id).await?);
        };

        let payment = self
            .store
            .link_order(&NewPayment {
                booking_id,
                gateway_order_id: order_id,
                gateway_payment_id: details.payment_id.clone(),
                amount: details.amount.or(order_amount).unwrap_or(0),
                currency: details.currency.clone().unwrap_or_default(),
                receipt: details.receipt.clone(),
                status: PaymentStatus::Created,
            })
            .await?;
        Ok(Some(payment))
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::database::models::PaymentStatus;
use crate::services::booking_state::PaymentEvidence;

/// Gateway webhook event names we know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    PaymentAuthorized,
    PaymentCaptured,
    PaymentFailed,
    OrderPaid,
    RefundCreated,
    RefundProcessed,
    RefundFailed,
    Unknown(String),
}

/// What an event does to a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventEffect {
    Capture,
    Fail,
    Refund,
    Ignore,
}

impl GatewayEvent {
    pub fn from_name(name: &str) -> Self {
        match name {
            "payment.authorized" => GatewayEvent::PaymentAuthorized,
            "payment.captured" => GatewayEvent::PaymentCaptured,
            "payment.failed" => GatewayEvent::PaymentFailed,
            "order.paid" => GatewayEvent::OrderPaid,
            "refund.created" => GatewayEvent::RefundCreated,
            "refund.processed" => GatewayEvent::RefundProcessed,
            "refund.failed" => GatewayEvent::RefundFailed,
            other => GatewayEvent::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            GatewayEvent::PaymentAuthorized => "payment.authorized",
            GatewayEvent::PaymentCaptured => "payment.captured",
            GatewayEvent::PaymentFailed => "payment.failed",
            GatewayEvent::OrderPaid => "order.paid",
            GatewayEvent::RefundCreated => "refund.created",
            GatewayEvent::RefundProcessed => "refund.processed",
            GatewayEvent::RefundFailed => "refund.failed",
            GatewayEvent::Unknown(name) => name,
        }
    }

    pub fn effect(&self) -> EventEffect {
        match self {
            GatewayEvent::PaymentCaptured | GatewayEvent::OrderPaid => EventEffect::Capture,
            GatewayEvent::PaymentFailed => EventEffect::Fail,
            GatewayEvent::RefundProcessed => EventEffect::Refund,
            // Authorization precedes capture; refund.created is not final yet.
            GatewayEvent::PaymentAuthorized
            | GatewayEvent::RefundCreated
            | GatewayEvent::RefundFailed
            | GatewayEvent::Unknown(_) => EventEffect::Ignore,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// An object, or `[]` when empty.
    #[serde(default)]
    pub notes: JsonValue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub amount_refunded: Option<i64>,
    #[serde(default)]
    pub notes: JsonValue,
}

impl GatewayPayment {
    pub fn is_captured(&self) -> bool {
        self.status.as_deref() == Some("captured")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub notes: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity<T> {
    pub entity: T,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub payment: Option<Entity<GatewayPayment>>,
    #[serde(default)]
    pub order: Option<Entity<GatewayOrder>>,
    #[serde(default)]
    pub refund: Option<Entity<GatewayRefund>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCollection<T> {
    #[serde(default)]
    pub count: Option<u32>,
    pub items: Vec<T>,
}

/// The facts a webhook carries, flattened out of the entity wrappers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDetails {
    pub event: GatewayEvent,
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub receipt: Option<String>,
    pub booking_hint: Option<Uuid>,
    pub refund_partial: bool,
}

impl WebhookEnvelope {
    pub fn gateway_event(&self) -> GatewayEvent {
        GatewayEvent::from_name(&self.event)
    }

    pub fn details(&self) -> EventDetails {
        let payment = self.payload.payment.as_ref().map(|p| &p.entity);
        let order = self.payload.order.as_ref().map(|o| &o.entity);
        let refund = self.payload.refund.as_ref().map(|r| &r.entity);

        let order_id = order
            .map(|o| o.id.clone())
            .or_else(|| payment.and_then(|p| p.order_id.clone()));
        let payment_id = payment
            .map(|p| p.id.clone())
            .or_else(|| refund.and_then(|r| r.payment_id.clone()));
        let receipt = order.and_then(|o| o.receipt.clone());

        let booking_hint = payment
            .and_then(|p| extract_booking_id(&p.notes, None))
            .or_else(|| order.and_then(|o| extract_booking_id(&o.notes, o.receipt.as_deref())))
            .or_else(|| refund.and_then(|r| extract_booking_id(&r.notes, None)));

        let refund_partial = match (payment, refund) {
            (Some(p), _) if p.amount_refunded.is_some() && p.amount.is_some() => {
                p.amount_refunded < p.amount
            }
            (Some(p), Some(r)) => match (p.amount, r.amount) {
                (Some(paid), Some(refunded)) => refunded < paid,
                _ => false,
            },
            _ => false,
        };

        EventDetails {
            event: self.gateway_event(),
            order_id,
            payment_id,
            amount: payment.and_then(|p| p.amount).or_else(|| order.and_then(|o| o.amount)),
            currency: payment
                .and_then(|p| p.currency.clone())
                .or_else(|| order.and_then(|o| o.currency.clone())),
            receipt,
            booking_hint,
            refund_partial,
        }
    }
}

impl EventDetails {
    /// Payment status the event drives towards, if it drives any.
    pub fn target_status(&self) -> Option<PaymentStatus> {
        match self.event.effect() {
            EventEffect::Capture => Some(PaymentStatus::Captured),
            EventEffect::Fail => Some(PaymentStatus::Failed),
            EventEffect::Refund if self.refund_partial => Some(PaymentStatus::PartiallyRefunded),
            EventEffect::Refund => Some(PaymentStatus::Refunded),
            EventEffect::Ignore => None,
        }
    }

    pub fn evidence(&self) -> PaymentEvidence {
        PaymentEvidence {
            order_id: self.order_id.clone(),
            payment_id: self.payment_id.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            receipt: self.receipt.clone(),
        }
    }
}

/// Booking id from `notes.booking_id`, else any UUID embedded in the receipt.
pub fn extract_booking_id(notes: &JsonValue, receipt: Option<&str>) -> Option<Uuid> {
    let from_notes = notes
        .get("booking_id")
        .and_then(JsonValue::as_str)
        .and_then(|s| Uuid::parse_str(s.trim()).ok());

    from_notes.or_else(|| {
        receipt.and_then(|receipt| {
            receipt
                .split(|c: char| c == '_' || c == ':' || c == '#' || c.is_whitespace())
                .find_map(|token| Uuid::parse_str(token).ok())
        })
    })
}

/// Receipt sent with a new order; the gateway caps receipts at 40 characters.
pub fn build_receipt(booking_id: Uuid) -> String {
    let mut receipt = format!("bk_{}", booking_id);
    receipt.truncate(40);
    receipt
}

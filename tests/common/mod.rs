#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use studio_booking_backend::database::memory::InMemoryStore;
use studio_booking_backend::database::models::SlotWindow;
use studio_booking_backend::payments::error::{GatewayError, GatewayResult};
use studio_booking_backend::payments::gateway::{OrderRequest, PaymentGateway};
use studio_booking_backend::payments::signature::SignatureVerifier;
use studio_booking_backend::payments::types::{GatewayOrder, GatewayPayment};
use studio_booking_backend::services::booking_state::BookingStateMachine;
use studio_booking_backend::services::notification::NotificationService;
use studio_booking_backend::services::order_resolver::OrderResolver;
use studio_booking_backend::services::webhook_processor::WebhookProcessor;

pub const WEBHOOK_SECRET: &str = "whsec_integration";

/// Gateway double with canned orders and payments.
#[derive(Default)]
pub struct StubGateway {
    pub orders: HashMap<String, GatewayOrder>,
    pub payments: HashMap<String, Vec<GatewayPayment>>,
    pub lookups: AtomicUsize,
}

impl StubGateway {
    pub fn with_order(mut self, order_id: &str, booking_id: Uuid) -> Self {
        self.orders.insert(
            order_id.to_string(),
            GatewayOrder {
                id: order_id.to_string(),
                amount: Some(100_000),
                currency: Some("INR".to_string()),
                receipt: Some(format!("bk_{}", booking_id)),
                status: Some("paid".to_string()),
                notes: json!({ "booking_id": booking_id.to_string() }),
            },
        );
        self
    }

    pub fn with_captured_payment(mut self, order_id: &str, payment_id: &str) -> Self {
        self.payments.entry(order_id.to_string()).or_default().push(GatewayPayment {
            id: payment_id.to_string(),
            amount: Some(100_000),
            currency: Some("INR".to_string()),
            status: Some("captured".to_string()),
            order_id: Some(order_id.to_string()),
            amount_refunded: None,
            notes: json!({}),
        });
        self
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    fn key_id(&self) -> &str {
        "rzp_test_stub"
    }

    async fn create_order(&self, request: &OrderRequest) -> GatewayResult<GatewayOrder> {
        Ok(GatewayOrder {
            id: format!("order_stub_{}", Uuid::new_v4().simple()),
            amount: Some(request.amount),
            currency: Some(request.currency.clone()),
            receipt: Some(request.receipt.clone()),
            status: Some("created".to_string()),
            notes: json!(request.notes),
        })
    }

    async fn fetch_order(&self, order_id: &str) -> GatewayResult<GatewayOrder> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                resource: "order".to_string(),
                id: order_id.to_string(),
            })
    }

    async fn fetch_order_payments(&self, order_id: &str) -> GatewayResult<Vec<GatewayPayment>> {
        Ok(self.payments.get(order_id).cloned().unwrap_or_default())
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub notifier: Arc<NotificationService>,
    pub state_machine: Arc<BookingStateMachine>,
    pub resolver: Arc<OrderResolver>,
    pub processor: Arc<WebhookProcessor>,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_gateway(Arc::new(StubGateway::default()))
    }

    pub fn with_gateway(gateway: Arc<dyn PaymentGateway>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(NotificationService::new());
        let state_machine = Arc::new(BookingStateMachine::new(store.clone(), notifier.clone()));
        let resolver = Arc::new(OrderResolver::new(store.clone(), gateway.clone()));
        let processor = Arc::new(WebhookProcessor::new(
            SignatureVerifier::new(WEBHOOK_SECRET).unwrap(),
            store.clone(),
            resolver.clone(),
            state_machine.clone(),
            notifier.clone(),
        ));
        Self {
            store,
            notifier,
            state_machine,
            resolver,
            processor,
            gateway,
        }
    }
}

pub fn sign(body: &[u8]) -> String {
    SignatureVerifier::new(WEBHOOK_SECRET).unwrap().sign(body)
}

pub fn window(day: u32, start: i32, end: i32) -> SlotWindow {
    SlotWindow {
        date: NaiveDate::from_ymd_opt(2026, 11, day).unwrap(),
        start_minute: start,
        end_minute: end,
    }
}

pub fn payment_event(
    event: &str,
    status: &str,
    order_id: &str,
    payment_id: &str,
    booking_id: Option<Uuid>,
) -> Vec<u8> {
    let notes = match booking_id {
        Some(id) => json!({ "booking_id": id.to_string() }),
        None => json!({}),
    };
    serde_json::to_vec(&json!({
        "entity": "event",
        "event": event,
        "payload": {
            "payment": {
                "entity": {
                    "id": payment_id,
                    "order_id": order_id,
                    "amount": 100_000,
                    "currency": "INR",
                    "status": status,
                    "notes": notes
                }
            }
        },
        "created_at": 1_790_000_000
    }))
    .unwrap()
}

pub fn captured_event(order_id: &str, payment_id: &str, booking_id: Option<Uuid>) -> Vec<u8> {
    payment_event("payment.captured", "captured", order_id, payment_id, booking_id)
}

pub fn failed_event(order_id: &str, payment_id: &str, booking_id: Option<Uuid>) -> Vec<u8> {
    payment_event("payment.failed", "failed", order_id, payment_id, booking_id)
}

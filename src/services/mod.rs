//! Services module for booking and payment business logic

pub mod booking_state;
pub mod idempotency;
pub mod notification;
pub mod order_resolver;
pub mod order_service;
pub mod slot_conflict;
pub mod webhook_processor;

pub use booking_state::{BookingStateMachine, PaymentEvidence, TransitionError, TransitionOutcome};
pub use order_resolver::{OrderResolver, ResolveError};
pub use webhook_processor::{WebhookProcessor, WebhookProcessorError};

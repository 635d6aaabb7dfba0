//! Application error type shared by every HTTP handler.
//!
//! Layer errors (`DatabaseError`, `GatewayError`, slot parsing) convert into `AppError`,
//! which knows its status code, client-facing code and message, and whether a retry
//! can help.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "BOOKING_NOT_PAYABLE")]
    BookingNotPayable,
    #[serde(rename = "SLOT_UNAVAILABLE")]
    SlotUnavailable,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,

    // Gateway errors (502, 503)
    #[serde(rename = "PAYMENT_GATEWAY_ERROR")]
    PaymentGatewayError,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    NotFound { entity: String, id: String },
    /// Booking is in a state where opening a payment order makes no sense
    BookingNotPayable { booking_id: String, reason: String },
    /// Requested slots collide with confirmed bookings or blocks
    SlotUnavailable { reasons: Vec<String> },
}

#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
}

#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentGateway { message: String, is_retryable: bool },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Slot date/time could not be parsed or is not a forward interval
    InvalidSlot { value: String, reason: String },
    InvalidCurrency { currency: String, reason: String },
    MissingField { field: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::NotFound { .. } => 404,
                DomainError::BookingNotPayable { .. } => 409,
                DomainError::SlotUnavailable { .. } => 409,
            },
            // Retryable failures answer 503.
            AppErrorKind::Infrastructure(InfrastructureError::Database { is_retryable, .. }) => {
                if *is_retryable {
                    503
                } else {
                    500
                }
            }
            AppErrorKind::External(ExternalError::PaymentGateway { is_retryable, .. }) => {
                if *is_retryable {
                    503
                } else {
                    502
                }
            }
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::NotFound { .. } => ErrorCode::NotFound,
                DomainError::BookingNotPayable { .. } => ErrorCode::BookingNotPayable,
                DomainError::SlotUnavailable { .. } => ErrorCode::SlotUnavailable,
            },
            AppErrorKind::Infrastructure(_) => ErrorCode::DatabaseError,
            AppErrorKind::External(_) => ErrorCode::PaymentGatewayError,
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::NotFound { entity, id } => format!("{} '{}' not found", entity, id),
                DomainError::BookingNotPayable { booking_id, reason } => {
                    format!("Booking '{}' cannot be paid: {}", booking_id, reason)
                }
                DomainError::SlotUnavailable { reasons } => {
                    format!("Requested slots are unavailable: {}", reasons.join("; "))
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(ExternalError::PaymentGateway { is_retryable, .. }) => {
                if *is_retryable {
                    "Payment gateway is temporarily unavailable. Please try again".to_string()
                } else {
                    "Payment gateway refused the request. Please contact the studio".to_string()
                }
            }
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidSlot { value, reason } => {
                    format!("Invalid slot '{}': {}", value, reason)
                }
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(InfrastructureError::Database { is_retryable, .. })
            | AppErrorKind::External(ExternalError::PaymentGateway { is_retryable, .. }) => {
                *is_retryable
            }
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Internal detail stays in logs; clients only see `user_message`.
        match &self.kind {
            AppErrorKind::Infrastructure(InfrastructureError::Database { message, .. })
            | AppErrorKind::External(ExternalError::PaymentGateway { message, .. }) => {
                write!(f, "{}", message)
            }
            _ => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs, From<GatewayError> in payments/error.rs

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let error = AppError::not_found("Booking", "b-1");

        assert_eq!(error.status_code(), 404);
        assert_eq!(error.error_code(), ErrorCode::NotFound);
        assert!(error.user_message().contains("b-1"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_booking_not_payable_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::BookingNotPayable {
            booking_id: "b-2".to_string(),
            reason: "already paid".to_string(),
        }));

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::BookingNotPayable);
    }

    #[test]
    fn test_gateway_error_retryability() {
        let error = AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
            message: "503".to_string(),
            is_retryable: true,
        }));

        assert_eq!(error.status_code(), 503);
        assert!(error.is_retryable());
        assert!(error.user_message().contains("temporarily unavailable"));
        assert_eq!(error.to_string(), "503");
    }

    #[test]
    fn test_slot_unavailable_lists_every_reason() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::SlotUnavailable {
            reasons: vec!["10:00-11:00 booked".to_string(), "11:00-12:00 blocked".to_string()],
        }));

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::SlotUnavailable);
        assert!(error.user_message().ends_with("10:00-11:00 booked; 11:00-12:00 blocked"));
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidSlot {
            value: "25:00".to_string(),
            reason: "hour out of range".to_string(),
        }));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }
}

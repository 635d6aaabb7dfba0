//! Errors from the outbound payment-gateway client.

use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("{resource} '{id}' not found at gateway")]
    NotFound { resource: String, id: String },

    #[error("Gateway error: status={status:?}, message={message}")]
    Provider {
        message: String,
        status: Option<u16>,
        retryable: bool,
    },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Validation { .. } => false,
            GatewayError::Network { .. } => true,
            GatewayError::RateLimit { .. } => true,
            GatewayError::NotFound { .. } => false,
            GatewayError::Provider { retryable, .. } => *retryable,
        }
    }
}

impl From<GatewayError> for crate::error::AppError {
    fn from(err: GatewayError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError};

        AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
            message: err.to_string(),
            is_retryable: err.is_retryable(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_flags_are_set() {
        assert!(GatewayError::Network {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!GatewayError::NotFound {
            resource: "order".to_string(),
            id: "order_x".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn refused_request_is_bad_gateway() {
        let app: crate::error::AppError = GatewayError::Provider {
            message: "BAD_REQUEST_ERROR".to_string(),
            status: Some(400),
            retryable: false,
        }
        .into();
        assert_eq!(app.status_code(), 502);
        assert!(!app.is_retryable());
    }

    #[test]
    fn outage_asks_client_to_retry() {
        let app: crate::error::AppError = GatewayError::Network {
            message: "connection reset".to_string(),
        }
        .into();
        assert_eq!(app.status_code(), 503);
        assert!(app.is_retryable());
    }
}

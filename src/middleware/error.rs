//! Error response formatting
//!
//! Every failed request gets the same JSON body: machine-readable code, user message,
//! request id, timestamp and a retry hint.

use crate::error::{AppError, AppErrorKind, DomainError, ErrorCode};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: ErrorCode,

    /// Human-readable error message
    pub message: String,

    pub request_id: Option<String>,

    /// ISO 8601 timestamp of the error
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Whether the client should retry the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        let details = match &error.kind {
            AppErrorKind::Domain(DomainError::SlotUnavailable { reasons }) => {
                Some(serde_json::json!({ "conflicts": reasons }))
            }
            _ => None,
        };

        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details,
            retryable: Some(error.is_retryable()),
        }
    }

    /// Body for a request that could not be recorded; the caller is expected to retry.
    pub fn storage_unavailable(request_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorCode::DatabaseError,
            message: message.into(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(true),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                code = ?self.error_code(),
                request_id = ?self.request_id,
                status = status.as_u16(),
                "request failed"
            );
        } else {
            tracing::warn!(
                error = %self,
                code = ?self.error_code(),
                request_id = ?self.request_id,
                status = status.as_u16(),
                "request rejected"
            );
        }

        (status, Json(ErrorResponse::from_app_error(&self))).into_response()
    }
}

pub fn get_request_id_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn test_error_response_from_app_error() {
        let app_error = AppError::not_found("Booking", "b-1").with_request_id("req_123");

        let error_response = ErrorResponse::from_app_error(&app_error);

        assert_eq!(error_response.error, ErrorCode::NotFound);
        assert_eq!(error_response.request_id, Some("req_123".to_string()));
        assert_eq!(error_response.retryable, Some(false));
    }

    #[test]
    fn test_slot_conflicts_are_listed_in_details() {
        let app_error = AppError::new(AppErrorKind::Domain(DomainError::SlotUnavailable {
            reasons: vec!["2026-05-01 10:00-11:00 is blocked".to_string()],
        }));

        let error_response = ErrorResponse::from_app_error(&app_error);
        let details = error_response.details.unwrap();
        assert_eq!(details["conflicts"][0], "2026-05-01 10:00-11:00 is blocked");
    }

    #[test]
    fn test_app_error_into_response() {
        let app_error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidSlot {
            value: "25:00".to_string(),
            reason: "hour out of range".to_string(),
        }));

        let response = app_error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_storage_unavailable_invites_retry() {
        let body = ErrorResponse::storage_unavailable(Some("req_9".to_string()), "try again");
        assert_eq!(body.error, ErrorCode::DatabaseError);
        assert_eq!(body.retryable, Some(true));
        assert_eq!(body.request_id.as_deref(), Some("req_9"));
    }
}

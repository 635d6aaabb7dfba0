use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, info, warn};

use super::AppState;
use crate::middleware::error::{get_request_id_from_headers, ErrorResponse};
use crate::payments::signature::SIGNATURE_HEADER;
use crate::services::idempotency::EVENT_ID_HEADER;
use crate::services::webhook_processor::{Acceptance, WebhookProcessorError};
use crate::workers::webhook_dispatch::DispatchError;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn ack(status: &str) -> Response {
    (StatusCode::OK, Json(json!({ "status": status }))).into_response()
}

/// POST /webhooks/razorpay
///
/// The raw body is verified before anything is parsed or stored. Accepted events are
/// recorded and queued; processing happens on the worker pool.
pub async fn handle_razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);
    let signature = header(&headers, SIGNATURE_HEADER);
    let event_id = header(&headers, EVENT_ID_HEADER);

    match state.processor.accept(&body, signature, event_id).await {
        Ok(Acceptance::Queued(job)) => {
            let key = job.idempotency_key.clone();
            match state.dispatcher.enqueue(job) {
                Ok(()) => {
                    info!(idempotency_key = %key, "webhook queued");
                    ack("queued")
                }
                Err(DispatchError::QueueFull) | Err(DispatchError::Closed) => ack("deferred"),
            }
        }
        Ok(Acceptance::Duplicate) => ack("duplicate"),
        Ok(Acceptance::Ignored(reason)) => {
            info!(reason, "webhook acknowledged without processing");
            ack("ignored")
        }
        Err(WebhookProcessorError::InvalidSignature(e)) => {
            warn!(reason = %e, "webhook rejected");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "INVALID_SIGNATURE", "message": "Invalid signature" })),
            )
                .into_response()
        }
        Err(e) => {
            // Nothing was recorded; a non-2xx makes the gateway deliver again.
            error!(error = %e, "webhook could not be recorded");
            let body = ErrorResponse::storage_unavailable(
                request_id,
                "Webhook could not be recorded. It will be accepted on redelivery.",
            );
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}

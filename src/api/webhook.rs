//! Gateway webhook endpoint.
//!
//! The single place where the catch-all policy applies: once the signature
//! verifies, any processing failure is persisted as a failed notification
//! and the gateway still receives success, so that replay pressure does not
//! build up; operators reconcile from the log. Signature failures are plain
//! rejections: they are not failures of ours, and nothing is recorded.

use crate::gateway::GatewayError;
use crate::server::state::AppState;
use crate::types::FailedNotification;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;

/// Handle a gateway payment notification.
///
/// Always responds `200 OK` once the signature has verified, regardless of
/// processing outcome; responds `400` for payloads that cannot be trusted.
pub async fn notify_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let notification = match state.coordinator.gateway().verify_notification(&body) {
        Ok(notification) => notification,
        Err(GatewayError::SignatureInvalid) => {
            tracing::warn!("webhook rejected: signature invalid");
            return StatusCode::BAD_REQUEST;
        }
        Err(error) => {
            tracing::warn!(%error, "webhook rejected: payload not trustworthy");
            return StatusCode::BAD_REQUEST;
        }
    };

    match state.coordinator.reconcile_webhook(&notification).await {
        Ok(()) => StatusCode::OK,
        Err(error) => {
            tracing::error!(
                payment_reference = %notification.payment_reference,
                %error,
                "webhook processing failed; recording for operator reconciliation"
            );
            let record = FailedNotification {
                failed_at: Utc::now(),
                error: error.to_string(),
                payload: body,
                headers: render_headers(&headers),
            };
            if let Err(append_error) = state.store.append_failed_notification(&record).await {
                // Nothing durable left to try; the log line is the last trace.
                tracing::error!(%append_error, "failed notification could not be persisted");
            }
            StatusCode::OK
        }
    }
}

fn render_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| {
            format!("{name}: {}", value.to_str().unwrap_or("<non-utf8>"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

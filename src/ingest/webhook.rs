//! Webhook intake
//!
//! The provider's two request shapes on `POST /webhooks/mail`: the
//! validation handshake (token echoed back as text/plain) and notification
//! batches (clientState checked in constant time, ids enqueued, immediate
//! 202). The 202 is produced only after every enqueue attempt completed —
//! enqueue itself is synchronous and non-blocking, so the handler stays
//! well inside the provider's response deadline.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::metrics::WEBHOOK_NOTIFICATIONS_TOTAL;

use super::NotificationQueue;

lazy_static! {
    static ref VALIDATION_TOKEN_RE: Regex =
        Regex::new(r"^[A-Za-z0-9._~-]{1,256}$").expect("validation token regex");
}

/// Shared state for the webhook handlers.
pub struct WebhookState {
    pub queue: NotificationQueue,
    pub client_state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationBatch {
    #[serde(default)]
    pub value: Vec<Notification>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub client_state: Option<String>,
    #[serde(default)]
    pub change_type: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub resource_data: Option<ResourceData>,
}

#[derive(Debug, Deserialize)]
pub struct ResourceData {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "@odata.id", default)]
    pub odata_id: Option<String>,
}

/// Constant-time byte comparison for the shared clientState secret.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// `POST /webhooks/mail`
pub async fn handle_mail_webhook(
    State(state): State<Arc<WebhookState>>,
    Query(params): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    // Validation handshake takes precedence over any body.
    if let Some(token) = params.get("validationToken") {
        return handle_validation(token);
    }
    handle_notifications(&state, &body)
}

fn handle_validation(token: &str) -> Response {
    if VALIDATION_TOKEN_RE.is_match(token) {
        debug!("webhook validation handshake answered");
        (
            StatusCode::OK,
            [("content-type", "text/plain")],
            token.to_string(),
        )
            .into_response()
    } else {
        warn!("webhook validation token rejected");
        (StatusCode::BAD_REQUEST, "invalid validation token").into_response()
    }
}

fn handle_notifications(state: &WebhookState, body: &str) -> Response {
    if body.trim().is_empty() {
        WEBHOOK_NOTIFICATIONS_TOTAL.with_label_values(&["empty"]).inc();
        return (StatusCode::BAD_REQUEST, "empty body").into_response();
    }

    let batch: NotificationBatch = match serde_json::from_str(body) {
        Ok(batch) => batch,
        Err(err) => {
            WEBHOOK_NOTIFICATIONS_TOTAL.with_label_values(&["invalid"]).inc();
            warn!(error = %err, "webhook body failed to parse");
            return (StatusCode::BAD_REQUEST, "invalid body").into_response();
        }
    };
    if batch.value.is_empty() {
        WEBHOOK_NOTIFICATIONS_TOTAL.with_label_values(&["empty"]).inc();
        return (StatusCode::BAD_REQUEST, "empty notification batch").into_response();
    }

    // Every notification must carry the shared secret.
    let expected = match &state.client_state {
        Some(expected) => expected,
        None => {
            warn!("webhook notification received but no client state configured");
            return (StatusCode::FORBIDDEN, "webhook not configured").into_response();
        }
    };
    for notification in &batch.value {
        let presented = notification.client_state.as_deref().unwrap_or("");
        if !constant_time_eq(presented, expected) {
            WEBHOOK_NOTIFICATIONS_TOTAL.with_label_values(&["forbidden"]).inc();
            warn!(
                subscription_id = %notification.subscription_id,
                "webhook clientState mismatch"
            );
            return (StatusCode::FORBIDDEN, "client state mismatch").into_response();
        }
    }

    // Synchronous, non-blocking enqueue; processing happens on the workers.
    let mut accepted = 0usize;
    for notification in &batch.value {
        if let Some(resource_data) = &notification.resource_data {
            if !resource_data.id.is_empty() && state.queue.try_enqueue(resource_data.id.clone()) {
                accepted += 1;
            }
        }
    }
    WEBHOOK_NOTIFICATIONS_TOTAL.with_label_values(&["accepted"]).inc();
    debug!(accepted, total = batch.value.len(), "webhook batch enqueued");

    (StatusCode::ACCEPTED, axum::Json(json!({ "status": "accepted" }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(client_state: Option<&str>, capacity: usize) -> (Arc<WebhookState>, tokio::sync::mpsc::Receiver<String>) {
        let (queue, rx) = NotificationQueue::new(capacity);
        (
            Arc::new(WebhookState {
                queue,
                client_state: client_state.map(String::from),
            }),
            rx,
        )
    }

    fn batch_body(client_state: &str, ids: &[&str]) -> String {
        let value: Vec<_> = ids
            .iter()
            .map(|id| {
                json!({
                    "subscriptionId": "sub-1",
                    "clientState": client_state,
                    "changeType": "created",
                    "resource": format!("Users/u/Messages/{}", id),
                    "resourceData": { "id": id, "@odata.id": format!("Users/u/Messages/{}", id) }
                })
            })
            .collect();
        json!({ "value": value }).to_string()
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secreT"));
        assert!(!constant_time_eq("secret", "secrets"));
        assert!(!constant_time_eq("", "x"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn test_validation_handshake_echoes_token() {
        let response = handle_validation("abc.DEF_123~tok-en");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_validation_rejects_unsafe_token() {
        assert_eq!(
            handle_validation("bad token!").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            handle_validation(&"x".repeat(300)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(handle_validation("").status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_valid_batch_enqueues_and_accepts() {
        let (state, mut rx) = state(Some("s3cret"), 10);
        let response = handle_notifications(&state, &batch_body("s3cret", &["id-1", "id-2"]));
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.recv().await.as_deref(), Some("id-1"));
        assert_eq!(rx.recv().await.as_deref(), Some("id-2"));
    }

    #[test]
    fn test_client_state_mismatch_is_forbidden() {
        let (state, _rx) = state(Some("s3cret"), 10);
        let response = handle_notifications(&state, &batch_body("wrong", &["id-1"]));
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_empty_body_and_empty_batch_are_bad_requests() {
        let (state, _rx) = state(Some("s3cret"), 10);
        assert_eq!(
            handle_notifications(&state, "").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            handle_notifications(&state, r#"{"value": []}"#).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            handle_notifications(&state, "not json").status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_full_queue_still_accepts_batch() {
        let (state, _rx) = state(Some("s3cret"), 1);
        let response =
            handle_notifications(&state, &batch_body("s3cret", &["id-1", "id-2", "id-3"]));
        // Drops are counted, but the provider still gets its 202 so it does
        // not retry into a stampede.
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}

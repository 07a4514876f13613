//! Operational HTTP surface tests
//!
//! Exercises the axum router in-process: banner, API-key middleware
//! (including the production fail-closed path), webhook validation and
//! notification intake, health, readiness and metrics exposition.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use common::{test_config, MockProvider};

use phish_triage::cache::{Cache, MemoryCache};
use phish_triage::config::{Config, Environment};
use phish_triage::ingest::webhook::WebhookState;
use phish_triage::ingest::NotificationQueue;
use phish_triage::mail::MailProvider;
use phish_triage::server::{router, AppState};

struct ServerHarness {
    app: axum::Router,
    queue_rx: tokio::sync::mpsc::Receiver<String>,
}

fn server_with(config: Config) -> ServerHarness {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let provider = Arc::new(MockProvider::default()) as Arc<dyn MailProvider>;
    let (queue, queue_rx) = NotificationQueue::new(config.queue_capacity);
    let webhook = Arc::new(WebhookState {
        queue,
        client_state: config.webhook.client_state.clone(),
    });
    let state = Arc::new(AppState::new(
        config, cache, provider, None, None, webhook, None,
    ));
    ServerHarness {
        app: router(state),
        queue_rx,
    }
}

fn server() -> ServerHarness {
    server_with(test_config())
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn banner_is_public() {
    let h = server();
    let response = h
        .app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("phish-triage"));
}

#[tokio::test]
async fn health_open_in_development_without_key() {
    let h = server();
    let response = h
        .app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn api_key_required_when_configured() {
    let mut config = test_config();
    config.api_key = Some("sekrit".into());
    let h = server_with(config);

    let denied = h
        .app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let allowed = h
        .app
        .oneshot(
            Request::get("/health")
                .header("x-api-key", "sekrit")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
}

#[tokio::test]
async fn production_without_key_fails_closed() {
    let mut config = test_config();
    config.environment = Environment::Production;
    config.api_key = None;
    let h = server_with(config);

    let response = h
        .app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn metrics_scoped_key_overrides_general_key() {
    let mut config = test_config();
    config.api_key = Some("general".into());
    config.metrics_api_key = Some("scrape-only".into());
    let h = server_with(config);

    let response = h
        .app
        .oneshot(
            Request::get("/metrics")
                .header("x-api-key", "scrape-only")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhook_validation_echoes_token_as_text() {
    let h = server();
    let response = h
        .app
        .oneshot(
            Request::post("/webhooks/mail?validationToken=tok-123._~abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/plain")
    );
    assert_eq!(body_string(response).await, "tok-123._~abc");
}

#[tokio::test]
async fn webhook_validation_rejects_unsafe_token() {
    let h = server();
    let response = h
        .app
        .oneshot(
            Request::post("/webhooks/mail?validationToken=bad%20token%21")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_batch_enqueues_and_returns_202() {
    let mut h = server();
    let payload = json!({
        "value": [{
            "subscriptionId": "sub-1",
            "clientState": "test-client-state",
            "changeType": "created",
            "resource": "Users/u/Messages/msg-1",
            "resourceData": { "id": "msg-1", "@odata.id": "Users/u/Messages/msg-1" }
        }]
    });
    let response = h
        .app
        .oneshot(
            Request::post("/webhooks/mail")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(body_string(response).await.contains("accepted"));
    assert_eq!(h.queue_rx.recv().await.as_deref(), Some("msg-1"));
}

#[tokio::test]
async fn webhook_wrong_client_state_is_403() {
    let h = server();
    let payload = json!({
        "value": [{
            "subscriptionId": "sub-1",
            "clientState": "wrong",
            "changeType": "created",
            "resource": "r",
            "resourceData": { "id": "msg-1" }
        }]
    });
    let response = h
        .app
        .oneshot(
            Request::post("/webhooks/mail")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn metrics_default_is_prometheus_text() {
    let h = server();
    let response = h
        .app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("phishtriage_"));
}

#[tokio::test]
async fn metrics_json_when_accept_header_asks() {
    let h = server();
    let response = h
        .app
        .oneshot(
            Request::get("/metrics")
                .header(header::ACCEPT, "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(parsed.is_object());
}

#[tokio::test]
async fn ready_reports_ok_with_healthy_dependencies() {
    let h = server();
    let response = h
        .app
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn deep_health_reports_components() {
    let h = server();
    let response = h
        .app
        .oneshot(Request::get("/health/deep").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cache"]["backend"], "memory");
    assert_eq!(body["cached"], false);
    assert!(body["memory_bytes"].is_u64());
}

#[tokio::test]
async fn deep_health_is_cached_between_calls() {
    let h = server();
    let first = h
        .app
        .clone()
        .oneshot(Request::get("/health/deep").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = h
        .app
        .oneshot(Request::get("/health/deep").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_str(&body_string(second).await).unwrap();
    assert_eq!(body["cached"], true);
}

//! Operational HTTP Server Module
//! ==============================
//! The axum router: service banner, liveness, cached deep health,
//! readiness, Prometheus/JSON metrics, and the webhook intake route. All
//! routes except `/` and `/webhooks/mail` sit behind the API-key
//! middleware; production with no key configured fails closed.
//!
//! Copyright © 2025 PhishTriage Maintainers. All rights reserved.
//! Licensed under GPL-3.0.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::cache::Cache;
use crate::config::Config;
use crate::ingest::webhook::{constant_time_eq, handle_mail_webhook, WebhookState};
use crate::ingest::SubscriptionManager;
use crate::intel::ThreatIntelService;
use crate::llm::LlmExplainer;
use crate::mail::MailProvider;
use crate::metrics;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared state behind every operational route.
pub struct AppState {
    pub config: Config,
    pub cache: Arc<dyn Cache>,
    pub provider: Arc<dyn MailProvider>,
    pub intel: Option<Arc<ThreatIntelService>>,
    pub explainer: Option<Arc<LlmExplainer>>,
    pub webhook: Arc<WebhookState>,
    pub subscriptions: Option<Arc<SubscriptionManager>>,
    pub started_at: Instant,
    deep_health: RwLock<Option<(Instant, DeepHealthReport)>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        cache: Arc<dyn Cache>,
        provider: Arc<dyn MailProvider>,
        intel: Option<Arc<ThreatIntelService>>,
        explainer: Option<Arc<LlmExplainer>>,
        webhook: Arc<WebhookState>,
        subscriptions: Option<Arc<SubscriptionManager>>,
    ) -> Self {
        AppState {
            config,
            cache,
            provider,
            intel,
            explainer,
            webhook,
            subscriptions,
            started_at: Instant::now(),
            deep_health: RwLock::new(None),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct DeepHealthReport {
    status: &'static str,
    cache: serde_json::Value,
    provider: serde_json::Value,
    queue: serde_json::Value,
    breakers: serde_json::Value,
    subscription: serde_json::Value,
    memory_bytes: u64,
    uptime_seconds: u64,
}

impl DeepHealthReport {
    fn healthy(&self) -> bool {
        self.status == "ok"
    }
}

/// Build the full router.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.http_body_limit;
    let security_headers = state.config.security_headers;
    let mut app = Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/health/deep", get(health_deep))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics_endpoint))
        .route("/webhooks/mail", post(webhook_route))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_api_key,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .with_state(state);
    if security_headers {
        app = app
            .layer(SetResponseHeaderLayer::overriding(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                header::X_FRAME_OPTIONS,
                HeaderValue::from_static("DENY"),
            ));
    }
    app
}

/// Serve until the shutdown future resolves.
pub async fn serve(
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "http server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// API-key middleware. `/` and `/webhooks/mail` are exempt; the webhook
/// authenticates via its own clientState secret.
async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if path == "/" || path == "/webhooks/mail" {
        return next.run(request).await;
    }

    let config = &state.config;
    let expected = if path.starts_with("/metrics") {
        config.metrics_api_key.as_ref().or(config.api_key.as_ref())
    } else if path.starts_with("/health") || path == "/ready" {
        config.health_api_key.as_ref().or(config.api_key.as_ref())
    } else {
        config.api_key.as_ref()
    };

    let Some(expected) = expected else {
        if config.environment.is_production() {
            // Fail closed: no key configured means no access in production.
            warn!(path = %path, "protected route hit with no API key configured");
            return (StatusCode::SERVICE_UNAVAILABLE, "authentication unavailable")
                .into_response();
        }
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !constant_time_eq(presented, expected) {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }
    next.run(request).await
}

async fn banner() -> Json<serde_json::Value> {
    Json(json!({
        "service": "phish-triage",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

async fn health_deep(State(state): State<Arc<AppState>>) -> Response {
    // Serve the cached report while it is fresh.
    {
        let cached = state.deep_health.read().await;
        if let Some((at, report)) = cached.as_ref() {
            if at.elapsed() < state.config.health_cache_ttl {
                return deep_health_response(report, true);
            }
        }
    }

    let report = build_deep_health(&state).await;
    let response = deep_health_response(&report, false);
    *state.deep_health.write().await = Some((Instant::now(), report));
    response
}

fn deep_health_response(report: &DeepHealthReport, cached: bool) -> Response {
    let status = if report.healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let mut body = serde_json::to_value(report).unwrap_or_else(|_| json!({"status": "error"}));
    if let Some(map) = body.as_object_mut() {
        map.insert("cached".into(), json!(cached));
    }
    (status, Json(body)).into_response()
}

async fn build_deep_health(state: &AppState) -> DeepHealthReport {
    let cache_ready = state.cache.is_ready();
    let provider_ok = tokio::time::timeout(PROBE_TIMEOUT, state.provider.probe())
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);

    let breakers: Vec<serde_json::Value> = match &state.intel {
        Some(intel) => intel
            .breaker_states()
            .into_iter()
            .map(|(name, breaker_state)| json!({ "name": name, "state": breaker_state }))
            .collect(),
        None => Vec::new(),
    };
    let mut breakers = breakers;
    if let Some(explainer) = &state.explainer {
        breakers.push(json!({ "name": "llm", "state": explainer.breaker_state() }));
    }

    let subscription_active = match &state.subscriptions {
        Some(manager) => manager.is_active().await,
        None => false,
    };

    let healthy = cache_ready && provider_ok;
    DeepHealthReport {
        status: if healthy { "ok" } else { "degraded" },
        cache: json!({ "ready": cache_ready, "backend": state.cache.backend_name() }),
        provider: json!({ "reachable": provider_ok }),
        queue: json!({ "depth": state.webhook.queue.depth() }),
        breakers: json!(breakers),
        subscription: json!({ "active": subscription_active }),
        memory_bytes: metrics::process_memory_bytes(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }
}

async fn ready(State(state): State<Arc<AppState>>) -> Response {
    let cache_ready = state.cache.is_ready();
    let provider_ok = tokio::time::timeout(PROBE_TIMEOUT, state.provider.probe())
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
    if cache_ready && provider_ok {
        (StatusCode::OK, Json(json!({ "ready": true }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "cache": cache_ready, "provider": provider_ok })),
        )
            .into_response()
    }
}

/// Prometheus text by default, JSON when the client asks for it.
async fn metrics_endpoint(request: Request) -> Response {
    metrics::update_system_metrics();
    let wants_json = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|accept| accept.contains("application/json"))
        .unwrap_or(false);
    if wants_json {
        Json(metrics::encode_metrics_json()).into_response()
    } else {
        (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics::encode_metrics(),
        )
            .into_response()
    }
}

async fn webhook_route(
    State(state): State<Arc<AppState>>,
    query: Query<HashMap<String, String>>,
    body: String,
) -> Response {
    handle_mail_webhook(State(Arc::clone(&state.webhook)), query, body).await
}

#![allow(dead_code)]

//! Shared test fixtures: a recording mock provider and a baseline config.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use phish_triage::analysis::InboundMessage;
use phish_triage::config::{
    Config, DedupConfig, Environment, IntelConfig, LlmConfig, PollerConfig, RateLimitConfig,
    WebhookConfig,
};
use phish_triage::error::TriageError;
use phish_triage::mail::{MailProvider, Subscription, SubscriptionRequest};

/// Records sent mail instead of talking to a real provider.
#[derive(Default)]
pub struct MockProvider {
    pub sent: Mutex<Vec<SentMail>>,
    pub fail_sends: std::sync::atomic::AtomicBool,
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

impl MockProvider {
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_sends
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl MailProvider for MockProvider {
    async fn list_messages(
        &self,
        _mailbox: &str,
        _since: DateTime<Utc>,
        _top: usize,
    ) -> Result<Vec<InboundMessage>, TriageError> {
        Ok(Vec::new())
    }

    async fn get_message(
        &self,
        _mailbox: &str,
        id: &str,
    ) -> Result<InboundMessage, TriageError> {
        Err(TriageError::transient("mock", format!("no message {}", id)))
    }

    async fn send_mail(
        &self,
        _mailbox: &str,
        to: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), TriageError> {
        if self.fail_sends.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(TriageError::transient("mock", "send disabled"));
        }
        self.sent.lock().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
        });
        Ok(())
    }

    async fn create_subscription(
        &self,
        _request: &SubscriptionRequest,
    ) -> Result<Subscription, TriageError> {
        Ok(Subscription {
            id: "sub-1".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }

    async fn renew_subscription(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Subscription, TriageError> {
        Ok(Subscription {
            id: id.to_string(),
            expires_at,
        })
    }

    async fn delete_subscription(&self, _id: &str) -> Result<(), TriageError> {
        Ok(())
    }

    async fn probe(&self) -> Result<(), TriageError> {
        Ok(())
    }
}

/// Development-mode config for tests. Pollers and external services off.
pub fn test_config() -> Config {
    Config {
        environment: Environment::Development,
        port: 0,
        http_body_limit: 1_048_576,
        security_headers: false,
        health_cache_ttl: Duration::from_secs(30),
        api_key: None,
        health_api_key: None,
        metrics_api_key: None,
        mailbox_address: "phishing@example.com".into(),
        allowed_sender_emails: Vec::new(),
        allowed_sender_domains: Vec::new(),
        poller: PollerConfig {
            polling_enabled: false,
            check_interval: Duration::from_secs(60),
            parallel_limit: 2,
            max_pages: 2,
            monitor_enabled: false,
            monitor_interval: Duration::from_secs(900),
            monitor_lookback: Duration::from_secs(1800),
        },
        rate_limit: RateLimitConfig {
            enabled: true,
            max_per_hour: 100,
            max_per_day: 1000,
            burst_threshold: 50,
            burst_window: Duration::from_secs(60),
        },
        dedup: DedupConfig {
            enabled: true,
            content_hash_ttl: Duration::from_secs(3600),
            sender_cooldown: Duration::from_secs(300),
        },
        intel: IntelConfig {
            enabled: false,
            timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(300),
            retry_attempts: 3,
            virustotal_api_key: None,
            abuseipdb_api_key: None,
            urlscan_api_key: None,
        },
        llm: LlmConfig {
            demo_mode: false,
            timeout: Duration::from_secs(10),
            retry_attempts: 3,
            breaker_error_threshold: 0.5,
            breaker_reset: Duration::from_secs(60),
            anthropic_api_key: None,
            model: "claude-3-5-haiku-latest".into(),
        },
        webhook: WebhookConfig {
            notification_url: None,
            client_state: Some("test-client-state".into()),
            subscription_resource: "/users/phishing@example.com/messages".into(),
            renewal_margin: Duration::from_secs(300),
        },
        graph: None,
        redis_url: None,
        redis_key_prefix: "itest".into(),
        queue_capacity: 100,
    }
}

/// A minimal inbound message with unique ids.
pub fn message(sender: &str, subject: &str, body: &str) -> InboundMessage {
    InboundMessage {
        provider_id: format!("prov-{}", uuid::Uuid::new_v4()),
        internet_message_id: Some(format!("<{}@mail.test>", uuid::Uuid::new_v4())),
        subject: subject.to_string(),
        sender: sender.to_string(),
        recipient: "phishing@example.com".to_string(),
        received_at: Utc::now(),
        headers: Vec::new(),
        body: body.to_string(),
        attachments: Vec::new(),
    }
}

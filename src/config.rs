//! Service Configuration
//! =====================
//! Environment-driven configuration with validation at startup.
//!
//! Copyright © 2025 PhishTriage Maintainers. All rights reserved.
//! Licensed under GPL-3.0.

use std::time::Duration;

use crate::error::TriageError;

/// Deployment environment, derived from `NODE_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

/// Rate limiter settings (sliding windows + burst breaker).
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_per_hour: u64,
    pub max_per_day: u64,
    pub burst_threshold: u64,
    pub burst_window: Duration,
}

/// Deduplication settings (content hash TTL + sender cooldown).
#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub enabled: bool,
    pub content_hash_ttl: Duration,
    pub sender_cooldown: Duration,
}

/// Threat-intel enrichment settings.
#[derive(Debug, Clone)]
pub struct IntelConfig {
    pub enabled: bool,
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub retry_attempts: u32,
    pub virustotal_api_key: Option<String>,
    pub abuseipdb_api_key: Option<String>,
    pub urlscan_api_key: Option<String>,
}

/// LLM explanation settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub demo_mode: bool,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub breaker_error_threshold: f64,
    pub breaker_reset: Duration,
    pub anthropic_api_key: Option<String>,
    pub model: String,
}

/// Webhook subscription settings.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub notification_url: Option<String>,
    pub client_state: Option<String>,
    pub subscription_resource: String,
    pub renewal_margin: Duration,
}

/// Mail provider (Microsoft Graph) credentials.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Mailbox polling settings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub polling_enabled: bool,
    pub check_interval: Duration,
    pub parallel_limit: usize,
    pub max_pages: usize,
    pub monitor_enabled: bool,
    pub monitor_interval: Duration,
    pub monitor_lookback: Duration,
}

/// Full service configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub port: u16,
    pub http_body_limit: usize,
    pub security_headers: bool,
    pub health_cache_ttl: Duration,

    pub api_key: Option<String>,
    pub health_api_key: Option<String>,
    pub metrics_api_key: Option<String>,

    pub mailbox_address: String,
    pub allowed_sender_emails: Vec<String>,
    pub allowed_sender_domains: Vec<String>,

    pub poller: PollerConfig,
    pub rate_limit: RateLimitConfig,
    pub dedup: DedupConfig,
    pub intel: IntelConfig,
    pub llm: LlmConfig,
    pub webhook: WebhookConfig,
    pub graph: Option<GraphConfig>,

    pub redis_url: Option<String>,
    pub redis_key_prefix: String,
    pub queue_capacity: usize,
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, TriageError> {
    match env_string(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| TriageError::Fatal(format!("invalid value for {}: {:?}", name, raw))),
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool, TriageError> {
    match env_string(name).as_deref() {
        None => Ok(default),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some("false") | Some("0") | Some("no") => Ok(false),
        Some(other) => Err(TriageError::Fatal(format!(
            "invalid boolean for {}: {:?}",
            name, other
        ))),
    }
}

fn env_millis(name: &str, default_ms: u64) -> Result<Duration, TriageError> {
    Ok(Duration::from_millis(env_parse(name, default_ms)?))
}

fn env_list(name: &str) -> Vec<String> {
    env_string(name)
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    /// Load and validate the configuration from the process environment.
    ///
    /// Any invalid or missing required value is `Fatal`: the caller prints
    /// the error and exits non-zero.
    pub fn from_env() -> Result<Self, TriageError> {
        let environment = match env_string("NODE_ENV").as_deref() {
            Some("production") => Environment::Production,
            _ => Environment::Development,
        };

        let mailbox_address = env_string("PHISHING_MAILBOX_ADDRESS")
            .ok_or_else(|| TriageError::Fatal("PHISHING_MAILBOX_ADDRESS is required".into()))?
            .to_lowercase();
        if !mailbox_address.contains('@') {
            return Err(TriageError::Fatal(format!(
                "PHISHING_MAILBOX_ADDRESS is not an email address: {:?}",
                mailbox_address
            )));
        }

        let allowed_sender_emails = env_list("ALLOWED_SENDER_EMAILS");
        let allowed_sender_domains = env_list("ALLOWED_SENDER_DOMAINS");
        if environment.is_production()
            && allowed_sender_emails.is_empty()
            && allowed_sender_domains.is_empty()
        {
            return Err(TriageError::Fatal(
                "production requires ALLOWED_SENDER_EMAILS or ALLOWED_SENDER_DOMAINS".into(),
            ));
        }

        let api_key = env_string("API_KEY");
        if environment.is_production() && api_key.is_none() {
            return Err(TriageError::Fatal(
                "production requires API_KEY for the operational endpoints".into(),
            ));
        }

        let webhook = WebhookConfig {
            notification_url: env_string("WEBHOOK_NOTIFICATION_URL"),
            client_state: env_string("WEBHOOK_CLIENT_STATE"),
            subscription_resource: env_string("WEBHOOK_SUBSCRIPTION_RESOURCE")
                .unwrap_or_else(|| format!("/users/{}/messages", mailbox_address)),
            renewal_margin: env_millis("WEBHOOK_RENEWAL_MARGIN_MS", 300_000)?,
        };
        if webhook.notification_url.is_some() && webhook.client_state.is_none() {
            return Err(TriageError::Fatal(
                "WEBHOOK_CLIENT_STATE is required when WEBHOOK_NOTIFICATION_URL is set".into(),
            ));
        }

        let graph = match (
            env_string("GRAPH_TENANT_ID"),
            env_string("GRAPH_CLIENT_ID"),
            env_string("GRAPH_CLIENT_SECRET"),
        ) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => Some(GraphConfig {
                tenant_id,
                client_id,
                client_secret,
            }),
            (None, None, None) => None,
            _ => {
                return Err(TriageError::Fatal(
                    "GRAPH_TENANT_ID, GRAPH_CLIENT_ID and GRAPH_CLIENT_SECRET must be set together"
                        .into(),
                ))
            }
        };
        if environment.is_production() && graph.is_none() {
            return Err(TriageError::Fatal(
                "production requires mail provider credentials".into(),
            ));
        }

        let rate_limit = RateLimitConfig {
            enabled: env_bool("RATE_LIMIT_ENABLED", true)?,
            max_per_hour: env_parse("MAX_EMAILS_PER_HOUR", 60)?,
            max_per_day: env_parse("MAX_EMAILS_PER_DAY", 500)?,
            burst_threshold: env_parse("CIRCUIT_BREAKER_THRESHOLD", 10)?,
            burst_window: env_millis("CIRCUIT_BREAKER_WINDOW_MS", 60_000)?,
        };

        let dedup = DedupConfig {
            enabled: env_bool("DEDUPLICATION_ENABLED", true)?,
            content_hash_ttl: env_millis("DEDUPLICATION_TTL_MS", 3_600_000)?,
            sender_cooldown: env_millis("SENDER_COOLDOWN_MS", 300_000)?,
        };

        let intel = IntelConfig {
            enabled: env_bool("THREAT_INTEL_ENABLED", true)?,
            timeout: env_millis("THREAT_INTEL_TIMEOUT_MS", 5_000)?,
            cache_ttl: env_millis("THREAT_INTEL_CACHE_TTL_MS", 300_000)?,
            retry_attempts: env_parse("THREAT_INTEL_RETRY_ATTEMPTS", 3)?,
            virustotal_api_key: env_string("VIRUSTOTAL_API_KEY"),
            abuseipdb_api_key: env_string("ABUSEIPDB_API_KEY"),
            urlscan_api_key: env_string("URLSCAN_API_KEY"),
        };

        let llm = LlmConfig {
            demo_mode: env_bool("LLM_DEMO_MODE", false)?,
            timeout: env_millis("LLM_TIMEOUT_MS", 10_000)?,
            retry_attempts: env_parse("LLM_RETRY_ATTEMPTS", 3)?,
            breaker_error_threshold: env_parse("LLM_CIRCUIT_BREAKER_ERROR_THRESHOLD", 0.5)?,
            breaker_reset: env_millis("LLM_CIRCUIT_BREAKER_RESET_MS", 60_000)?,
            anthropic_api_key: env_string("ANTHROPIC_API_KEY"),
            model: env_string("LLM_MODEL").unwrap_or_else(|| "claude-3-5-haiku-latest".into()),
        };

        let poller = PollerConfig {
            polling_enabled: env_bool("POLLING_ENABLED", true)?,
            check_interval: env_millis("MAILBOX_CHECK_INTERVAL_MS", 60_000)?,
            parallel_limit: env_parse("MAILBOX_PARALLEL_LIMIT", 5)?,
            max_pages: env_parse("MAILBOX_MAX_PAGES", 5)?,
            monitor_enabled: env_bool("MAIL_MONITOR_ENABLED", true)?,
            monitor_interval: env_millis("MAIL_MONITOR_INTERVAL_MS", 900_000)?,
            monitor_lookback: env_millis("MAIL_MONITOR_LOOKBACK_MS", 1_800_000)?,
        };
        if poller.parallel_limit == 0 {
            return Err(TriageError::Fatal("MAILBOX_PARALLEL_LIMIT must be >= 1".into()));
        }

        Ok(Config {
            environment,
            port: env_parse("PORT", 8080)?,
            http_body_limit: env_parse("HTTP_BODY_LIMIT", 1_048_576)?,
            security_headers: env_bool("HELMET_ENABLED", true)?,
            health_cache_ttl: env_millis("HEALTH_CACHE_TTL_MS", 30_000)?,
            api_key,
            health_api_key: env_string("HEALTH_API_KEY"),
            metrics_api_key: env_string("METRICS_API_KEY"),
            mailbox_address,
            allowed_sender_emails,
            allowed_sender_domains,
            poller,
            rate_limit,
            dedup,
            intel,
            llm,
            webhook,
            graph,
            redis_url: env_string("REDIS_URL"),
            redis_key_prefix: env_string("REDIS_KEY_PREFIX").unwrap_or_else(|| "phishtriage".into()),
            queue_capacity: env_parse("NOTIFICATION_QUEUE_CAPACITY", 1_000)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them in one test to avoid
    // interference under the parallel test runner.
    #[test]
    fn test_from_env_roundtrip() {
        let lock = std::sync::Mutex::new(());
        let _guard = lock.lock().unwrap();

        std::env::remove_var("NODE_ENV");
        std::env::set_var("PHISHING_MAILBOX_ADDRESS", "Phishing@Example.COM");
        std::env::set_var("ALLOWED_SENDER_DOMAINS", "Example.com, corp.example.org");
        std::env::set_var("MAX_EMAILS_PER_HOUR", "12");
        std::env::set_var("CIRCUIT_BREAKER_WINDOW_MS", "5000");

        let cfg = Config::from_env().expect("config loads");
        assert_eq!(cfg.environment, Environment::Development);
        assert_eq!(cfg.mailbox_address, "phishing@example.com");
        assert_eq!(
            cfg.allowed_sender_domains,
            vec!["example.com".to_string(), "corp.example.org".to_string()]
        );
        assert_eq!(cfg.rate_limit.max_per_hour, 12);
        assert_eq!(cfg.rate_limit.burst_window, Duration::from_secs(5));

        // Missing mailbox is fatal.
        std::env::remove_var("PHISHING_MAILBOX_ADDRESS");
        assert!(Config::from_env().is_err());

        // Production without allowlist/API key is fatal.
        std::env::set_var("PHISHING_MAILBOX_ADDRESS", "phishing@example.com");
        std::env::set_var("NODE_ENV", "production");
        std::env::remove_var("ALLOWED_SENDER_DOMAINS");
        assert!(Config::from_env().is_err());

        std::env::remove_var("NODE_ENV");
        std::env::remove_var("MAX_EMAILS_PER_HOUR");
        std::env::remove_var("CIRCUIT_BREAKER_WINDOW_MS");
    }
}

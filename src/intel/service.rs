//! Threat-intel enrichment service
//!
//! Fans out to the reputation APIs (up to 3 URLs in parallel, the sender IP
//! once, the sender domain age once), merges the verdicts into indicators
//! and a numeric risk contribution capped at +3.0. Each API call runs as
//! retry-inside-breaker, and every valid verdict is cached by indicator key
//! for the configured TTL.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analysis::{IndicatorCategory, Severity, ThreatIndicator};
use crate::cache::{ns, versioned_key, Cache};
use crate::config::IntelConfig;
use crate::metrics::INTEL_REQUESTS_TOTAL;

use super::breaker::{BreakerConfig, CircuitBreaker};
use super::clients::{AbuseIpDbClient, DomainAgeClient, DomainAge, IpVerdict, UrlVerdict, VirusTotalClient};
use super::retry::{retry, RetryPolicy};

/// Cap on the total intel contribution to the risk score.
pub const MAX_CONTRIBUTION: f64 = 3.0;
/// How many suspicious URLs are checked per message.
const MAX_URL_CHECKS: usize = 3;

/// Result of one enrichment pass. Failures collapse to the empty outcome.
#[derive(Debug, Default)]
pub struct IntelOutcome {
    pub indicators: Vec<ThreatIndicator>,
    pub risk_contribution: f64,
}

/// Cached verdict forms, serialized into the intel cache namespace.
#[derive(Debug, Serialize, Deserialize)]
enum CachedVerdict {
    Url { malicious_ratio: f64, positives: u32, total: u32 },
    Ip { abuse_score: u32, total_reports: u32 },
    Domain { age_days: i64 },
    Miss,
}

pub struct ThreatIntelService {
    cache: Arc<dyn Cache>,
    cfg: IntelConfig,
    key_prefix: String,
    retry_policy: RetryPolicy,
    virustotal: Option<VirusTotalClient>,
    abuseipdb: Option<AbuseIpDbClient>,
    domain_age: DomainAgeClient,
    vt_breaker: CircuitBreaker,
    abuse_breaker: CircuitBreaker,
    domain_breaker: CircuitBreaker,
}

impl ThreatIntelService {
    pub fn new(cache: Arc<dyn Cache>, cfg: IntelConfig, key_prefix: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .unwrap_or_default();
        let breaker_cfg = BreakerConfig::default();

        ThreatIntelService {
            retry_policy: RetryPolicy::with_attempts(cfg.retry_attempts),
            virustotal: cfg
                .virustotal_api_key
                .clone()
                .map(|key| VirusTotalClient::new(http.clone(), key)),
            abuseipdb: cfg
                .abuseipdb_api_key
                .clone()
                .map(|key| AbuseIpDbClient::new(http.clone(), key)),
            domain_age: DomainAgeClient::new(http),
            vt_breaker: CircuitBreaker::new("virustotal", breaker_cfg.clone()),
            abuse_breaker: CircuitBreaker::new("abuseipdb", breaker_cfg.clone()),
            domain_breaker: CircuitBreaker::new("domain-age", breaker_cfg),
            key_prefix: key_prefix.to_string(),
            cache,
            cfg,
        }
    }

    /// Breaker states for deep health reporting.
    pub fn breaker_states(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            ("virustotal", self.vt_breaker.state_name()),
            ("abuseipdb", self.abuse_breaker.state_name()),
            ("domain-age", self.domain_breaker.state_name()),
        ]
    }

    /// Enrich one message. Never fails: any error path degrades to the
    /// empty outcome.
    pub async fn enrich(
        &self,
        sender: &str,
        sender_ip: Option<&str>,
        suspicious_urls: &[String],
    ) -> IntelOutcome {
        if !self.cfg.enabled {
            return IntelOutcome::default();
        }

        let url_futures = suspicious_urls
            .iter()
            .take(MAX_URL_CHECKS)
            .map(|url| self.lookup_url(url));
        let (url_verdicts, ip_verdict, domain_age) = tokio::join!(
            join_all(url_futures),
            async {
                match sender_ip {
                    Some(ip) => self.lookup_ip(ip).await,
                    None => None,
                }
            },
            async {
                match sender.split_once('@') {
                    Some((_, domain)) => self.lookup_domain(&domain.to_lowercase()).await,
                    None => None,
                }
            }
        );

        let mut outcome = IntelOutcome::default();
        let mut contribution = 0.0;

        for verdict in url_verdicts.into_iter().flatten() {
            contribution += url_contribution(&verdict);
            if let Some(indicator) = url_indicator(&verdict) {
                outcome.indicators.push(indicator);
            }
        }
        if let Some(verdict) = ip_verdict {
            contribution += ip_contribution(&verdict);
            if let Some(indicator) = ip_indicator(&verdict) {
                outcome.indicators.push(indicator);
            }
        }
        if let Some(age) = domain_age {
            contribution += domain_contribution(&age);
            if let Some(indicator) = domain_indicator(&age) {
                outcome.indicators.push(indicator);
            }
        }

        outcome.risk_contribution = contribution.min(MAX_CONTRIBUTION);
        debug!(
            contribution = outcome.risk_contribution,
            indicators = outcome.indicators.len(),
            "threat-intel enrichment complete"
        );
        outcome
    }

    async fn lookup_url(&self, url: &str) -> Option<UrlVerdict> {
        let client = self.virustotal.as_ref()?;
        let cache_key = self.intel_key(&format!("vt-url-{}", url));
        if let Some(cached) = self.read_cached(&cache_key).await {
            return match cached {
                CachedVerdict::Url { malicious_ratio, positives, total } => Some(UrlVerdict {
                    url: url.to_string(),
                    malicious_ratio,
                    positives,
                    total,
                }),
                _ => None,
            };
        }

        let result = self
            .vt_breaker
            .call(retry(&self.retry_policy, "virustotal", || client.check_url(url)))
            .await;
        match result {
            Ok(verdict) => {
                INTEL_REQUESTS_TOTAL.with_label_values(&["virustotal", "ok"]).inc();
                let cached = match &verdict {
                    Some(v) => CachedVerdict::Url {
                        malicious_ratio: v.malicious_ratio,
                        positives: v.positives,
                        total: v.total,
                    },
                    None => CachedVerdict::Miss,
                };
                self.write_cached(&cache_key, &cached).await;
                verdict
            }
            Err(err) => {
                INTEL_REQUESTS_TOTAL.with_label_values(&["virustotal", "error"]).inc();
                warn!(api = "virustotal", error = %err, "url lookup failed");
                None
            }
        }
    }

    async fn lookup_ip(&self, ip: &str) -> Option<IpVerdict> {
        let client = self.abuseipdb.as_ref()?;
        let cache_key = self.intel_key(&format!("abuseipdb-{}", ip));
        if let Some(cached) = self.read_cached(&cache_key).await {
            return match cached {
                CachedVerdict::Ip { abuse_score, total_reports } => Some(IpVerdict {
                    ip: ip.to_string(),
                    abuse_score,
                    total_reports,
                }),
                _ => None,
            };
        }

        let result = self
            .abuse_breaker
            .call(retry(&self.retry_policy, "abuseipdb", || client.check_ip(ip)))
            .await;
        match result {
            Ok(verdict) => {
                INTEL_REQUESTS_TOTAL.with_label_values(&["abuseipdb", "ok"]).inc();
                let cached = match &verdict {
                    Some(v) => CachedVerdict::Ip {
                        abuse_score: v.abuse_score,
                        total_reports: v.total_reports,
                    },
                    None => CachedVerdict::Miss,
                };
                self.write_cached(&cache_key, &cached).await;
                verdict
            }
            Err(err) => {
                INTEL_REQUESTS_TOTAL.with_label_values(&["abuseipdb", "error"]).inc();
                warn!(api = "abuseipdb", error = %err, "ip lookup failed");
                None
            }
        }
    }

    async fn lookup_domain(&self, domain: &str) -> Option<DomainAge> {
        let cache_key = self.intel_key(&format!("domain-age-{}", domain));
        if let Some(cached) = self.read_cached(&cache_key).await {
            return match cached {
                CachedVerdict::Domain { age_days } => Some(DomainAge {
                    domain: domain.to_string(),
                    registered_at: chrono::Utc::now() - chrono::Duration::days(age_days),
                    age_days,
                }),
                _ => None,
            };
        }

        let result = self
            .domain_breaker
            .call(retry(&self.retry_policy, "domain-age", || {
                self.domain_age.check_domain(domain)
            }))
            .await;
        match result {
            Ok(age) => {
                INTEL_REQUESTS_TOTAL.with_label_values(&["domain-age", "ok"]).inc();
                let cached = match &age {
                    Some(a) => CachedVerdict::Domain { age_days: a.age_days },
                    None => CachedVerdict::Miss,
                };
                self.write_cached(&cache_key, &cached).await;
                age
            }
            Err(err) => {
                INTEL_REQUESTS_TOTAL.with_label_values(&["domain-age", "error"]).inc();
                warn!(api = "domain-age", error = %err, "domain age lookup failed");
                None
            }
        }
    }

    fn intel_key(&self, raw: &str) -> String {
        versioned_key(&self.key_prefix, ns::INTEL, raw)
    }

    async fn read_cached(&self, key: &str) -> Option<CachedVerdict> {
        let raw = self.cache.get(key).await.ok().flatten()?;
        serde_json::from_str(&raw).ok()
    }

    async fn write_cached(&self, key: &str, verdict: &CachedVerdict) {
        if let Ok(raw) = serde_json::to_string(verdict) {
            if let Err(err) = self.cache.set(key, &raw, Some(self.cfg.cache_ttl)).await {
                warn!(error = %err, "failed to cache intel verdict");
            }
        }
    }
}

// Contribution math is pure so the caps and thresholds stay testable
// without network access.

/// Malicious URL contributes up to +2.5, scaled by detection ratio.
pub fn url_contribution(verdict: &UrlVerdict) -> f64 {
    if verdict.malicious_ratio <= 0.0 {
        return 0.0;
    }
    2.5 * verdict.malicious_ratio.min(1.0)
}

fn url_indicator(verdict: &UrlVerdict) -> Option<ThreatIndicator> {
    if verdict.positives == 0 {
        return None;
    }
    let severity = if verdict.malicious_ratio >= 0.3 {
        Severity::Critical
    } else if verdict.malicious_ratio >= 0.1 {
        Severity::High
    } else {
        Severity::Medium
    };
    Some(ThreatIndicator::new(
        IndicatorCategory::Url,
        severity,
        "URL flagged by reputation engines",
        &format!(
            "{} ({}/{} engines)",
            verdict.url, verdict.positives, verdict.total
        ),
        (0.5 + verdict.malicious_ratio).min(0.95),
    ))
}

/// High-abuse IP contributes up to +2.0, scaled by abuse confidence.
pub fn ip_contribution(verdict: &IpVerdict) -> f64 {
    2.0 * (f64::from(verdict.abuse_score) / 100.0).min(1.0)
}

fn ip_indicator(verdict: &IpVerdict) -> Option<ThreatIndicator> {
    if verdict.abuse_score < 25 {
        return None;
    }
    let severity = if verdict.abuse_score >= 75 {
        Severity::High
    } else {
        Severity::Medium
    };
    Some(ThreatIndicator::new(
        IndicatorCategory::Sender,
        severity,
        "Sending IP has abuse reports",
        &format!(
            "{} scored {} with {} reports",
            verdict.ip, verdict.abuse_score, verdict.total_reports
        ),
        f64::from(verdict.abuse_score) / 100.0,
    ))
}

/// Very new domains (<7 d) contribute +2.0; newish (<30 d) +1.0.
pub fn domain_contribution(age: &DomainAge) -> f64 {
    if age.age_days < 7 {
        2.0
    } else if age.age_days < 30 {
        1.0
    } else {
        0.0
    }
}

fn domain_indicator(age: &DomainAge) -> Option<ThreatIndicator> {
    if age.age_days >= 30 {
        return None;
    }
    let severity = if age.age_days < 7 {
        Severity::High
    } else {
        Severity::Medium
    };
    Some(ThreatIndicator::new(
        IndicatorCategory::Sender,
        severity,
        "Sender domain is newly registered",
        &format!("{} registered {} day(s) ago", age.domain, age.age_days),
        0.8,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use chrono::Utc;

    fn disabled_service() -> ThreatIntelService {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        ThreatIntelService::new(
            cache,
            IntelConfig {
                enabled: false,
                timeout: std::time::Duration::from_secs(5),
                cache_ttl: std::time::Duration::from_secs(300),
                retry_attempts: 3,
                virustotal_api_key: None,
                abuseipdb_api_key: None,
                urlscan_api_key: None,
            },
            "test",
        )
    }

    #[tokio::test]
    async fn test_disabled_service_yields_empty_outcome() {
        let service = disabled_service();
        let outcome = service
            .enrich("a@b.com", Some("203.0.113.7"), &["https://x.test".to_string()])
            .await;
        assert!(outcome.indicators.is_empty());
        assert_eq!(outcome.risk_contribution, 0.0);
    }

    #[test]
    fn test_url_contribution_scales_and_caps() {
        let verdict = UrlVerdict {
            url: "https://x".into(),
            malicious_ratio: 1.0,
            positives: 60,
            total: 60,
        };
        assert_eq!(url_contribution(&verdict), 2.5);
        let verdict = UrlVerdict {
            url: "https://x".into(),
            malicious_ratio: 0.2,
            positives: 12,
            total: 60,
        };
        assert!((url_contribution(&verdict) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_ip_contribution_scales() {
        let verdict = IpVerdict {
            ip: "203.0.113.9".into(),
            abuse_score: 100,
            total_reports: 50,
        };
        assert_eq!(ip_contribution(&verdict), 2.0);
        let verdict = IpVerdict {
            ip: "203.0.113.9".into(),
            abuse_score: 50,
            total_reports: 3,
        };
        assert!((ip_contribution(&verdict) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_domain_contribution_bands() {
        let mk = |days: i64| DomainAge {
            domain: "d.test".into(),
            registered_at: Utc::now() - chrono::Duration::days(days),
            age_days: days,
        };
        assert_eq!(domain_contribution(&mk(3)), 2.0);
        assert_eq!(domain_contribution(&mk(20)), 1.0);
        assert_eq!(domain_contribution(&mk(400)), 0.0);
    }

    #[test]
    fn test_total_contribution_is_capped() {
        let url = UrlVerdict {
            url: "https://x".into(),
            malicious_ratio: 1.0,
            positives: 60,
            total: 60,
        };
        let ip = IpVerdict {
            ip: "203.0.113.9".into(),
            abuse_score: 100,
            total_reports: 50,
        };
        let total = url_contribution(&url) + ip_contribution(&ip);
        assert!(total > MAX_CONTRIBUTION);
        assert_eq!(total.min(MAX_CONTRIBUTION), MAX_CONTRIBUTION);
    }

    #[test]
    fn test_low_signals_emit_no_indicators() {
        assert!(ip_indicator(&IpVerdict {
            ip: "203.0.113.9".into(),
            abuse_score: 10,
            total_reports: 1,
        })
        .is_none());
        assert!(url_indicator(&UrlVerdict {
            url: "https://x".into(),
            malicious_ratio: 0.0,
            positives: 0,
            total: 60,
        })
        .is_none());
        assert!(domain_indicator(&DomainAge {
            domain: "d.test".into(),
            registered_at: Utc::now() - chrono::Duration::days(400),
            age_days: 400,
        })
        .is_none());
    }
}

//! Reputation API clients
//!
//! One thin reqwest client per external API, each with a typed response
//! schema. Deserialization *is* the validation: a payload that does not
//! match the schema yields `None` and a warning, never an error the
//! pipeline would have to handle.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::error::TriageError;

/// Verdict for one URL from the URL-reputation API.
#[derive(Debug, Clone)]
pub struct UrlVerdict {
    pub url: String,
    /// Fraction of engines that flagged the URL, in [0, 1].
    pub malicious_ratio: f64,
    pub positives: u32,
    pub total: u32,
}

/// Verdict for one IP from the IP-reputation API.
#[derive(Debug, Clone)]
pub struct IpVerdict {
    pub ip: String,
    /// Abuse confidence in [0, 100].
    pub abuse_score: u32,
    pub total_reports: u32,
}

/// Registration age for a sender domain.
#[derive(Debug, Clone)]
pub struct DomainAge {
    pub domain: String,
    pub registered_at: DateTime<Utc>,
    pub age_days: i64,
}

#[derive(Debug, Deserialize)]
struct VirusTotalReport {
    positives: u32,
    total: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbuseIpDbData {
    abuse_confidence_score: u32,
    #[serde(default)]
    total_reports: u32,
}

#[derive(Debug, Deserialize)]
struct AbuseIpDbEnvelope {
    data: AbuseIpDbData,
}

#[derive(Debug, Deserialize)]
struct RdapEvent {
    #[serde(rename = "eventAction")]
    event_action: String,
    #[serde(rename = "eventDate")]
    event_date: String,
}

#[derive(Debug, Deserialize)]
struct RdapDomain {
    #[serde(default)]
    events: Vec<RdapEvent>,
}

/// VirusTotal URL-report client.
pub struct VirusTotalClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl VirusTotalClient {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        VirusTotalClient {
            http,
            api_key,
            base_url: "https://www.virustotal.com/vtapi/v2".to_string(),
        }
    }

    pub async fn check_url(&self, url: &str) -> Result<Option<UrlVerdict>, TriageError> {
        let response = self
            .http
            .get(format!("{}/url/report", self.base_url))
            .query(&[("apikey", self.api_key.as_str()), ("resource", url)])
            .send()
            .await
            .map_err(|e| TriageError::transient("virustotal", e))?;
        if !response.status().is_success() {
            return Err(TriageError::transient(
                "virustotal",
                format!("status {}", response.status()),
            ));
        }
        let report: VirusTotalReport = match response.json().await {
            Ok(report) => report,
            Err(err) => {
                warn!(api = "virustotal", error = %err, "response failed schema validation");
                return Ok(None);
            }
        };
        if report.total == 0 {
            return Ok(None);
        }
        Ok(Some(UrlVerdict {
            url: url.to_string(),
            malicious_ratio: f64::from(report.positives) / f64::from(report.total),
            positives: report.positives,
            total: report.total,
        }))
    }
}

/// AbuseIPDB check client.
pub struct AbuseIpDbClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AbuseIpDbClient {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        AbuseIpDbClient {
            http,
            api_key,
            base_url: "https://api.abuseipdb.com/api/v2".to_string(),
        }
    }

    pub async fn check_ip(&self, ip: &str) -> Result<Option<IpVerdict>, TriageError> {
        let response = self
            .http
            .get(format!("{}/check", self.base_url))
            .header("Key", &self.api_key)
            .header("Accept", "application/json")
            .query(&[("ipAddress", ip), ("maxAgeInDays", "90")])
            .send()
            .await
            .map_err(|e| TriageError::transient("abuseipdb", e))?;
        if !response.status().is_success() {
            return Err(TriageError::transient(
                "abuseipdb",
                format!("status {}", response.status()),
            ));
        }
        let envelope: AbuseIpDbEnvelope = match response.json().await {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(api = "abuseipdb", error = %err, "response failed schema validation");
                return Ok(None);
            }
        };
        if envelope.data.abuse_confidence_score > 100 {
            warn!(api = "abuseipdb", "abuse score out of range");
            return Ok(None);
        }
        Ok(Some(IpVerdict {
            ip: ip.to_string(),
            abuse_score: envelope.data.abuse_confidence_score,
            total_reports: envelope.data.total_reports,
        }))
    }
}

/// Domain registration age via RDAP. Keyless.
pub struct DomainAgeClient {
    http: reqwest::Client,
    base_url: String,
}

impl DomainAgeClient {
    pub fn new(http: reqwest::Client) -> Self {
        DomainAgeClient {
            http,
            base_url: "https://rdap.org".to_string(),
        }
    }

    pub async fn check_domain(&self, domain: &str) -> Result<Option<DomainAge>, TriageError> {
        let response = self
            .http
            .get(format!("{}/domain/{}", self.base_url, domain))
            .send()
            .await
            .map_err(|e| TriageError::transient("domain-age", e))?;
        if response.status().as_u16() == 404 {
            // Unregistered or unpublished domain: nothing to learn.
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(TriageError::transient(
                "domain-age",
                format!("status {}", response.status()),
            ));
        }
        let rdap: RdapDomain = match response.json().await {
            Ok(rdap) => rdap,
            Err(err) => {
                warn!(api = "domain-age", error = %err, "response failed schema validation");
                return Ok(None);
            }
        };
        let registered_at = rdap
            .events
            .iter()
            .find(|event| event.event_action == "registration")
            .and_then(|event| DateTime::parse_from_rfc3339(&event.event_date).ok())
            .map(|t| t.with_timezone(&Utc));
        let Some(registered_at) = registered_at else {
            return Ok(None);
        };
        Ok(Some(DomainAge {
            domain: domain.to_string(),
            age_days: (Utc::now() - registered_at).num_days(),
            registered_at,
        }))
    }
}

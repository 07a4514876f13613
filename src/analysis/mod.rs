//! Analysis Module
//! ===============
//! Signal extraction, risk scoring and orchestration: the typed data model,
//! the four pure analyzers, the weighted scorer, and the pipeline that runs
//! them in order.
//!
//! Copyright © 2025 PhishTriage Maintainers. All rights reserved.
//! Licensed under GPL-3.0.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod attachments;
pub mod content;
pub mod headers;
pub mod orchestrator;
pub mod scorer;
pub mod urls;

pub use orchestrator::AnalysisPipeline;

use crate::redact;

/// Threat indicator severity, ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Contribution of one indicator of this severity to its subscore.
    pub fn weight(self) -> f64 {
        match self {
            Severity::Low => 1.5,
            Severity::Medium => 3.0,
            Severity::High => 5.0,
            Severity::Critical => 8.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an indicator came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorCategory {
    Header,
    Content,
    Url,
    Attachment,
    Sender,
    Behavioral,
}

/// A single typed threat signal produced by an analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatIndicator {
    pub category: IndicatorCategory,
    pub severity: Severity,
    pub description: String,
    /// Truncated and PII-redacted before it is stored; never empty.
    pub evidence: String,
    /// In [0, 1].
    pub confidence: f64,
}

impl ThreatIndicator {
    pub fn new(
        category: IndicatorCategory,
        severity: Severity,
        description: impl Into<String>,
        evidence: &str,
        confidence: f64,
    ) -> Self {
        let description = description.into();
        let mut evidence = redact::evidence(evidence);
        if evidence.is_empty() {
            evidence = description.clone();
        }
        ThreatIndicator {
            category,
            severity,
            description,
            evidence,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Priority for a recommended response action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionPriority {
    Low,
    Medium,
    High,
    Urgent,
}

/// A concrete follow-up the security team (or automation) should take.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub priority: ActionPriority,
    pub action: String,
    pub description: String,
    pub automated: bool,
    pub requires_approval: bool,
}

/// Attachment descriptor as delivered by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
}

/// An immutable inbound message, created by the ingestion coordinator and
/// destroyed when the pipeline terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub provider_id: String,
    pub internet_message_id: Option<String>,
    pub subject: String,
    pub sender: String,
    pub recipient: String,
    pub received_at: DateTime<Utc>,
    /// Ordered header pairs; name lookup is case-insensitive.
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub attachments: Vec<AttachmentMeta>,
}

impl InboundMessage {
    /// First header value with the given name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header_name, _)| header_name.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The identity used by the duplicate guard: RFC message-id when
    /// present, provider id otherwise.
    pub fn message_key(&self) -> Option<&str> {
        self.internet_message_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| Some(self.provider_id.as_str()).filter(|id| !id.trim().is_empty()))
    }

    /// Sender domain, lower-cased.
    pub fn sender_domain(&self) -> Option<String> {
        self.sender
            .trim()
            .to_lowercase()
            .split_once('@')
            .map(|(_, domain)| domain.to_string())
    }
}

#[cfg(test)]
impl InboundMessage {
    /// Minimal message for unit tests.
    pub fn for_test(sender: &str, subject: &str, body: &str) -> Self {
        InboundMessage {
            provider_id: format!("prov-{}", uuid::Uuid::new_v4()),
            internet_message_id: Some(format!("<{}@test>", uuid::Uuid::new_v4())),
            subject: subject.to_string(),
            sender: sender.to_string(),
            recipient: "phishing@example.com".to_string(),
            received_at: Utc::now(),
            headers: Vec::new(),
            body: body.to_string(),
            attachments: Vec::new(),
        }
    }
}

/// The final verdict for one analysed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub message_id: String,
    /// Opaque, unique per invocation; doubles as the correlation id.
    pub analysis_id: String,
    pub is_phishing: bool,
    /// Mean of indicator confidences, or 0 when there are none.
    pub confidence: f64,
    /// Clamped to [0, 10].
    pub risk_score: f64,
    pub severity: Severity,
    pub indicators: Vec<ThreatIndicator>,
    pub recommended_actions: Vec<RecommendedAction>,
    pub analyzed_at: DateTime<Utc>,
    pub explanation: Option<String>,
}

/// Deterministic subscore on [0, 10] for a set of indicators.
pub fn subscore(indicators: &[ThreatIndicator]) -> f64 {
    indicators
        .iter()
        .map(|indicator| indicator.severity.weight())
        .sum::<f64>()
        .min(10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut msg = InboundMessage::for_test("a@b.com", "s", "b");
        msg.headers.push(("X-Custom".into(), "one".into()));
        msg.headers.push(("x-custom".into(), "two".into()));
        assert_eq!(msg.header("X-CUSTOM"), Some("one"));
        assert_eq!(msg.header("missing"), None);
    }

    #[test]
    fn test_message_key_prefers_internet_message_id() {
        let mut msg = InboundMessage::for_test("a@b.com", "s", "b");
        msg.internet_message_id = Some("<mid@x>".into());
        msg.provider_id = "prov".into();
        assert_eq!(msg.message_key(), Some("<mid@x>"));
        msg.internet_message_id = None;
        assert_eq!(msg.message_key(), Some("prov"));
        msg.provider_id = "  ".into();
        assert_eq!(msg.message_key(), None);
    }

    #[test]
    fn test_indicator_evidence_never_empty() {
        let indicator = ThreatIndicator::new(
            IndicatorCategory::Content,
            Severity::Low,
            "Something odd",
            "   ",
            0.5,
        );
        assert_eq!(indicator.evidence, "Something odd");
    }

    #[test]
    fn test_indicator_confidence_clamped() {
        let indicator = ThreatIndicator::new(
            IndicatorCategory::Content,
            Severity::Low,
            "x",
            "e",
            1.7,
        );
        assert_eq!(indicator.confidence, 1.0);
    }

    #[test]
    fn test_subscore_clamps_at_ten() {
        let indicators: Vec<ThreatIndicator> = (0..4)
            .map(|i| {
                ThreatIndicator::new(
                    IndicatorCategory::Header,
                    Severity::Critical,
                    format!("ind-{}", i),
                    "e",
                    0.9,
                )
            })
            .collect();
        assert_eq!(subscore(&indicators), 10.0);
        assert_eq!(subscore(&[]), 0.0);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}

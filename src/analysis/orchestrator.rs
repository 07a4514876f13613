//! Analysis orchestrator
//!
//! Runs the analyzers in order (headers, content, attachments), enriches
//! with threat intel, scores, and optionally fetches an LLM explanation.
//! The public entry point is infallible: any internal failure collapses to
//! a safe default result with a single behavioral indicator, and the
//! pipeline never raises to callers.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::TriageError;
use crate::intel::ThreatIntelService;
use crate::llm::LlmExplainer;
use crate::metrics::{ANALYSIS_DURATION_SECONDS, ANALYSIS_RISK_SCORE};
use crate::redact;

use super::content::ContentAnalyzer;
use super::scorer;
use super::{
    attachments, headers, subscore, urls, ActionPriority, AnalysisResult, IndicatorCategory,
    InboundMessage, RecommendedAction, Severity, ThreatIndicator,
};

pub struct AnalysisPipeline {
    content: ContentAnalyzer,
    intel: Option<Arc<ThreatIntelService>>,
    explainer: Option<Arc<LlmExplainer>>,
}

impl AnalysisPipeline {
    pub fn new(
        intel: Option<Arc<ThreatIntelService>>,
        explainer: Option<Arc<LlmExplainer>>,
    ) -> Self {
        AnalysisPipeline {
            content: ContentAnalyzer::new(),
            intel,
            explainer,
        }
    }

    /// Analyze one admitted message. Never fails.
    pub async fn analyze(&self, message: &InboundMessage) -> AnalysisResult {
        let analysis_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let result = match self.run(message, &analysis_id).await {
            Ok(result) => result,
            Err(err) => {
                error!(
                    analysis_id = %analysis_id,
                    error = %redact::redact(&err.to_string()),
                    "analysis failed, returning safe default"
                );
                safe_default(message, &analysis_id, &err)
            }
        };

        ANALYSIS_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
        ANALYSIS_RISK_SCORE.observe(result.risk_score);

        info!(
            analysis_id = %result.analysis_id,
            message_id = %result.message_id,
            is_phishing = result.is_phishing,
            risk_score = result.risk_score,
            severity = %result.severity,
            indicator_count = result.indicators.len(),
            attachment_risk = !message.attachments.is_empty(),
            has_explanation = result.explanation.is_some(),
            "analysis complete"
        );
        result
    }

    async fn run(
        &self,
        message: &InboundMessage,
        analysis_id: &str,
    ) -> Result<AnalysisResult, TriageError> {
        // 1. Header validation.
        let header_indicators = headers::analyze(message);

        // 2. Content against the sender domain, plus URL extraction.
        let sender_domain = message.sender_domain();
        let content_indicators =
            self.content
                .analyze(&message.subject, &message.body, sender_domain.as_deref());
        let url_findings = urls::analyze(&message.body);

        // 3. Attachments.
        let attachment_indicators = attachments::analyze(&message.attachments);

        // 4. Threat intel over the suspicious URLs and sender.
        debug!(analysis_id, stage = "threat-intel", "enriching");
        let intel_outcome = match &self.intel {
            Some(intel) => {
                let sender_ip = headers::extract_sender_ip(message);
                intel
                    .enrich(
                        &message.sender,
                        sender_ip.as_deref(),
                        &url_findings.suspicious_urls,
                    )
                    .await
            }
            None => Default::default(),
        };

        // 5. Weighted score plus intel contribution, clamped.
        debug!(analysis_id, stage = "risk-scoring", "scoring");
        let header_score = subscore(&header_indicators);
        // URL signals fold into the content subscore.
        let mut content_with_urls = content_indicators.clone();
        content_with_urls.extend(url_findings.indicators.clone());
        let content_score = subscore(&content_with_urls);
        let attachment_score = subscore(&attachment_indicators);

        let aggregated = scorer::aggregate(
            header_score,
            content_score,
            attachment_score,
            !message.attachments.is_empty(),
        );
        let risk_score = scorer::finalize(aggregated, intel_outcome.risk_contribution);

        // 6. Merge indicators; band severity with the intel override.
        let mut indicators = header_indicators;
        indicators.extend(content_with_urls);
        indicators.extend(attachment_indicators);
        indicators.extend(intel_outcome.indicators);

        let severity = scorer::severity_for(risk_score, intel_outcome.risk_contribution);
        let is_phishing = risk_score >= scorer::PHISHING_THRESHOLD;
        let confidence = scorer::confidence(&indicators);
        let recommended_actions = scorer::recommended_actions(severity, is_phishing, &indicators);

        let mut result = AnalysisResult {
            message_id: message
                .message_key()
                .unwrap_or(message.provider_id.as_str())
                .to_string(),
            analysis_id: analysis_id.to_string(),
            is_phishing,
            confidence,
            risk_score,
            severity,
            indicators,
            recommended_actions,
            analyzed_at: Utc::now(),
            explanation: None,
        };

        // 7. Optional explanation for borderline scores.
        if let Some(explainer) = &self.explainer {
            debug!(analysis_id, stage = "llm-analysis", "explaining");
            result.explanation = explainer.explain(message, &result).await;
        }

        Ok(result)
    }
}

/// The result returned when analysis itself failed: not phishing, score 0,
/// medium severity, a single behavioral indicator carrying the (redacted)
/// error, and a flag-for-review action.
fn safe_default(
    message: &InboundMessage,
    analysis_id: &str,
    err: &TriageError,
) -> AnalysisResult {
    let indicator = ThreatIndicator::new(
        IndicatorCategory::Behavioral,
        Severity::Medium,
        "Analysis error",
        &redact::redact(&err.to_string()),
        0.1,
    );
    AnalysisResult {
        message_id: message
            .message_key()
            .unwrap_or(message.provider_id.as_str())
            .to_string(),
        analysis_id: analysis_id.to_string(),
        is_phishing: false,
        confidence: indicator.confidence,
        risk_score: 0.0,
        severity: Severity::Medium,
        indicators: vec![indicator],
        recommended_actions: vec![RecommendedAction {
            priority: ActionPriority::Medium,
            action: "flag_for_review".to_string(),
            description: "Automated analysis failed; review manually".to_string(),
            automated: false,
            requires_approval: false,
        }],
        analyzed_at: Utc::now(),
        explanation: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AttachmentMeta;

    fn pipeline() -> AnalysisPipeline {
        AnalysisPipeline::new(None, None)
    }

    #[tokio::test]
    async fn test_safe_email_scores_low() {
        let mut msg = InboundMessage::for_test("john@example.com", "Lunch?", "See you at 1.");
        msg.headers.push((
            "Authentication-Results".into(),
            "mx; spf=pass; dkim=pass; dmarc=pass".into(),
        ));
        let result = pipeline().analyze(&msg).await;
        assert!(!result.is_phishing);
        assert!(result.risk_score < 3.0);
        assert_eq!(result.severity, Severity::Low);
        assert_eq!(result.recommended_actions.len(), 1);
        assert_eq!(result.recommended_actions[0].action, "monitor");
    }

    #[tokio::test]
    async fn test_failed_auth_and_urgency_is_phishing() {
        let mut msg = InboundMessage::for_test(
            "alerts@suspicious.example",
            "URGENT",
            "URGENT: your account will be suspended! Click https://192.168.1.1/claim and enter your password.",
        );
        msg.headers.push((
            "Authentication-Results".into(),
            "mx; spf=fail; dkim=fail; dmarc=fail".into(),
        ));
        let result = pipeline().analyze(&msg).await;
        assert!(result.is_phishing);
        assert!(result.risk_score >= 6.0);
        assert!(matches!(result.severity, Severity::High | Severity::Critical));
        assert!(result.indicators.iter().any(|i| i.description.contains("Urgency")));
        assert!(result.indicators.iter().any(|i| i.description.contains("Credential")));
    }

    #[tokio::test]
    async fn test_typosquat_with_empty_body_is_phishing() {
        let msg = InboundMessage::for_test("noreply@paypa1.com", "", "");
        let result = pipeline().analyze(&msg).await;
        assert!(result.is_phishing, "score was {}", result.risk_score);
        let typo = result
            .indicators
            .iter()
            .find(|i| i.description.contains("Typosquatting"))
            .expect("typosquat indicator");
        assert_eq!(typo.severity, Severity::Critical);
        assert!(typo.description.contains("PayPal"));
    }

    #[tokio::test]
    async fn test_double_extension_attachment_drives_block_action() {
        let mut msg = InboundMessage::for_test("user@corp.example", "Invoice", "see attached");
        msg.attachments.push(AttachmentMeta {
            filename: "invoice.pdf.exe".into(),
            content_type: "application/octet-stream".into(),
            size_bytes: 50_000,
        });
        let result = pipeline().analyze(&msg).await;
        let double = result
            .indicators
            .iter()
            .find(|i| i.description.contains("Double extension"))
            .expect("double extension indicator");
        assert_eq!(double.severity, Severity::Critical);
        assert!(result
            .recommended_actions
            .iter()
            .any(|a| a.action == "block_attachment"));
    }

    #[tokio::test]
    async fn test_confidence_is_mean_of_indicators() {
        let mut msg = InboundMessage::for_test("a@b.example", "s", "b");
        msg.headers.push((
            "Authentication-Results".into(),
            "mx; spf=fail".into(),
        ));
        let result = pipeline().analyze(&msg).await;
        let expected = result.indicators.iter().map(|i| i.confidence).sum::<f64>()
            / result.indicators.len() as f64;
        assert!((result.confidence - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_score_always_in_range() {
        // A maximally noisy message still clamps to 10.
        let mut msg = InboundMessage::for_test(
            "noreply@paypa1.com",
            "URGENT final notice",
            "Enter your password at https://192.168.1.1/x now! Wire transfer needed. https://bit.ly/y",
        );
        msg.headers.push((
            "Authentication-Results".into(),
            "mx; spf=fail; dkim=fail; dmarc=reject".into(),
        ));
        msg.attachments.push(AttachmentMeta {
            filename: "run.pdf.exe".into(),
            content_type: "application/octet-stream".into(),
            size_bytes: 10,
        });
        let result = pipeline().analyze(&msg).await;
        assert!(result.risk_score <= 10.0);
        assert!(result.risk_score >= 0.0);
        assert_eq!(result.severity, Severity::Critical);
    }

    #[test]
    fn test_safe_default_shape() {
        let msg = InboundMessage::for_test("a@b.com", "s", "b");
        let result = safe_default(&msg, "aid", &TriageError::Internal("boom".into()));
        assert!(!result.is_phishing);
        assert_eq!(result.risk_score, 0.0);
        assert_eq!(result.severity, Severity::Medium);
        assert_eq!(result.indicators.len(), 1);
        assert_eq!(result.indicators[0].category, IndicatorCategory::Behavioral);
        assert_eq!(result.recommended_actions[0].action, "flag_for_review");
    }
}

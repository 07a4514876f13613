//! Risk scorer
//!
//! Weighted aggregation of the analyzer subscores, severity banding with
//! the threat-intel override, and recommended-action selection.
//!
//! The override intentionally biases upward: a final score already in the
//! override range is promoted even when its base band was lower.

use super::{
    ActionPriority, IndicatorCategory, RecommendedAction, Severity, ThreatIndicator,
};

/// Phishing verdict threshold on the final score.
pub const PHISHING_THRESHOLD: f64 = 5.0;

/// Weighted aggregate of the subscores, before the intel contribution.
///
/// With attachments present header evidence carries 40% and content and
/// attachments 30% each; without attachments headers carry 60% and content
/// 40%.
pub fn aggregate(
    header_score: f64,
    content_score: f64,
    attachment_score: f64,
    has_attachments: bool,
) -> f64 {
    if has_attachments {
        0.4 * header_score + 0.3 * content_score + 0.3 * attachment_score
    } else {
        0.6 * header_score + 0.4 * content_score
    }
}

/// Final score: aggregate plus intel contribution, clamped to [0, 10].
pub fn finalize(aggregated: f64, intel_contribution: f64) -> f64 {
    (aggregated + intel_contribution).clamp(0.0, 10.0)
}

/// Severity banding over the final score, with the intel override.
pub fn severity_for(final_score: f64, intel_contribution: f64) -> Severity {
    let base = if final_score < 3.0 {
        Severity::Low
    } else if final_score < 6.0 {
        Severity::Medium
    } else if final_score < 8.0 {
        Severity::High
    } else {
        Severity::Critical
    };

    if intel_contribution >= 2.0 && final_score >= 8.0 {
        return Severity::Critical;
    }
    if intel_contribution >= 1.0 && (6.0..8.0).contains(&final_score) {
        return base.max(Severity::High);
    }
    base
}

/// Mean indicator confidence, or 0 for an empty set.
pub fn confidence(indicators: &[ThreatIndicator]) -> f64 {
    if indicators.is_empty() {
        return 0.0;
    }
    indicators.iter().map(|i| i.confidence).sum::<f64>() / indicators.len() as f64
}

fn action(
    priority: ActionPriority,
    name: &str,
    description: &str,
    automated: bool,
    requires_approval: bool,
) -> RecommendedAction {
    RecommendedAction {
        priority,
        action: name.to_string(),
        description: description.to_string(),
        automated,
        requires_approval,
    }
}

/// Recommended follow-ups for a classified message.
pub fn recommended_actions(
    severity: Severity,
    is_phishing: bool,
    indicators: &[ThreatIndicator],
) -> Vec<RecommendedAction> {
    let mut actions = Vec::new();

    match severity {
        Severity::Critical => {
            actions.push(action(
                ActionPriority::Urgent,
                "quarantine_email",
                "Remove the message from all recipient mailboxes",
                true,
                false,
            ));
            actions.push(action(
                ActionPriority::Urgent,
                "alert_security_team",
                "Page the security on-call with the analysis summary",
                true,
                false,
            ));
            actions.push(action(
                ActionPriority::High,
                "create_incident",
                "Open an incident for tracking and forensics",
                false,
                false,
            ));
        }
        Severity::High => {
            actions.push(action(
                ActionPriority::High,
                "alert_security_team",
                "Notify the security team for review",
                true,
                false,
            ));
            actions.push(action(
                ActionPriority::High,
                "flag_for_review",
                "Queue the message for analyst review",
                false,
                false,
            ));
        }
        Severity::Medium => {
            actions.push(action(
                ActionPriority::Medium,
                "flag_for_review",
                "Queue the message for analyst review",
                false,
                false,
            ));
            actions.push(action(
                ActionPriority::Low,
                "user_education",
                "Send the reporter guidance on spotting this pattern",
                false,
                false,
            ));
        }
        Severity::Low => {}
    }

    if severity >= Severity::High
        && indicators
            .iter()
            .any(|i| i.description.contains("Credential"))
    {
        actions.push(action(
            ActionPriority::Urgent,
            "reset_user_credentials",
            "Reset credentials for targeted accounts",
            false,
            true,
        ));
    }

    let has_critical_attachment = indicators.iter().any(|i| {
        i.category == IndicatorCategory::Attachment && i.severity == Severity::Critical
    });
    if has_critical_attachment {
        actions.push(action(
            ActionPriority::Urgent,
            "block_attachment",
            "Block the attachment hash at the gateway",
            true,
            false,
        ));
    }
    let has_macro_attachment = indicators.iter().any(|i| {
        i.category == IndicatorCategory::Attachment && i.description.contains("Macro-enabled")
    });
    if has_macro_attachment {
        actions.push(action(
            ActionPriority::High,
            "strip_macros",
            "Deliver a macro-stripped copy if the document is needed",
            true,
            false,
        ));
    }

    if actions.is_empty() && !is_phishing {
        actions.push(action(
            ActionPriority::Low,
            "monitor",
            "No action needed; keep for baseline statistics",
            true,
            false,
        ));
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{IndicatorCategory, ThreatIndicator};

    fn indicator(
        category: IndicatorCategory,
        severity: Severity,
        description: &str,
        conf: f64,
    ) -> ThreatIndicator {
        ThreatIndicator::new(category, severity, description, "evidence", conf)
    }

    #[test]
    fn test_aggregate_weights() {
        assert_eq!(aggregate(10.0, 10.0, 0.0, false), 10.0);
        assert!((aggregate(10.0, 5.0, 0.0, false) - 8.0).abs() < 1e-9);
        assert!((aggregate(10.0, 5.0, 10.0, true) - 8.5).abs() < 1e-9);
    }

    #[test]
    fn test_finalize_clamps() {
        assert_eq!(finalize(9.5, 3.0), 10.0);
        assert_eq!(finalize(-1.0, 0.0), 0.0);
        assert!((finalize(4.0, 1.5) - 5.5).abs() < 1e-9);
    }

    #[test]
    fn test_severity_bands() {
        assert_eq!(severity_for(0.0, 0.0), Severity::Low);
        assert_eq!(severity_for(2.9, 0.0), Severity::Low);
        assert_eq!(severity_for(3.0, 0.0), Severity::Medium);
        assert_eq!(severity_for(5.9, 0.0), Severity::Medium);
        assert_eq!(severity_for(6.0, 0.0), Severity::High);
        assert_eq!(severity_for(7.9, 0.0), Severity::High);
        assert_eq!(severity_for(8.0, 0.0), Severity::Critical);
        assert_eq!(severity_for(10.0, 0.0), Severity::Critical);
    }

    #[test]
    fn test_intel_override_promotes() {
        // Already critical band stays critical.
        assert_eq!(severity_for(8.5, 2.5), Severity::Critical);
        // High band with strong intel stays high (not critical: score < 8).
        assert_eq!(severity_for(7.0, 2.5), Severity::High);
        // Mid-high score with moderate intel is promoted to high.
        assert_eq!(severity_for(6.5, 1.2), Severity::High);
        // Below 6 the override does not apply.
        assert_eq!(severity_for(5.5, 2.5), Severity::Medium);
    }

    #[test]
    fn test_confidence_mean() {
        assert_eq!(confidence(&[]), 0.0);
        let indicators = vec![
            indicator(IndicatorCategory::Header, Severity::High, "a", 0.8),
            indicator(IndicatorCategory::Content, Severity::Low, "b", 0.4),
        ];
        assert!((confidence(&indicators) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_low_non_phishing_gets_single_monitor() {
        let actions = recommended_actions(Severity::Low, false, &[]);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, "monitor");
    }

    #[test]
    fn test_critical_gets_quarantine_and_incident() {
        let actions = recommended_actions(Severity::Critical, true, &[]);
        let names: Vec<_> = actions.iter().map(|a| a.action.as_str()).collect();
        assert!(names.contains(&"quarantine_email"));
        assert!(names.contains(&"alert_security_team"));
        assert!(names.contains(&"create_incident"));
        assert!(actions
            .iter()
            .filter(|a| a.action != "create_incident")
            .all(|a| a.priority == ActionPriority::Urgent));
    }

    #[test]
    fn test_credential_indicator_drives_reset_action() {
        let indicators = vec![indicator(
            IndicatorCategory::Content,
            Severity::High,
            "Credential harvesting language",
            0.85,
        )];
        let actions = recommended_actions(Severity::High, true, &indicators);
        let reset = actions
            .iter()
            .find(|a| a.action == "reset_user_credentials")
            .expect("reset action present");
        assert_eq!(reset.priority, ActionPriority::Urgent);
        assert!(reset.requires_approval);
    }

    #[test]
    fn test_attachment_families_drive_actions() {
        let critical = vec![indicator(
            IndicatorCategory::Attachment,
            Severity::Critical,
            "Double extension masks an executable",
            0.97,
        )];
        let actions = recommended_actions(Severity::Medium, false, &critical);
        assert!(actions.iter().any(|a| a.action == "block_attachment"));

        let macros = vec![indicator(
            IndicatorCategory::Attachment,
            Severity::High,
            "Macro-enabled Office document",
            0.85,
        )];
        let actions = recommended_actions(Severity::Medium, false, &macros);
        assert!(actions.iter().any(|a| a.action == "strip_macros"));
    }
}

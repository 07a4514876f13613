//! Reply dispatcher
//!
//! Formats the HTML verdict reply and sends it, gated by the rate limiter.
//! Ordering contract: the rate-limit send record and the dedup record are
//! written only after the provider accepted the reply, in that order.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::admission::{Deduplicator, RateLimiter};
use crate::analysis::{AnalysisResult, InboundMessage};
use crate::error::TriageError;
use crate::metrics::{REPLIES_SENT_TOTAL, REPLY_FAILURES_TOTAL, REPLY_LATENCY_SECONDS};

use super::MailProvider;

/// Bounded rendering: only the strongest indicators and actions make the
/// reply.
const MAX_INDICATORS_SHOWN: usize = 5;
const MAX_ACTIONS_SHOWN: usize = 3;

pub struct ReplyDispatcher {
    provider: Arc<dyn MailProvider>,
    limiter: Arc<RateLimiter>,
    dedup: Arc<Deduplicator>,
    mailbox: String,
}

impl ReplyDispatcher {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        limiter: Arc<RateLimiter>,
        dedup: Arc<Deduplicator>,
        mailbox: String,
    ) -> Self {
        ReplyDispatcher {
            provider,
            limiter,
            dedup,
            mailbox,
        }
    }

    /// Send the verdict reply for one analysed message.
    ///
    /// A rate-limit denial is a clean exit (no reply, no error). A provider
    /// failure is surfaced so the coordinator can attempt the bounded error
    /// reply.
    pub async fn dispatch(
        &self,
        message: &InboundMessage,
        result: &AnalysisResult,
    ) -> Result<(), TriageError> {
        let recipient = message.sender.trim();
        if recipient.is_empty() {
            warn!(analysis_id = %result.analysis_id, "no sender address, skipping reply");
            return Ok(());
        }

        let decision = self.limiter.can_send().await;
        if !decision.allowed {
            info!(
                analysis_id = %result.analysis_id,
                reason = decision.reason.as_deref().unwrap_or("unknown"),
                "reply suppressed by rate limiter"
            );
            return Ok(());
        }

        let subject = reply_subject(message, result);
        let html = render_reply(result);

        let started = Instant::now();
        match self
            .provider
            .send_mail(&self.mailbox, recipient, &subject, &html)
            .await
        {
            Ok(()) => {
                // Ordering: record the send, then mark the content processed.
                self.limiter.record_send().await;
                self.dedup
                    .record_processed(&message.sender, &message.subject, &message.body)
                    .await;
                REPLY_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());
                REPLIES_SENT_TOTAL.with_label_values(&["verdict"]).inc();
                info!(analysis_id = %result.analysis_id, "verdict reply sent");
                Ok(())
            }
            Err(err) => {
                REPLY_FAILURES_TOTAL.inc();
                warn!(analysis_id = %result.analysis_id, error = %err, "reply send failed");
                Err(err)
            }
        }
    }

    /// Best-effort apology with the correlation id, for failed analyses.
    /// Bounded by the same rate limiter; a failure here is only logged.
    pub async fn dispatch_error_reply(&self, message: &InboundMessage, correlation_id: &str) {
        let recipient = message.sender.trim();
        if recipient.is_empty() {
            return;
        }
        let decision = self.limiter.can_send().await;
        if !decision.allowed {
            info!(correlation_id, "error reply suppressed by rate limiter");
            return;
        }
        let html = render_error_reply(correlation_id);
        match self
            .provider
            .send_mail(
                &self.mailbox,
                recipient,
                "Re: your phishing report (analysis unavailable)",
                &html,
            )
            .await
        {
            Ok(()) => {
                self.limiter.record_send().await;
                REPLIES_SENT_TOTAL.with_label_values(&["error"]).inc();
            }
            Err(err) => {
                REPLY_FAILURES_TOTAL.inc();
                warn!(correlation_id, error = %err, "error reply send failed");
            }
        }
    }
}

fn reply_subject(message: &InboundMessage, result: &AnalysisResult) -> String {
    let verdict = if result.is_phishing { "PHISHING" } else { "No threat found" };
    let original = message.subject.trim();
    if original.is_empty() {
        format!("[{}] Analysis of your reported email", verdict)
    } else {
        format!("[{}] Re: {}", verdict, original)
    }
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render the bounded HTML verdict body.
pub fn render_reply(result: &AnalysisResult) -> String {
    let (banner, color) = if result.is_phishing {
        ("⚠️ Likely phishing", "#c0392b")
    } else {
        ("✅ No threat detected", "#27ae60")
    };

    let mut indicators_html = String::new();
    for indicator in result.indicators.iter().take(MAX_INDICATORS_SHOWN) {
        indicators_html.push_str(&format!(
            "<li><b>[{}]</b> {} <i>({})</i></li>",
            indicator.severity,
            escape_html(&indicator.description),
            escape_html(&indicator.evidence)
        ));
    }
    if indicators_html.is_empty() {
        indicators_html.push_str("<li>No threat indicators found.</li>");
    }

    let mut actions_html = String::new();
    for action in result.recommended_actions.iter().take(MAX_ACTIONS_SHOWN) {
        actions_html.push_str(&format!(
            "<li><b>{}</b>: {}</li>",
            escape_html(&action.action),
            escape_html(&action.description)
        ));
    }

    let explanation_html = result
        .explanation
        .as_deref()
        .map(|text| format!("<p><i>{}</i></p>", escape_html(text)))
        .unwrap_or_default();

    format!(
        "<html><body style=\"font-family:sans-serif\">\
         <h2 style=\"color:{color}\">{banner}</h2>\
         <p>Risk score: <b>{score:.1}/10</b> &middot; Severity: <b>{severity}</b> \
         &middot; Confidence: <b>{confidence:.0}%</b></p>\
         {explanation}\
         <h3>Top indicators</h3><ul>{indicators}</ul>\
         <h3>Recommended actions</h3><ul>{actions}</ul>\
         <p style=\"color:#888;font-size:12px\">Analysis id: {analysis_id}. \
         This mailbox is automated; do not reply.</p>\
         </body></html>",
        color = color,
        banner = banner,
        score = result.risk_score,
        severity = result.severity,
        confidence = result.confidence * 100.0,
        explanation = explanation_html,
        indicators = indicators_html,
        actions = actions_html,
        analysis_id = result.analysis_id,
    )
}

fn render_error_reply(correlation_id: &str) -> String {
    format!(
        "<html><body style=\"font-family:sans-serif\">\
         <h2>We could not analyse your report</h2>\
         <p>Something went wrong while analysing the email you forwarded. The \
         security team has been notified and will review it manually.</p>\
         <p style=\"color:#888;font-size:12px\">Reference: {}</p>\
         </body></html>",
        escape_html(correlation_id)
    )
}

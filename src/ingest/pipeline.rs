//! The single message-processing path
//!
//! Every intake source (webhook workers, pollers) hands messages to
//! [`TriagePipeline::process`]: guards, dedup, analysis, reply, records.
//! Admission denials exit cleanly with a metric and a structured warning;
//! analysis never fails; a failed reply triggers the bounded error reply.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::admission::{Deduplicator, GuardChain};
use crate::analysis::{AnalysisPipeline, InboundMessage};
use crate::mail::ReplyDispatcher;
use crate::metrics::{EMAILS_BLOCKED_TOTAL, EMAILS_PROCESSED_TOTAL};

pub struct TriagePipeline {
    guards: GuardChain,
    dedup: Arc<Deduplicator>,
    analyzer: AnalysisPipeline,
    reply: ReplyDispatcher,
}

/// Stable metric label for a denial reason that may carry dynamic detail.
fn blocked_label(reason: &str) -> &'static str {
    if reason.starts_with("Duplicate email") {
        "duplicate-content"
    } else if reason.starts_with("Sender in cooldown") {
        "sender-cooldown"
    } else {
        match reason {
            "missing-sender" => "missing-sender",
            "missing-message-id" => "missing-message-id",
            "duplicate-message-id" => "duplicate-message-id",
            "self-sender-detected" => "self-sender-detected",
            "sender-not-allowlisted" => "sender-not-allowlisted",
            "auto-responder-detected" => "auto-responder-detected",
            _ => "other",
        }
    }
}

impl TriagePipeline {
    pub fn new(
        guards: GuardChain,
        dedup: Arc<Deduplicator>,
        analyzer: AnalysisPipeline,
        reply: ReplyDispatcher,
    ) -> Self {
        TriagePipeline {
            guards,
            dedup,
            analyzer,
            reply,
        }
    }

    /// Run one message through the full pipeline.
    pub async fn process(&self, message: InboundMessage) {
        debug!(provider_id = %message.provider_id, "message entering pipeline");

        // Guards run strictly before any external I/O.
        let decision = self.guards.admit(&message);
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_default();
            EMAILS_BLOCKED_TOTAL
                .with_label_values(&[blocked_label(&reason)])
                .inc();
            EMAILS_PROCESSED_TOTAL.with_label_values(&["blocked"]).inc();
            warn!(
                provider_id = %message.provider_id,
                reason = %reason,
                "message blocked by guard chain"
            );
            return;
        }

        let decision = self
            .dedup
            .should_process(&message.sender, &message.subject, &message.body)
            .await;
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_default();
            EMAILS_BLOCKED_TOTAL
                .with_label_values(&[blocked_label(&reason)])
                .inc();
            EMAILS_PROCESSED_TOTAL.with_label_values(&["blocked"]).inc();
            warn!(
                provider_id = %message.provider_id,
                reason = %reason,
                "message blocked by deduplicator"
            );
            return;
        }

        let result = self.analyzer.analyze(&message).await;

        match self.reply.dispatch(&message, &result).await {
            Ok(()) => {
                EMAILS_PROCESSED_TOTAL.with_label_values(&["analyzed"]).inc();
            }
            Err(err) => {
                EMAILS_PROCESSED_TOTAL.with_label_values(&["failed"]).inc();
                warn!(
                    analysis_id = %result.analysis_id,
                    error = %err,
                    "verdict reply failed, attempting error reply"
                );
                self.reply
                    .dispatch_error_reply(&message, &result.analysis_id)
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_label_maps_dynamic_reasons() {
        assert_eq!(
            blocked_label("Duplicate email already processed (hash: ab12cd34)"),
            "duplicate-content"
        );
        assert_eq!(
            blocked_label("Sender in cooldown period (next allowed: 2025-06-01T00:00:00Z)"),
            "sender-cooldown"
        );
        assert_eq!(blocked_label("duplicate-message-id"), "duplicate-message-id");
        assert_eq!(blocked_label("unexpected"), "other");
    }
}

//! LLM explainer
//!
//! Optional natural-language explanation for borderline verdicts. Admission
//! is score-gated (4.0..=6.0, or demo mode); the call itself is the same
//! retry-inside-breaker shape as the threat-intel clients. Every failure
//! mode returns `None` and the pipeline continues without an explanation.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analysis::{AnalysisResult, InboundMessage};
use crate::config::LlmConfig;
use crate::error::TriageError;
use crate::intel::breaker::{BreakerConfig, CircuitBreaker};
use crate::intel::retry::{retry, RetryPolicy};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_BODY_CHARS: usize = 1500;
const MAX_TOKENS: u32 = 512;

/// Score band considered borderline enough to justify an LLM call.
const EXPLAIN_MIN: f64 = 4.0;
const EXPLAIN_MAX: f64 = 6.0;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

pub struct LlmExplainer {
    http: reqwest::Client,
    cfg: LlmConfig,
    retry_policy: RetryPolicy,
    breaker: CircuitBreaker,
    api_key: String,
    base_url: String,
}

impl LlmExplainer {
    /// Returns `None` when no API key is configured; the pipeline then
    /// skips explanations entirely.
    pub fn from_config(cfg: &LlmConfig) -> Option<Self> {
        let api_key = cfg.anthropic_api_key.clone()?;
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .unwrap_or_default();
        let breaker = CircuitBreaker::new(
            "llm",
            BreakerConfig {
                call_timeout: cfg.timeout,
                error_threshold: cfg.breaker_error_threshold,
                reset_timeout: cfg.breaker_reset,
                ..BreakerConfig::default()
            },
        );
        Some(LlmExplainer {
            http,
            retry_policy: RetryPolicy::with_attempts(cfg.retry_attempts),
            breaker,
            api_key,
            base_url: ANTHROPIC_API_URL.to_string(),
            cfg: cfg.clone(),
        })
    }

    /// Admission gate: borderline scores only, unless demo mode forces it.
    pub fn should_explain(&self, risk_score: f64) -> bool {
        self.cfg.demo_mode || (EXPLAIN_MIN..=EXPLAIN_MAX).contains(&risk_score)
    }

    pub fn breaker_state(&self) -> &'static str {
        self.breaker.state_name()
    }

    /// Fetch an explanation for a scored message. Infallible by contract.
    pub async fn explain(
        &self,
        message: &InboundMessage,
        result: &AnalysisResult,
    ) -> Option<String> {
        if !self.should_explain(result.risk_score) {
            return None;
        }

        let prompt = build_prompt(message, result);
        let outcome = self
            .breaker
            .call(retry(&self.retry_policy, "llm", || self.request(&prompt)))
            .await;

        match outcome {
            Ok(Some(text)) => {
                debug!(analysis_id = %result.analysis_id, "explanation generated");
                Some(text)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "llm explanation failed, continuing without one");
                None
            }
        }
    }

    async fn request(&self, prompt: &str) -> Result<Option<String>, TriageError> {
        let body = MessagesRequest {
            model: &self.cfg.model,
            max_tokens: MAX_TOKENS,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
        };
        let response = self
            .http
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| TriageError::transient("llm", e))?;
        if !response.status().is_success() {
            return Err(TriageError::transient(
                "llm",
                format!("status {}", response.status()),
            ));
        }
        let parsed: MessagesResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(api = "llm", error = %err, "response failed schema validation");
                return Ok(None);
            }
        };
        // Empty content array or non-text content both degrade to nil.
        let text = parsed
            .content
            .iter()
            .find(|block| block.kind == "text" && !block.text.trim().is_empty())
            .map(|block| block.text.trim().to_string());
        Ok(text)
    }
}

fn build_prompt(message: &InboundMessage, result: &AnalysisResult) -> String {
    let body_head: String = message.body.chars().take(MAX_BODY_CHARS).collect();
    let indicator_digest = result
        .indicators
        .iter()
        .map(|i| format!("- [{}] {}", i.severity, i.description))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are assisting an email security team. An automated triage scored the \
         following reported message {:.1}/10 ({}). Explain in two or three sentences, \
         for the person who reported it, why the message is or is not likely to be \
         phishing. Be concrete and do not speculate beyond the signals.\n\n\
         Subject: {}\nSender: {}\nBody (truncated):\n{}\n\nSignals:\n{}",
        result.risk_score,
        result.severity,
        message.subject,
        message.sender,
        body_head,
        indicator_digest
    )
}

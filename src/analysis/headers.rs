//! Header authentication analyzer
//!
//! Inspects `Authentication-Results`, `Received-SPF` and related headers,
//! classifies each mechanism as pass/softfail/fail/reject/none, and emits
//! indicators whose severity tracks the weakest result: DMARC reject
//! outweighs DKIM fail outweighs SPF softfail.

use lazy_static::lazy_static;
use regex::Regex;

use super::{IndicatorCategory, InboundMessage, Severity, ThreatIndicator};

/// Outcome of one authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Pass,
    SoftFail,
    Fail,
    Reject,
    None,
}

impl AuthOutcome {
    fn parse(token: &str) -> AuthOutcome {
        match token.to_lowercase().as_str() {
            "pass" => AuthOutcome::Pass,
            "softfail" => AuthOutcome::SoftFail,
            "fail" | "permerror" | "hardfail" => AuthOutcome::Fail,
            "reject" => AuthOutcome::Reject,
            _ => AuthOutcome::None,
        }
    }
}

lazy_static! {
    static ref SPF_RE: Regex = Regex::new(r"(?i)\bspf\s*=\s*(\w+)").expect("spf regex");
    static ref DKIM_RE: Regex = Regex::new(r"(?i)\bdkim\s*=\s*(\w+)").expect("dkim regex");
    static ref DMARC_RE: Regex = Regex::new(r"(?i)\bdmarc\s*=\s*(\w+)").expect("dmarc regex");
    static ref RECEIVED_SPF_RE: Regex =
        Regex::new(r"(?i)^\s*(pass|softfail|fail|neutral|none)").expect("received-spf regex");
    static ref ORIGINATING_IP_RE: Regex =
        Regex::new(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})").expect("originating-ip regex");
}

/// Parsed authentication state for one message.
#[derive(Debug, Clone, Copy)]
pub struct AuthResults {
    pub spf: AuthOutcome,
    pub dkim: AuthOutcome,
    pub dmarc: AuthOutcome,
    /// True when no recognised authentication header was present at all.
    pub absent: bool,
}

/// Extract authentication outcomes from the message headers.
pub fn parse_auth_results(message: &InboundMessage) -> AuthResults {
    let mut spf = AuthOutcome::None;
    let mut dkim = AuthOutcome::None;
    let mut dmarc = AuthOutcome::None;
    let mut saw_any = false;

    for (name, value) in &message.headers {
        if name.eq_ignore_ascii_case("authentication-results") {
            saw_any = true;
            if let Some(m) = SPF_RE.captures(value) {
                spf = AuthOutcome::parse(&m[1]);
            }
            if let Some(m) = DKIM_RE.captures(value) {
                dkim = AuthOutcome::parse(&m[1]);
            }
            if let Some(m) = DMARC_RE.captures(value) {
                dmarc = AuthOutcome::parse(&m[1]);
            }
        } else if name.eq_ignore_ascii_case("received-spf") {
            saw_any = true;
            if spf == AuthOutcome::None {
                if let Some(m) = RECEIVED_SPF_RE.captures(value) {
                    spf = AuthOutcome::parse(&m[1]);
                }
            }
        } else if name.eq_ignore_ascii_case("dkim-signature") {
            saw_any = true;
        }
    }

    AuthResults {
        spf,
        dkim,
        dmarc,
        absent: !saw_any,
    }
}

/// Best-effort originating IP for threat-intel enrichment.
pub fn extract_sender_ip(message: &InboundMessage) -> Option<String> {
    if let Some(value) = message.header("X-Originating-IP") {
        if let Some(m) = ORIGINATING_IP_RE.captures(value) {
            return Some(m[1].to_string());
        }
    }
    for (name, value) in &message.headers {
        if name.eq_ignore_ascii_case("received") {
            if let Some(m) = ORIGINATING_IP_RE.captures(value) {
                return Some(m[1].to_string());
            }
        }
    }
    None
}

/// Emit indicators for failing or missing authentication.
pub fn analyze(message: &InboundMessage) -> Vec<ThreatIndicator> {
    let results = parse_auth_results(message);
    let mut indicators = Vec::new();

    if results.absent {
        indicators.push(ThreatIndicator::new(
            IndicatorCategory::Header,
            Severity::Medium,
            "No authentication results present",
            "message carries no Authentication-Results, Received-SPF or DKIM-Signature header",
            0.6,
        ));
        return indicators;
    }

    match results.dmarc {
        AuthOutcome::Reject => indicators.push(ThreatIndicator::new(
            IndicatorCategory::Header,
            Severity::Critical,
            "DMARC policy rejected the sender",
            "dmarc=reject",
            0.95,
        )),
        AuthOutcome::Fail => indicators.push(ThreatIndicator::new(
            IndicatorCategory::Header,
            Severity::High,
            "DMARC validation failed",
            "dmarc=fail",
            0.9,
        )),
        _ => {}
    }

    match results.dkim {
        AuthOutcome::Fail | AuthOutcome::Reject => indicators.push(ThreatIndicator::new(
            IndicatorCategory::Header,
            Severity::High,
            "DKIM signature validation failed",
            "dkim=fail",
            0.85,
        )),
        AuthOutcome::SoftFail => indicators.push(ThreatIndicator::new(
            IndicatorCategory::Header,
            Severity::Medium,
            "DKIM signature soft-failed",
            "dkim=softfail",
            0.7,
        )),
        _ => {}
    }

    match results.spf {
        AuthOutcome::Fail | AuthOutcome::Reject => indicators.push(ThreatIndicator::new(
            IndicatorCategory::Header,
            Severity::High,
            "SPF validation failed",
            "spf=fail",
            0.8,
        )),
        AuthOutcome::SoftFail => indicators.push(ThreatIndicator::new(
            IndicatorCategory::Header,
            Severity::Medium,
            "SPF validation soft-failed",
            "spf=softfail",
            0.7,
        )),
        _ => {}
    }

    indicators
}

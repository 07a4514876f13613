//! PII redaction for log output and stored evidence
//!
//! Everything that ends up in a log line or an indicator evidence string
//! passes through here first: email local parts are masked, IPv4 addresses
//! lose their last octet, and long token-shaped strings are removed.

use lazy_static::lazy_static;
use regex::Regex;

/// Maximum length of an indicator evidence string after truncation.
pub const MAX_EVIDENCE_LEN: usize = 200;

lazy_static! {
    static ref EMAIL_RE: Regex =
        Regex::new(r"(?i)\b([A-Z0-9._%+-])[A-Z0-9._%+-]*@([A-Z0-9.-]+\.[A-Z]{2,})\b")
            .expect("email regex");
    static ref IPV4_RE: Regex =
        Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3})\.\d{1,3}\b").expect("ipv4 regex");
    // Bearer tokens, API keys and other long opaque secrets.
    static ref TOKEN_RE: Regex =
        Regex::new(r"\b[A-Za-z0-9_\-]{32,}\b").expect("token regex");
}

/// Redact PII from an arbitrary string.
///
/// `john.doe@example.com` becomes `j***@example.com`, `192.168.1.45`
/// becomes `192.168.1.x`, and anything that looks like a credential is
/// replaced with `[redacted]`.
pub fn redact(input: &str) -> String {
    let masked = EMAIL_RE.replace_all(input, "$1***@$2");
    let masked = IPV4_RE.replace_all(&masked, "$1.x");
    TOKEN_RE.replace_all(&masked, "[redacted]").into_owned()
}

/// Truncate a string to `max` characters on a char boundary, appending an
/// ellipsis marker when anything was cut.
pub fn truncate(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    let mut out: String = input.chars().take(max).collect();
    out.push('…');
    out
}

/// Redact and truncate in one step. Used for indicator evidence.
pub fn evidence(input: &str) -> String {
    truncate(&redact(input.trim()), MAX_EVIDENCE_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_email_local_part() {
        let out = redact("report from john.doe@example.com today");
        assert_eq!(out, "report from j***@example.com today");
    }

    #[test]
    fn test_redacts_ipv4_last_octet() {
        let out = redact("seen at 10.0.42.117");
        assert_eq!(out, "seen at 10.0.42.x");
    }

    #[test]
    fn test_redacts_token_shaped_strings() {
        let out = redact("key=sk_ant_0123456789abcdef0123456789abcdef");
        assert!(out.contains("[redacted]"));
        assert!(!out.contains("0123456789abcdef"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        let out = truncate("héllo wörld", 5);
        assert_eq!(out, "héllo…");
    }

    #[test]
    fn test_evidence_bounds_length() {
        let long = "a".repeat(500);
        assert!(evidence(&long).chars().count() <= MAX_EVIDENCE_LEN + 1);
    }
}

//! URL analyzer
//!
//! Extracts every `http(s)` URL from the message body and flags shortener
//! hosts, IP-literal hosts, suspicious TLDs, user-info disguises and parse
//! failures. HTML anchors are additionally checked for display-text/href
//! host mismatch after the display text is stripped to plain text.

use lazy_static::lazy_static;
use regex::Regex;
use url::{Host, Url};

use super::{IndicatorCategory, Severity, ThreatIndicator};

const SHORTENER_HOSTS: &[&str] = &[
    "bit.ly", "tinyurl.com", "goo.gl", "t.co", "ow.ly", "is.gd", "buff.ly", "rebrand.ly",
    "cutt.ly", "rb.gy", "shorturl.at", "tiny.cc",
];

const SUSPICIOUS_TLDS: &[&str] = &[".tk", ".ml", ".ga", ".cf", ".gq", ".xyz", ".top", ".win"];

lazy_static! {
    static ref URL_RE: Regex =
        Regex::new(r#"(?i)https?://[^\s<>"'\)\]]+"#).expect("url regex");
    static ref ANCHOR_RE: Regex = Regex::new(
        r#"(?is)<a\s[^>]*href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#
    )
    .expect("anchor regex");
    static ref TAG_RE: Regex = Regex::new(r"(?s)<[^>]*>").expect("tag regex");
}

/// Output of the URL pass: indicators plus the URLs worth a reputation
/// lookup, flagged ones first.
#[derive(Debug, Default)]
pub struct UrlFindings {
    pub indicators: Vec<ThreatIndicator>,
    pub suspicious_urls: Vec<String>,
}

/// Scan the body for URLs and anchor mismatches.
pub fn analyze(body: &str) -> UrlFindings {
    let mut findings = UrlFindings::default();
    let mut clean_urls = Vec::new();

    for m in URL_RE.find_iter(body) {
        let raw = m.as_str().trim_end_matches(['.', ',', ';', '!', '?']);
        let before = findings.indicators.len();
        inspect_url(raw, &mut findings.indicators);
        if findings.indicators.len() > before {
            findings.suspicious_urls.push(raw.to_string());
        } else {
            clean_urls.push(raw.to_string());
        }
    }

    for caps in ANCHOR_RE.captures_iter(body) {
        let href = caps[1].trim().to_string();
        let display = TAG_RE.replace_all(&caps[2], "").trim().to_string();
        if let Some(indicator) = check_anchor_mismatch(&href, &display) {
            findings.indicators.push(indicator);
            if !findings.suspicious_urls.contains(&href) {
                findings.suspicious_urls.push(href);
            }
        }
    }

    // Clean URLs are still candidates for reputation lookups, after the
    // flagged ones.
    findings.suspicious_urls.extend(clean_urls);
    findings.suspicious_urls.dedup();
    findings
}

fn inspect_url(raw: &str, indicators: &mut Vec<ThreatIndicator>) {
    let parsed = match Url::parse(raw) {
        Ok(parsed) => parsed,
        Err(_) => {
            indicators.push(ThreatIndicator::new(
                IndicatorCategory::Url,
                Severity::Medium,
                "Unparseable URL",
                raw,
                0.6,
            ));
            return;
        }
    };

    if !parsed.username().is_empty() {
        indicators.push(ThreatIndicator::new(
            IndicatorCategory::Url,
            Severity::High,
            "URL carries user-info disguise",
            raw,
            0.85,
        ));
    }

    match parsed.host() {
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => {
            indicators.push(ThreatIndicator::new(
                IndicatorCategory::Url,
                Severity::High,
                "URL with IP-address host",
                raw,
                0.9,
            ));
        }
        Some(Host::Domain(domain)) => {
            let domain = domain.to_lowercase();
            if SHORTENER_HOSTS.iter().any(|host| domain == *host) {
                indicators.push(ThreatIndicator::new(
                    IndicatorCategory::Url,
                    Severity::Medium,
                    "Shortened URL hides destination",
                    raw,
                    0.7,
                ));
            }
            if SUSPICIOUS_TLDS.iter().any(|tld| domain.ends_with(tld)) {
                indicators.push(ThreatIndicator::new(
                    IndicatorCategory::Url,
                    Severity::Medium,
                    "URL on suspicious top-level domain",
                    raw,
                    0.7,
                ));
            }
        }
        None => {}
    }
}

fn check_anchor_mismatch(href: &str, display: &str) -> Option<ThreatIndicator> {
    let href_host = Url::parse(href).ok()?.host_str()?.to_lowercase();
    // Only meaningful when the visible text itself looks like a URL.
    let display_url = URL_RE.find(display)?;
    let display_host = Url::parse(display_url.as_str()).ok()?.host_str()?.to_lowercase();
    if href_host != display_host {
        return Some(ThreatIndicator::new(
            IndicatorCategory::Url,
            Severity::High,
            "Link text does not match destination",
            &format!("text shows {:?} but href goes to {:?}", display_host, href_host),
            0.85,
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_urls_extracted_without_flags() {
        let findings = analyze("see https://docs.example.com/guide for details");
        assert!(findings.indicators.is_empty());
        assert_eq!(findings.suspicious_urls, vec!["https://docs.example.com/guide"]);
    }

    #[test]
    fn test_ip_host_flagged_high() {
        let findings = analyze("click https://192.168.1.1/claim now");
        assert_eq!(findings.indicators.len(), 1);
        assert_eq!(findings.indicators[0].severity, Severity::High);
        assert!(findings.indicators[0].description.contains("IP-address"));
        assert_eq!(findings.suspicious_urls[0], "https://192.168.1.1/claim");
    }

    #[test]
    fn test_shortener_flagged() {
        let findings = analyze("http://bit.ly/3xyz");
        assert!(findings
            .indicators
            .iter()
            .any(|i| i.description.contains("Shortened")));
    }

    #[test]
    fn test_suspicious_tld_flagged() {
        let findings = analyze("visit https://login-secure.xyz/account");
        assert!(findings
            .indicators
            .iter()
            .any(|i| i.description.contains("suspicious top-level domain")));
    }

    #[test]
    fn test_userinfo_disguise_flagged() {
        let findings = analyze("https://paypal.com@evil.example/login");
        assert!(findings
            .indicators
            .iter()
            .any(|i| i.description.contains("user-info")));
    }

    #[test]
    fn test_anchor_mismatch_detected() {
        let body = r#"<a href="https://evil.example/x"><b>https://bank.example/login</b></a>"#;
        let findings = analyze(body);
        assert!(findings
            .indicators
            .iter()
            .any(|i| i.description.contains("does not match")));
    }

    #[test]
    fn test_anchor_matching_hosts_not_flagged() {
        let body = r#"<a href="https://bank.example/login">https://bank.example/login</a>"#;
        let findings = analyze(body);
        assert!(findings.indicators.is_empty());
    }

    #[test]
    fn test_plain_text_anchor_display_ignored() {
        let body = r#"<a href="https://news.example/story">Read the story</a>"#;
        let findings = analyze(body);
        assert!(findings.indicators.is_empty());
    }

    #[test]
    fn test_trailing_punctuation_stripped() {
        let findings = analyze("go to https://example.com/page.");
        assert_eq!(findings.suspicious_urls, vec!["https://example.com/page"]);
    }
}

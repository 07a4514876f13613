//! Content tactics analyzer
//!
//! Detects urgency tactics, credential-harvesting phrases, brand
//! impersonation (including typosquatted sender domains) and
//! social-engineering patterns. One indicator per tactic class. The brand
//! dictionary is a configurable resource with a built-in default set;
//! typosquatting is matched against the sender domain even when the body
//! is empty.

use aho_corasick::AhoCorasick;
use lazy_static::lazy_static;

use super::{IndicatorCategory, Severity, ThreatIndicator};

const URGENCY_PHRASES: &[&str] = &[
    "urgent",
    "immediately",
    "act now",
    "right away",
    "within 24 hours",
    "final notice",
    "final warning",
    "last chance",
    "expires today",
    "account will be suspended",
    "account has been suspended",
    "account will be closed",
    "account will be locked",
    "unusual activity",
    "immediate action required",
];

const CREDENTIAL_PHRASES: &[&str] = &[
    "enter your password",
    "verify your password",
    "confirm your password",
    "update your password",
    "verify your account",
    "confirm your identity",
    "verify your identity",
    "update your billing",
    "confirm your payment details",
    "enter your credentials",
    "sign in to your account",
    "log in to your account",
    "login to confirm",
    "social security number",
    "one-time passcode",
];

const SOCIAL_PHRASES: &[&str] = &[
    "wire transfer",
    "gift card",
    "gift cards",
    "keep this confidential",
    "do not tell anyone",
    "are you available",
    "i need a favor",
    "quick favor",
    "payment urgently",
    "change of bank details",
    "new banking details",
];

/// A protected brand with its legitimate domains.
#[derive(Debug, Clone)]
pub struct Brand {
    pub name: &'static str,
    pub domains: &'static [&'static str],
}

/// Default brand dictionary. Overridable at construction.
pub const DEFAULT_BRANDS: &[Brand] = &[
    Brand { name: "PayPal", domains: &["paypal.com", "paypal.co.uk"] },
    Brand { name: "Microsoft", domains: &["microsoft.com", "outlook.com", "live.com", "office.com"] },
    Brand { name: "Apple", domains: &["apple.com", "icloud.com"] },
    Brand { name: "Amazon", domains: &["amazon.com", "amazon.co.uk", "amazon.de"] },
    Brand { name: "Google", domains: &["google.com", "gmail.com"] },
    Brand { name: "Netflix", domains: &["netflix.com"] },
    Brand { name: "DocuSign", domains: &["docusign.com", "docusign.net"] },
    Brand { name: "DHL", domains: &["dhl.com", "dhl.de"] },
    Brand { name: "FedEx", domains: &["fedex.com"] },
    Brand { name: "Chase", domains: &["chase.com"] },
    Brand { name: "Bank of America", domains: &["bankofamerica.com"] },
    Brand { name: "Wells Fargo", domains: &["wellsfargo.com"] },
];

lazy_static! {
    static ref URGENCY_AC: AhoCorasick = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(URGENCY_PHRASES)
        .expect("urgency matcher");
    static ref CREDENTIAL_AC: AhoCorasick = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(CREDENTIAL_PHRASES)
        .expect("credential matcher");
    static ref SOCIAL_AC: AhoCorasick = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(SOCIAL_PHRASES)
        .expect("social matcher");
}

/// Levenshtein distance, used for typosquat detection on short domains.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

/// Normalise common homoglyph substitutions before comparing domains.
fn fold_homoglyphs(domain: &str) -> String {
    domain
        .chars()
        .map(|c| match c {
            '1' => 'l',
            '0' => 'o',
            '3' => 'e',
            '5' => 's',
            '7' => 't',
            _ => c,
        })
        .collect()
}

fn first_match(ac: &AhoCorasick, haystack: &str) -> Option<(String, usize)> {
    ac.find(haystack)
        .map(|m| (haystack[m.start()..m.end()].to_string(), ac.find_iter(haystack).count()))
}

/// Content analyzer over subject, body and the sender domain.
pub struct ContentAnalyzer {
    brands: Vec<Brand>,
}

impl ContentAnalyzer {
    pub fn new() -> Self {
        ContentAnalyzer {
            brands: DEFAULT_BRANDS.to_vec(),
        }
    }

    pub fn with_brands(brands: Vec<Brand>) -> Self {
        ContentAnalyzer { brands }
    }

    /// Run all tactic detectors. Emits at most one indicator per class.
    pub fn analyze(
        &self,
        subject: &str,
        body: &str,
        sender_domain: Option<&str>,
    ) -> Vec<ThreatIndicator> {
        let mut indicators = Vec::new();
        let text = format!("{}\n{}", subject, body);

        if let Some((matched, count)) = first_match(&URGENCY_AC, &text) {
            indicators.push(ThreatIndicator::new(
                IndicatorCategory::Content,
                Severity::Medium,
                "Urgency tactics in message text",
                &format!("{} urgency phrase(s), first: {:?}", count, matched),
                0.75,
            ));
        }

        if let Some((matched, count)) = first_match(&CREDENTIAL_AC, &text) {
            indicators.push(ThreatIndicator::new(
                IndicatorCategory::Content,
                Severity::High,
                "Credential harvesting language",
                &format!("{} credential phrase(s), first: {:?}", count, matched),
                0.85,
            ));
        }

        if let Some((matched, count)) = first_match(&SOCIAL_AC, &text) {
            indicators.push(ThreatIndicator::new(
                IndicatorCategory::Content,
                Severity::Medium,
                "Social engineering pattern",
                &format!("{} social-engineering phrase(s), first: {:?}", count, matched),
                0.7,
            ));
        }

        if let Some(domain) = sender_domain {
            indicators.extend(self.check_sender_domain(domain));
        }
        if let Some(indicator) = self.check_brand_mention(&text, sender_domain) {
            indicators.push(indicator);
        }

        indicators
    }

    /// Typosquat check against the brand dictionary. Runs even when the
    /// body is empty; the sender domain alone can convict.
    fn check_sender_domain(&self, sender_domain: &str) -> Option<ThreatIndicator> {
        let domain = sender_domain.trim().to_lowercase();
        let folded = fold_homoglyphs(&domain);

        for brand in &self.brands {
            for legit in brand.domains {
                if domain == *legit {
                    return None;
                }
                let distance = edit_distance(&domain, legit).min(edit_distance(&folded, legit));
                if distance <= 1 {
                    return Some(ThreatIndicator::new(
                        IndicatorCategory::Sender,
                        Severity::Critical,
                        format!("Typosquatting of {} domain", brand.name),
                        &format!("sender domain {:?} resembles {:?}", domain, legit),
                        0.9,
                    ));
                }
            }
        }
        None
    }

    /// Brand named in the text while the sender is unrelated to it.
    fn check_brand_mention(
        &self,
        text: &str,
        sender_domain: Option<&str>,
    ) -> Option<ThreatIndicator> {
        let lower = text.to_lowercase();
        for brand in &self.brands {
            if !lower.contains(&brand.name.to_lowercase()) {
                continue;
            }
            let sender_matches_brand = sender_domain
                .map(|domain| {
                    brand
                        .domains
                        .iter()
                        .any(|legit| domain == *legit || domain.ends_with(&format!(".{}", legit)))
                })
                .unwrap_or(false);
            if !sender_matches_brand {
                return Some(ThreatIndicator::new(
                    IndicatorCategory::Content,
                    Severity::High,
                    format!("Possible {} brand impersonation", brand.name),
                    &format!(
                        "message names {} but sender domain is {:?}",
                        brand.name,
                        sender_domain.unwrap_or("unknown")
                    ),
                    0.8,
                ));
            }
        }
        None
    }
}

impl Default for ContentAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("paypal", "paypal"), 0);
        assert_eq!(edit_distance("paypa1", "paypal"), 1);
        assert_eq!(edit_distance("micros0ft", "microsoft"), 1);
        assert_eq!(edit_distance("abc", "xyz"), 3);
    }

    #[test]
    fn test_clean_text_yields_nothing() {
        let analyzer = ContentAnalyzer::new();
        let indicators = analyzer.analyze("Lunch?", "See you at 1.", Some("example.com"));
        assert!(indicators.is_empty());
    }

    #[test]
    fn test_urgency_and_credential_detected() {
        let analyzer = ContentAnalyzer::new();
        let indicators = analyzer.analyze(
            "URGENT: action needed",
            "Your account will be suspended! Enter your password here.",
            Some("example.com"),
        );
        assert!(indicators.iter().any(|i| i.description.contains("Urgency")));
        assert!(indicators.iter().any(|i| i.description.contains("Credential")));
    }

    #[test]
    fn test_one_indicator_per_tactic_class() {
        let analyzer = ContentAnalyzer::new();
        let indicators = analyzer.analyze(
            "urgent final notice act now",
            "immediately, last chance, expires today",
            Some("example.com"),
        );
        let urgency: Vec<_> = indicators
            .iter()
            .filter(|i| i.description.contains("Urgency"))
            .collect();
        assert_eq!(urgency.len(), 1);
    }

    #[test]
    fn test_typosquat_detected_with_empty_body() {
        let analyzer = ContentAnalyzer::new();
        let indicators = analyzer.analyze("", "", Some("paypa1.com"));
        assert_eq!(indicators.len(), 1);
        let indicator = &indicators[0];
        assert_eq!(indicator.severity, Severity::Critical);
        assert!(indicator.description.contains("Typosquatting"));
        assert!(indicator.description.contains("PayPal"));
    }

    #[test]
    fn test_legitimate_brand_domain_not_flagged() {
        let analyzer = ContentAnalyzer::new();
        let indicators = analyzer.analyze(
            "Your PayPal receipt",
            "Thanks for your payment.",
            Some("paypal.com"),
        );
        assert!(indicators.is_empty());
    }

    #[test]
    fn test_brand_mention_from_unrelated_sender() {
        let analyzer = ContentAnalyzer::new();
        let indicators = analyzer.analyze(
            "Microsoft account alert",
            "sign the document",
            Some("random-host.ru"),
        );
        assert!(indicators
            .iter()
            .any(|i| i.description.contains("Microsoft") && i.description.contains("impersonation")));
    }

    #[test]
    fn test_social_engineering_detected() {
        let analyzer = ContentAnalyzer::new();
        let indicators = analyzer.analyze(
            "quick question",
            "Are you available? I need a favor - buy gift cards and keep this confidential.",
            Some("example.com"),
        );
        assert!(indicators
            .iter()
            .any(|i| i.description.contains("Social engineering")));
    }
}

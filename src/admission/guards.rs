//! Guard chain: ordered admission predicates
//!
//! First-match evaluation, strictly before any external I/O. The chain drops
//! self-loops, duplicate message ids, auto-responders, and non-allowlisted
//! senders so the expensive pipeline only ever sees real reports.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;

use crate::analysis::InboundMessage;
use crate::config::Config;

use super::Decision;

/// Bounded message-id cache size.
const SEEN_CAP: usize = 5_000;
/// Message ids are remembered for 24 h.
const SEEN_TTL_HOURS: i64 = 24;

lazy_static! {
    static ref AUTO_SUBMITTED_RE: Regex =
        Regex::new(r"(?i)auto-replied|auto-generated|auto-notified").expect("auto-submitted regex");
    static ref PRECEDENCE_RE: Regex =
        Regex::new(r"(?i)bulk|junk|auto_reply").expect("precedence regex");
    static ref SUPPRESS_RE: Regex =
        Regex::new(r"(?i)\b(all|dr|autoreply)\b").expect("suppress regex");
    static ref DAEMON_RE: Regex =
        Regex::new(r"(?i)mailer-daemon|postmaster").expect("daemon regex");
}

pub struct GuardChain {
    mailbox: String,
    mailbox_local: String,
    mailbox_domain: String,
    allowed_emails: Vec<String>,
    allowed_domains: Vec<String>,
    production: bool,
    // message-id -> first seen
    seen: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl GuardChain {
    pub fn new(config: &Config) -> Self {
        let mailbox = config.mailbox_address.trim().to_lowercase();
        let (local, domain) = mailbox.split_once('@').unwrap_or((mailbox.as_str(), ""));
        GuardChain {
            mailbox_local: local.to_string(),
            mailbox_domain: domain.to_string(),
            mailbox,
            allowed_emails: config.allowed_sender_emails.clone(),
            allowed_domains: config.allowed_sender_domains.clone(),
            production: config.environment.is_production(),
            seen: RwLock::new(HashMap::new()),
        }
    }

    /// Evaluate the chain in order; earlier matches shadow later ones.
    pub fn admit(&self, message: &InboundMessage) -> Decision {
        let sender = message.sender.trim().to_lowercase();

        // 1. missing-sender
        if sender.is_empty() {
            return Decision::deny("missing-sender");
        }

        // 2. missing-message-id
        let message_key = match message.message_key() {
            Some(key) => key.to_string(),
            None => return Decision::deny("missing-message-id"),
        };

        // 3. duplicate-message-id (records first sight)
        if self.seen_before(&message_key) {
            return Decision::deny("duplicate-message-id");
        }

        // 4. self-sender-detected
        if self.is_self_sender(&sender) {
            return Decision::deny("self-sender-detected");
        }

        // 5. sender-not-allowlisted
        if !self.sender_allowed(&sender) {
            return Decision::deny("sender-not-allowlisted");
        }

        // 6. auto-responder-detected
        if self.is_auto_responder(&sender, message) {
            return Decision::deny("auto-responder-detected");
        }

        Decision::allow()
    }

    /// Check-and-record against the bounded 24 h message-id cache.
    fn seen_before(&self, message_key: &str) -> bool {
        let now = Utc::now();
        let ttl = ChronoDuration::hours(SEEN_TTL_HOURS);
        let mut seen = self.seen.write();

        if let Some(first_seen) = seen.get(message_key) {
            if now - *first_seen < ttl {
                return true;
            }
        }

        if seen.len() >= SEEN_CAP {
            // Prune expired entries first; only then evict the oldest.
            seen.retain(|_, first_seen| now - *first_seen < ttl);
            if seen.len() >= SEEN_CAP {
                if let Some(oldest) = seen
                    .iter()
                    .min_by_key(|(_, first_seen)| **first_seen)
                    .map(|(key, _)| key.clone())
                {
                    seen.remove(&oldest);
                }
            }
        }

        seen.insert(message_key.to_string(), now);
        false
    }

    fn is_self_sender(&self, sender: &str) -> bool {
        if sender == self.mailbox {
            return true;
        }
        // phishing-noreply@, phishing.alerts@ and friends on our own domain.
        if let Some((local, domain)) = sender.split_once('@') {
            if domain == self.mailbox_domain && local.starts_with(&self.mailbox_local) {
                return true;
            }
        }
        false
    }

    fn sender_allowed(&self, sender: &str) -> bool {
        if self.allowed_emails.is_empty() && self.allowed_domains.is_empty() {
            // No allowlist configured: fail-open outside production.
            return !self.production;
        }
        if self.allowed_emails.iter().any(|allowed| allowed == sender) {
            return true;
        }
        if let Some((_, domain)) = sender.split_once('@') {
            return self
                .allowed_domains
                .iter()
                .any(|allowed| domain == allowed || domain.ends_with(&format!(".{}", allowed)));
        }
        false
    }

    fn is_auto_responder(&self, sender: &str, message: &InboundMessage) -> bool {
        if DAEMON_RE.is_match(sender) {
            return true;
        }
        for (name, value) in &message.headers {
            if DAEMON_RE.is_match(name) || DAEMON_RE.is_match(value) {
                return true;
            }
        }
        if let Some(value) = message.header("Auto-Submitted") {
            if AUTO_SUBMITTED_RE.is_match(value) {
                return true;
            }
        }
        if let Some(value) = message.header("Precedence") {
            if PRECEDENCE_RE.is_match(value) {
                return true;
            }
        }
        if let Some(value) = message.header("X-Auto-Response-Suppress") {
            if SUPPRESS_RE.is_match(value) {
                return true;
            }
        }
        false
    }

    /// Number of remembered message ids, for deep health reporting.
    pub fn seen_len(&self) -> usize {
        self.seen.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::InboundMessage;
    use crate::config::{Config, Environment};

    fn test_config(allowed_domains: Vec<&str>, production: bool) -> Config {
        let mut cfg = crate::test_support::base_config();
        cfg.mailbox_address = "phishing@example.com".into();
        cfg.allowed_sender_domains = allowed_domains.into_iter().map(String::from).collect();
        cfg.environment = if production {
            Environment::Production
        } else {
            Environment::Development
        };
        cfg
    }

    fn message(sender: &str) -> InboundMessage {
        InboundMessage::for_test(sender, "subject", "body")
    }

    #[test]
    fn test_missing_sender_denied_first() {
        let chain = GuardChain::new(&test_config(vec![], false));
        let mut msg = message("  ");
        // Even with everything else wrong, missing-sender wins.
        msg.provider_id = String::new();
        msg.internet_message_id = None;
        assert_eq!(chain.admit(&msg).reason.as_deref(), Some("missing-sender"));
    }

    #[test]
    fn test_missing_message_id_denied() {
        let chain = GuardChain::new(&test_config(vec![], false));
        let mut msg = message("user@corp.com");
        msg.provider_id = String::new();
        msg.internet_message_id = None;
        assert_eq!(chain.admit(&msg).reason.as_deref(), Some("missing-message-id"));
    }

    #[test]
    fn test_duplicate_message_id_denied_on_second_sight() {
        let chain = GuardChain::new(&test_config(vec![], false));
        let msg = message("user@corp.com");
        assert!(chain.admit(&msg).allowed);
        assert_eq!(
            chain.admit(&msg).reason.as_deref(),
            Some("duplicate-message-id")
        );
    }

    #[test]
    fn test_self_sender_exact_and_prefixed() {
        let chain = GuardChain::new(&test_config(vec![], false));
        assert_eq!(
            chain.admit(&message("phishing@example.com")).reason.as_deref(),
            Some("self-sender-detected")
        );
        assert_eq!(
            chain.admit(&message("phishing-noreply@example.com")).reason.as_deref(),
            Some("self-sender-detected")
        );
        assert_eq!(
            chain.admit(&message("phishing.alerts@example.com")).reason.as_deref(),
            Some("self-sender-detected")
        );
        // Same domain but unrelated local part is fine.
        assert!(chain.admit(&message("alice@example.com")).allowed);
    }

    #[test]
    fn test_allowlist_domain_match() {
        let chain = GuardChain::new(&test_config(vec!["corp.com"], false));
        assert!(chain.admit(&message("user@corp.com")).allowed);
        assert!(chain.admit(&message("user@mail.corp.com")).allowed);
        assert_eq!(
            chain.admit(&message("user@evil.com")).reason.as_deref(),
            Some("sender-not-allowlisted")
        );
    }

    #[test]
    fn test_no_allowlist_fails_closed_in_production() {
        let chain = GuardChain::new(&test_config(vec![], true));
        assert_eq!(
            chain.admit(&message("user@corp.com")).reason.as_deref(),
            Some("sender-not-allowlisted")
        );
        let chain = GuardChain::new(&test_config(vec![], false));
        assert!(chain.admit(&message("user@corp.com")).allowed);
    }

    #[test]
    fn test_auto_responder_headers() {
        let chain = GuardChain::new(&test_config(vec![], false));

        let mut msg = message("user@corp.com");
        msg.headers.push(("Auto-Submitted".into(), "auto-generated".into()));
        assert_eq!(
            chain.admit(&msg).reason.as_deref(),
            Some("auto-responder-detected")
        );

        let mut msg = message("user2@corp.com");
        msg.headers.push(("Precedence".into(), "Bulk".into()));
        assert_eq!(
            chain.admit(&msg).reason.as_deref(),
            Some("auto-responder-detected")
        );

        let mut msg = message("user3@corp.com");
        msg.headers
            .push(("X-Auto-Response-Suppress".into(), "All".into()));
        assert_eq!(
            chain.admit(&msg).reason.as_deref(),
            Some("auto-responder-detected")
        );

        assert_eq!(
            chain.admit(&message("mailer-daemon@corp.com")).reason.as_deref(),
            Some("auto-responder-detected")
        );
    }

    #[test]
    fn test_guard_order_allowlist_before_auto_responder() {
        let chain = GuardChain::new(&test_config(vec!["corp.com"], false));
        let mut msg = message("postmaster@evil.com");
        msg.headers.push(("Auto-Submitted".into(), "auto-generated".into()));
        // Guard 5 shadows guard 6.
        assert_eq!(
            chain.admit(&msg).reason.as_deref(),
            Some("sender-not-allowlisted")
        );
    }

    #[test]
    fn test_seen_cache_is_bounded() {
        let chain = GuardChain::new(&test_config(vec![], false));
        for i in 0..(SEEN_CAP + 10) {
            let mut msg = message("user@corp.com");
            msg.internet_message_id = Some(format!("<id-{}@corp.com>", i));
            msg.provider_id = format!("prov-{}", i);
            chain.admit(&msg);
        }
        assert!(chain.seen_len() <= SEEN_CAP);
    }
}

//! Admission Layer Module
//! ======================
//! The guard/limit/dedup layer that protects the analysis pipeline: ordered
//! admission predicates, the sliding-window rate limiter, and content/sender
//! deduplication.
//!
//! Copyright © 2025 PhishTriage Maintainers. All rights reserved.
//! Licensed under GPL-3.0.

pub mod deduplicator;
pub mod guards;
pub mod rate_limiter;

pub use deduplicator::Deduplicator;
pub use guards::GuardChain;
pub use rate_limiter::RateLimiter;

/// Outcome of an admission check. A denial carries a human-readable reason
/// that doubles as the metric label and the structured-log field.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl Decision {
    pub fn allow() -> Self {
        Decision { allowed: true, reason: None }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Decision {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

//! Threat Intelligence Module
//! ==========================
//! External reputation lookups with per-API retries, circuit breakers and
//! response caching. Every failure path degrades to an empty enrichment so
//! the pipeline keeps moving on heuristics alone.
//!
//! Copyright © 2025 PhishTriage Maintainers. All rights reserved.
//! Licensed under GPL-3.0.

pub mod breaker;
pub mod clients;
pub mod retry;
pub mod service;

pub use breaker::{BreakerConfig, CircuitBreaker};
pub use retry::RetryPolicy;
pub use service::{IntelOutcome, ThreatIntelService};

//! PhishTriage Library
//! ===================
//! Core library for the automated phishing-triage service.
//!
//! Copyright © 2025 PhishTriage Maintainers. All rights reserved.
//! Licensed under GPL-3.0.

// Re-export main modules
pub mod admission;
pub mod analysis;
pub mod cache;
pub mod config;
pub mod error;
pub mod ingest;
pub mod intel;
pub mod llm;
pub mod mail;
pub mod metrics;
pub mod redact;
pub mod server;

// Re-export key types for external use
pub use analysis::{AnalysisResult, InboundMessage, Severity, ThreatIndicator};
pub use error::TriageError;
pub use ingest::TriagePipeline;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the PhishTriage library
pub fn init() {
    tracing::info!("PhishTriage library v{} initialized", VERSION);
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_init() {
        init();
    }

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}

//! Error taxonomy for the triage pipeline
//!
//! Only `Fatal` is allowed to leave the process. Everything else is either
//! collapsed into an analysis result, recorded as a metric and dropped, or
//! logged as a structured event.

use thiserror::Error;

/// Errors produced by the triage pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum TriageError {
    /// Malformed input or schema mismatch. Surfaced as 4xx at the boundary.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A guard or limit denied the operation.
    #[error("blocked: {reason}")]
    Blocked { reason: String },

    /// External I/O failure inside a circuit breaker. Retried internally;
    /// persistent failure degrades to nil data.
    #[error("transient failure in {service}: {detail}")]
    Transient { service: String, detail: String },

    /// Initialisation failure. The process exits non-zero.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Unexpected failure inside analysis. Converted into the safe default
    /// result, never propagated to the reply dispatcher.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TriageError {
    pub fn transient(service: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        TriageError::Transient {
            service: service.into(),
            detail: detail.to_string(),
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        TriageError::Blocked {
            reason: reason.into(),
        }
    }

    /// Short tag used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            TriageError::Validation(_) => "validation",
            TriageError::Blocked { .. } => "blocked",
            TriageError::Transient { .. } => "transient",
            TriageError::Fatal(_) => "fatal",
            TriageError::Internal(_) => "internal",
        }
    }
}

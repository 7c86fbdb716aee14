//! Error taxonomy for the assistant pipeline.

use thiserror::Error;

/// Failures surfaced by public pipeline operations.
///
/// Most variants are recovered locally (classification falls back to rules,
/// malformed extraction becomes empty slots); they exist so callers and logs
/// can name what went wrong when a failure does cross a boundary.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("classification failed: {0}")]
    ClassificationFailure(String),
    #[error("slot extraction failed: {0}")]
    ExtractionFailure(String),
    #[error("validation failed: {0}")]
    ValidationFailure(String),
    #[error("dispatch failed: {0}")]
    DispatchFailure(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Convenience result type for pipeline operations.
pub type AssistantResult<T> = Result<T, AssistantError>;

/// Failures of the completion backend. Timeouts are kept distinct so the
/// classifier can fall back deterministically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("completion backend unreachable: {0}")]
    Unreachable(String),
    #[error("completion timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
    #[error("completion backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed completion response: {0}")]
    Malformed(String),
}

impl CompletionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Timeouts are never retried; retrying would break the latency bound.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Timeout { .. } | Self::Malformed(_) => false,
        }
    }
}

impl From<CompletionError> for AssistantError {
    fn from(error: CompletionError) -> Self {
        Self::ClassificationFailure(error.to_string())
    }
}

/// Failures reported by a domain service collaborator.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("internal service error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(CompletionError::Unreachable("refused".into()).is_retryable());
        assert!(
            CompletionError::Status {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !CompletionError::Status {
                status: 400,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!CompletionError::Timeout { elapsed_ms: 15_000 }.is_retryable());
        assert!(CompletionError::Timeout { elapsed_ms: 1 }.is_timeout());
    }

    #[test]
    fn completion_error_maps_to_classification_failure() {
        let error: AssistantError = CompletionError::Timeout { elapsed_ms: 10 }.into();
        assert!(matches!(error, AssistantError::ClassificationFailure(_)));
        assert!(error.to_string().contains("timed out"));
    }
}

//! Error types for the lorekeep domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant; the top-level [`Error`]
//! keeps validation failures (bad model output) apart from backend failures
//! (infrastructure) so callers can tell them apart.

use thiserror::Error;

/// The top-level error type for all lorekeep operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Backend errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Model output ---
    #[error(transparent)]
    Validation(#[from] ValidationError),

    // --- Lookups ---
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    // --- Orchestration ---
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a missing category, proposal, schema, session or entry.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// True when the failure came from malformed model output.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// True when the failure came from a collaborator (model, search, storage).
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Provider(_) | Self::Store(_))
    }

    /// True when a collaborator reported a condition worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider(e) if e.is_retryable())
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),
}

impl ProviderError {
    /// Transient conditions: rate limits, timeouts, network failures and 5xx.
    ///
    /// Everything else is permanent and must not be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Model output that failed structural validation.
///
/// `issues` carries one message per offending field.
#[derive(Debug, Clone, Error)]
#[error("Validation failed for {target}: {}", issues.join("; "))]
pub struct ValidationError {
    pub target: String,
    pub issues: Vec<String>,
}

impl ValidationError {
    pub fn new(target: impl Into<String>, issues: Vec<String>) -> Self {
        Self {
            target: target.into(),
            issues,
        }
    }

    pub fn single(target: impl Into<String>, issue: impl Into<String>) -> Self {
        Self::new(target, vec![issue.into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
        assert!(err.is_backend());
        assert!(!err.is_validation());
    }

    #[test]
    fn validation_error_lists_issues() {
        let err: Error = ValidationError::new(
            "persona",
            vec!["response: missing field".into(), "followUpQuestions: expected array".into()],
        )
        .into();
        let text = err.to_string();
        assert!(text.contains("persona"));
        assert!(text.contains("response: missing field"));
        assert!(text.contains("followUpQuestions"));
        assert!(err.is_validation());
    }

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::RateLimited { retry_after_secs: 1 }.is_retryable());
        assert!(ProviderError::Timeout("slow".into()).is_retryable());
        assert!(ProviderError::ApiError { status_code: 503, message: String::new() }.is_retryable());
        assert!(!ProviderError::ApiError { status_code: 400, message: String::new() }.is_retryable());
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_retryable());
    }

    #[test]
    fn not_found_names_kind() {
        let err = Error::not_found("category", "geology");
        assert_eq!(err.to_string(), "category not found: geology");
    }
}

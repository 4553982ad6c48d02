//! Typed error taxonomy, one enum per subsystem boundary.
//!
//! Library-internal code returns these so callers can match on the specific
//! variant; orchestration-level facades convert to `anyhow::Error` with
//! `.context(...)` once a caller no longer needs to discriminate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding service unavailable: {reason}")]
    EmbeddingServiceUnavailable { reason: String },
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum HybridSearchError {
    #[error("partial search failure across {0} collection(s)")]
    HybridSearchPartialFailure(usize),
}

/// One collection's fan-out failure, collected rather than raised unless
/// `fail_on_partial_search_error` is set.
#[derive(Debug, Clone)]
pub struct CollectionSearchFailure {
    pub collection: String,
    pub kind: FailureKind,
    pub sanitized_message: String,
}

impl CollectionSearchFailure {
    pub fn new(collection: impl Into<String>, kind: FailureKind, message: impl AsRef<str>) -> Self {
        let mut sanitized: String = message.as_ref().chars().take(240).collect();
        sanitized.retain(|c| !c.is_control());
        Self {
            collection: collection.into(),
            kind,
            sanitized_message: sanitized,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Interrupted,
    Execution,
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit decision could not be derived from authoritative headers")]
    RateLimitDecisionException,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("all providers unavailable")]
    AllProvidersUnavailable,
    #[error("provider {provider} failed: {message}")]
    Failed { provider: String, message: String },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid source url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

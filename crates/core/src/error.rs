//! Error types for the opsdesk domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the remote classification
//! lives in [`ProviderError`] as an explicit three-way tag.

use thiserror::Error;

/// The top-level error type for opsdesk operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Domain store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Chat history errors ---
    #[error("History error: {0}")]
    History(#[from] HistoryError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// The outcome class of a failed remote call.
///
/// The orchestrator only ever branches on this, never on the concrete
/// client error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Tier-specific quota or rate limit; the tier cools down.
    Quota,
    /// Network trouble or timeout; the same tier may be retried.
    Transient,
    /// Bad request or authorization failure; skip the tier.
    NonRetryable,
}

/// A remote LLM failure, already classified at the client boundary.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Quota exceeded: {message}")]
    QuotaExceeded {
        retry_after_secs: Option<u64>,
        message: String,
    },

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Request rejected: {message} (status: {status_code:?})")]
    NonRetryable {
        status_code: Option<u16>,
        message: String,
    },
}

impl ProviderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::QuotaExceeded { .. } => ErrorClass::Quota,
            Self::Transient(_) => ErrorClass::Transient,
            Self::NonRetryable { .. } => ErrorClass::NonRetryable,
        }
    }

    /// Shorthand for a quota error without a server hint.
    pub fn quota(message: impl Into<String>) -> Self {
        Self::QuotaExceeded {
            retry_after_secs: None,
            message: message.into(),
        }
    }

    /// Shorthand for a non-retryable error without an HTTP status.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::NonRetryable {
            status_code: None,
            message: message.into(),
        }
    }
}

/// Failures of the external domain store. The assembler degrades on these.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Domain store unavailable: {0}")]
    Unavailable(String),

    #[error("Domain query failed for {table}: {reason}")]
    QueryFailed { table: String, reason: String },
}

/// Chat history persistence failures.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

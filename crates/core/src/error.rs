//! Error types for the ecotrace domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Remote scoring failures get their own enum so they can be cloned into
//! error-carrying result rows.

use thiserror::Error;

/// The top-level error type for all ecotrace operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Remote scorer errors ---
    #[error("Scorer error: {0}")]
    Scorer(#[from] ScorerError),

    // --- Capacity ---
    #[error("Dispatch queue is full (capacity {capacity}), usage record dropped")]
    QueueFull { capacity: usize },

    // --- Waiting ---
    #[error("Timed out after {waited_ms}ms with {pending} result(s) still pending")]
    Timeout { waited_ms: u64, pending: usize },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is a wait deadline rather than a failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the remote scoring call itself.
#[derive(Debug, Clone, Error)]
pub enum ScorerError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by scorer, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Scorer not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

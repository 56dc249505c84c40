//! Error types for provider calls

use std::time::Duration;

use thiserror::Error;

/// Failure of a single chat-completion call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// Invalid provider selection, detected before any network I/O
    #[error("Provider configuration error: {0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Configuration errors fail the same way on every attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Configuration(_))
    }
}

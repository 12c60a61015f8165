//! Error types for model providers.

use mica_core::retry::RetryableError;

/// Provider errors
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Upstream API rejected the request (4xx). Not retryable.
    #[error("remote API error {status}: {message}")]
    RemoteApi { status: u16, message: String },
    /// Network failure or upstream 5xx. Retried with backoff before surfacing.
    #[error("transport error: {0}")]
    Transport(String),
    /// The local encoder failed; the whole batch it belonged to failed with it.
    #[error("encoder error: {0}")]
    Encoder(String),
    /// The scheduler or provider was shut down while the request was in flight.
    #[error("request cancelled by shutdown")]
    Cancelled,
    /// The provider configuration is unusable.
    #[error("invalid provider configuration: {0}")]
    InvalidConfig(String),
    /// Upstream response did not match the expected shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl RetryableError for ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transport(_))
    }
}

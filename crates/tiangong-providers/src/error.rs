//! Typed errors raised by the Tiangong provider.
//!
//! Client operations return `anyhow::Result`; callers that need to tell a
//! protocol violation apart from a transport failure can
//! `downcast_ref::<ProviderError>()` the returned error.

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The vendor broke a streaming assumption (e.g. several tool calls in one delta).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Tiangong API error {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no function callback found for function name: {0}")]
    FunctionNotFound(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    /// Errors that must surface immediately instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProviderError::ProtocolViolation(_)
                | ProviderError::InvalidRequest(_)
                | ProviderError::FunctionNotFound(_)
                | ProviderError::Json(_)
        )
    }
}

//! Error types for the Gemini client.

use std::time::Duration;
use thiserror::Error;

/// Result type for Gemini client operations.
pub type Result<T> = std::result::Result<T, GeminiError>;

/// Gemini client errors.
#[derive(Debug, Error)]
pub enum GeminiError {
    /// Configuration error (missing API key, invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response from the API.
    ///
    /// `retry_delay` is populated from a `google.rpc.RetryInfo` detail when
    /// the service suggests how long to wait.
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        retry_delay: Option<Duration>,
    },

    /// The response was blocked or carried no candidate text
    #[error("Blocked response: {0}")]
    Blocked(String),

    /// Parse error (invalid JSON, unexpected response format)
    #[error("Parse error: {0}")]
    Parse(String),
}

impl GeminiError {
    /// HTTP status code, when the error came from an API response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Service-suggested wait before retrying, if any.
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Api { retry_delay, .. } => *retry_delay,
            _ => None,
        }
    }
}

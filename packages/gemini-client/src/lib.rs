//! Pure Gemini REST API client
//!
//! A minimal client for the `generateContent` endpoint with no domain logic.
//! Supports system instructions, inline binary parts (PDFs) and JSON-schema
//! constrained responses. Rate-limit metadata (`RetryInfo`) is surfaced on
//! [`GeminiError::Api`] so callers can implement their own backoff.
//!
//! # Example
//!
//! ```rust,ignore
//! use gemini_client::{GeminiClient, GenerateRequest, Part};
//!
//! let client = GeminiClient::from_env()?;
//!
//! let request = GenerateRequest::new(vec![Part::text("Describe this company")])
//!     .system("You extract registry data")
//!     .json_schema(schema);
//!
//! let text = client.generate("gemini-2.0-flash", &request).await?;
//! ```

pub mod error;
pub mod types;

pub use error::{GeminiError, Result};
pub use types::*;

use reqwest::Client;
use tracing::{debug, warn};

/// Pure Gemini API client.
#[derive(Clone)]
pub struct GeminiClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    /// Create from environment variable `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| GeminiError::Config("GEMINI_API_KEY not set".into()))?;
        Ok(Self::new(api_key))
    }

    /// Set a custom base URL (for proxies, regional endpoints, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Generate content and return the first candidate's text.
    pub async fn generate(&self, model: &str, request: &GenerateRequest) -> Result<String> {
        let start = std::time::Instant::now();

        let response = self
            .http_client
            .post(format!("{}/models/{}:generateContent", self.base_url, model))
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Gemini request failed");
                GeminiError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "Gemini API error");
            return Err(api_error(status.as_u16(), &error_text));
        }

        let raw: types::GenerateResponseRaw = response
            .json()
            .await
            .map_err(|e| GeminiError::Parse(e.to_string()))?;

        debug!(
            model = %model,
            duration_ms = start.elapsed().as_millis(),
            "Gemini generateContent"
        );

        if let Some(text) = raw.first_text() {
            return Ok(text);
        }

        let reason = raw
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .or_else(|| raw.candidates.first().and_then(|c| c.finish_reason.clone()))
            .unwrap_or_else(|| "no candidates".to_string());
        Err(GeminiError::Blocked(reason))
    }
}

/// Build an API error from a status and raw body, extracting `RetryInfo`.
fn api_error(status: u16, body: &str) -> GeminiError {
    match serde_json::from_str::<types::ErrorEnvelope>(body) {
        Ok(envelope) => {
            let retry_delay = envelope.error.retry_delay();
            let message = match envelope.error.status {
                Some(code) => format!("{}: {}", code, envelope.error.message),
                None => envelope.error.message,
            };
            GeminiError::Api {
                status,
                message,
                retry_delay,
            }
        }
        Err(_) => GeminiError::Api {
            status,
            message: body.to_string(),
            retry_delay: None,
        },
    }
}

//! Gemini implementation of the extraction service.
//!
//! # Example
//!
//! ```rust,ignore
//! use registry_sync::ai::GeminiExtractionService;
//!
//! let service = GeminiExtractionService::from_env()?.with_model("gemini-2.0-flash");
//! let client = ResilientExtractionClient::new(service);
//! ```

use async_trait::async_trait;
use gemini_client::{GeminiClient, GeminiError, GenerateRequest, Part};

use crate::error::ServiceError;
use crate::traits::content::DocumentContent;
use crate::traits::service::{ExtractionRequest, ExtractionService};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Gemini-backed extraction service. One `generateContent` call per request.
#[derive(Clone)]
pub struct GeminiExtractionService {
    client: GeminiClient,
    model: String,
}

impl GeminiExtractionService {
    pub fn new(client: GeminiClient) -> Self {
        Self {
            client,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create from environment variable `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self, ServiceError> {
        GeminiClient::from_env()
            .map(Self::new)
            .map_err(to_service_error)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(request: &ExtractionRequest<'_>) -> GenerateRequest {
        let part = match request.content {
            DocumentContent::Binary { bytes, mime_type } => Part::inline(mime_type.as_str(), bytes),
            DocumentContent::Text(text) => Part::text(text.as_str()),
        };

        GenerateRequest::new(vec![part])
            .system(request.system_prompt)
            .json_schema(request.schema.clone())
            .temperature(0.0)
    }
}

#[async_trait]
impl ExtractionService for GeminiExtractionService {
    async fn generate(&self, request: &ExtractionRequest<'_>) -> Result<String, ServiceError> {
        let body = Self::build_request(request);
        self.client
            .generate(&self.model, &body)
            .await
            .map_err(to_service_error)
    }
}

/// Keep the status code and suggested delay so the resilient client can
/// classify the failure.
fn to_service_error(error: GeminiError) -> ServiceError {
    match error {
        GeminiError::Api {
            status,
            message,
            retry_delay,
        } => {
            let mut service_error = ServiceError::new(message).with_status(status);
            if let Some(delay) = retry_delay {
                service_error = service_error.with_retry_delay(delay);
            }
            service_error
        }
        // Connection failures are transient
        GeminiError::Network(message) => {
            ServiceError::new(format!("service unavailable: {}", message))
        }
        GeminiError::Blocked(reason) => ServiceError::new(format!("blocked: {}", reason)),
        GeminiError::Config(message) => ServiceError::new(format!("api key: {}", message)),
        GeminiError::Parse(message) => ServiceError::new(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionErrorKind;
    use crate::pipeline::client::classify;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_api_error_keeps_status_and_delay() {
        let error = to_service_error(GeminiError::Api {
            status: 429,
            message: "Resource has been exhausted".into(),
            retry_delay: Some(Duration::from_secs(3)),
        });
        assert_eq!(error.status, Some(429));
        assert_eq!(error.retry_delay, Some(Duration::from_secs(3)));
        assert_eq!(classify(&error), ExtractionErrorKind::RateLimited);
    }

    #[test]
    fn test_error_mapping_classifies() {
        let network = to_service_error(GeminiError::Network("connection reset".into()));
        assert_eq!(classify(&network), ExtractionErrorKind::Unavailable);

        let blocked = to_service_error(GeminiError::Blocked("SAFETY".into()));
        assert_eq!(classify(&blocked), ExtractionErrorKind::ContentRejected);

        let config = to_service_error(GeminiError::Config("GEMINI_API_KEY not set".into()));
        assert_eq!(classify(&config), ExtractionErrorKind::Unauthorized);
    }

    #[test]
    fn test_request_carries_payload_and_schema() {
        let content = DocumentContent::Binary {
            bytes: b"%PDF".to_vec(),
            mime_type: "application/pdf".into(),
        };
        let schema = json!({"type": "OBJECT"});
        let request = ExtractionRequest {
            system_prompt: "extract",
            content: &content,
            identifier: "doc",
            schema: &schema,
        };

        let body = serde_json::to_value(GeminiExtractionService::build_request(&request)).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "extract");
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["mimeType"], "application/pdf");
        assert_eq!(body["generationConfig"]["responseSchema"], schema);
    }
}

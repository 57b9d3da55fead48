//! Extraction service trait.

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::traits::content::DocumentContent;

/// One call to the extraction service.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    /// Instructions for the model
    pub system_prompt: &'a str,
    /// The document payload
    pub content: &'a DocumentContent,
    /// Label used in logs and errors (usually the document name)
    pub identifier: &'a str,
    /// Response shape constraint
    pub schema: &'a serde_json::Value,
}

/// An AI service turning unstructured documents into schema-constrained JSON.
///
/// Implementations make exactly one network call per `generate` and never
/// retry; retry policy lives in
/// [`ResilientExtractionClient`](crate::pipeline::client::ResilientExtractionClient).
#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Returns the raw model text, expected to contain one JSON object.
    async fn generate(&self, request: &ExtractionRequest<'_>) -> Result<String, ServiceError>;
}

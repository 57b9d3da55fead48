//! Content extractor trait.

use async_trait::async_trait;
use std::path::Path;

use crate::error::ContentError;

/// Document content ready to send to the extraction service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContent {
    /// Binary format passed through with its MIME type (PDF)
    Binary { bytes: Vec<u8>, mime_type: String },
    /// Plain text (converted office formats, text files)
    Text(String),
}

impl DocumentContent {
    pub fn len(&self) -> usize {
        match self {
            Self::Binary { bytes, .. } => bytes.len(),
            Self::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads a local document into a service payload.
///
/// Implementations must fail with [`ContentError::UnsupportedType`] for
/// extensions they do not handle.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<DocumentContent, ContentError>;
}

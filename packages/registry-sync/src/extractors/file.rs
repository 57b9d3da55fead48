//! Reads documents straight from disk.
//!
//! PDFs are sent to the service as-is; plain text formats are sent as text.
//! Office formats need a converter in front of this extractor and are
//! rejected here.

use async_trait::async_trait;
use std::path::Path;

use crate::error::ContentError;
use crate::traits::content::{ContentExtractor, DocumentContent};

const PDF_MIME: &str = "application/pdf";

#[derive(Debug, Default, Clone, Copy)]
pub struct FileContentExtractor;

impl FileContentExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContentExtractor for FileContentExtractor {
    async fn extract(&self, path: &Path) -> Result<DocumentContent, ContentError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let io_error = |source| ContentError::Io {
            path: path.to_path_buf(),
            source,
        };

        match extension.as_deref() {
            Some("pdf") => {
                let bytes = tokio::fs::read(path).await.map_err(io_error)?;
                Ok(DocumentContent::Binary {
                    bytes,
                    mime_type: PDF_MIME.to_string(),
                })
            }
            Some("txt") | Some("md") => {
                let bytes = tokio::fs::read(path).await.map_err(io_error)?;
                Ok(DocumentContent::Text(
                    String::from_utf8_lossy(&bytes).into_owned(),
                ))
            }
            _ => Err(ContentError::UnsupportedType {
                path: path.to_path_buf(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pdf_is_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2020-01-01_deed.PDF");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let content = FileContentExtractor::new().extract(&path).await.unwrap();
        assert_eq!(
            content,
            DocumentContent::Binary {
                bytes: b"%PDF-1.4".to_vec(),
                mime_type: "application/pdf".into()
            }
        );
    }

    #[tokio::test]
    async fn test_text_is_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "capital increased").unwrap();

        let content = FileContentExtractor::new().extract(&path).await.unwrap();
        assert_eq!(content, DocumentContent::Text("capital increased".into()));
    }

    #[tokio::test]
    async fn test_unsupported_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let docx = dir.path().join("minutes.docx");
        std::fs::write(&docx, b"PK").unwrap();

        let extractor = FileContentExtractor::new();
        assert!(matches!(
            extractor.extract(&docx).await,
            Err(ContentError::UnsupportedType { .. })
        ));
        assert!(matches!(
            extractor.extract(&dir.path().join("gone.pdf")).await,
            Err(ContentError::Io { .. })
        ));
    }
}

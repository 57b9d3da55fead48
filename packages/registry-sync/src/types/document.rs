//! Document types - locally acquired files and their date prefixes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File extensions the pipeline recognizes as acquired documents.
pub const RECOGNIZED_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "txt"];

/// One acquired file for an entity.
///
/// The name encodes an ISO date prefix (`2021-06-15_deed.pdf`) when the
/// publication date is known. It is the key used in the change ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Stable document name (file name including extension)
    pub name: String,

    /// Where the bytes live locally
    pub path: PathBuf,

    /// SHA-256 hex of the bytes, when known
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl Document {
    /// Create a document with an explicit name.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            fingerprint: None,
        }
    }

    /// Create a document named after the file at `path`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(name, path)
    }

    /// Set the content fingerprint.
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Date parsed from the name prefix, if any.
    pub fn date(&self) -> Option<NaiveDate> {
        date_prefix(&self.name)
    }

    /// Whether the file extension is one the pipeline handles.
    pub fn has_recognized_extension(&self) -> bool {
        has_recognized_extension(&self.path)
    }
}

/// Parse a leading `YYYY-MM-DD` from a document name.
pub fn date_prefix(name: &str) -> Option<NaiveDate> {
    let prefix = name.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

pub fn has_recognized_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            RECOGNIZED_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}

/// Sort documents chronologically by date prefix.
///
/// Undated documents go after dated ones and keep their relative order.
pub fn sort_chronologically(documents: &mut [Document]) {
    // sort_by_key is stable, so equal keys keep input order
    documents.sort_by_key(|d| match d.date() {
        Some(date) => (0u8, Some(date)),
        None => (1u8, None),
    });
}

/// Build a document file name from a date hint and a title.
///
/// Produces `YYYY-MM-DD_<slug>.<ext>`, or `<slug>.<ext>` without a date.
pub fn document_file_name(date: Option<NaiveDate>, title: &str, extension: &str) -> String {
    let slug: String = title
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let slug = if slug.is_empty() {
        "document".to_string()
    } else {
        slug
    };

    match date {
        Some(date) => format!("{}_{}.{}", date.format("%Y-%m-%d"), slug, extension),
        None => format!("{}.{}", slug, extension),
    }
}

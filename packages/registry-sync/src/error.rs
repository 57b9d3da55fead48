//! Typed errors for the sync pipeline.
//!
//! One enum per concern, mirroring the pipeline stages: acquisition,
//! extraction, response parsing, content reading, storage and merging.
//! The planner has no error type; ambiguous ledger state falls back to
//! "process everything".

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while acquiring documents from the remote registry.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// The remote session (browser, HTTP session, ...) could not be opened
    #[error("session init failed: {0}")]
    SessionInit(String),

    /// The registry has no entity with this identifier
    #[error("entity not found: {entity_id}")]
    NotFound { entity_id: String },

    /// Navigating the registry timed out
    #[error("navigation timeout: {0}")]
    Timeout(String),

    /// Any other crawl failure
    #[error("crawl error: {0}")]
    Crawl(String),

    /// Writing the acquired document locally failed
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AcquisitionError {
    /// Short reason code for run summaries.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionInit(_) => "session_init_failed",
            Self::NotFound { .. } => "not_found",
            Self::Timeout(_) => "navigation_timeout",
            Self::Crawl(_) => "crawl_error",
            Self::Io { .. } => "io_error",
        }
    }
}

/// How the extraction service failure was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionErrorKind {
    /// HTTP 429 or a rate-limit message
    RateLimited,
    /// HTTP 503 or an overload/unavailability message
    Unavailable,
    /// Authentication or permission failure
    Unauthorized,
    /// Safety filter or blocked response
    ContentRejected,
    /// Any other non-retryable failure (bad request, ...)
    InvalidRequest,
}

impl ExtractionErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Unavailable)
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Unavailable => "service_unavailable",
            Self::Unauthorized => "unauthorized",
            Self::ContentRejected => "content_rejected",
            Self::InvalidRequest => "invalid_request",
        }
    }
}

/// Failure of a resilient extraction call.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// A retryable failure persisted through every allowed attempt
    #[error("retries exhausted for {identifier} after {attempts} attempts ({}): {message}", .kind.code())]
    RetryExhausted {
        identifier: String,
        attempts: u32,
        kind: ExtractionErrorKind,
        message: String,
    },

    /// A non-retryable failure; never retried
    #[error("extraction failed for {identifier} ({}): {message}", .kind.code())]
    Fatal {
        identifier: String,
        kind: ExtractionErrorKind,
        message: String,
    },
}

impl ExtractionError {
    /// True when the service kept failing with retryable errors ("service is
    /// down") rather than rejecting the request ("request is invalid").
    pub fn is_retry_exhaustion(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn kind(&self) -> ExtractionErrorKind {
        match self {
            Self::RetryExhausted { kind, .. } | Self::Fatal { kind, .. } => *kind,
        }
    }
}

/// The model response did not contain a usable JSON object.
#[derive(Debug, Error)]
#[error("malformed response for {label}: {reason}")]
pub struct ParseError {
    pub label: String,
    pub reason: String,
}

/// Errors reading a local document for the extraction service.
#[derive(Debug, Error)]
pub enum ContentError {
    /// No content extractor handles this file extension
    #[error("unsupported_type: {path}")]
    UnsupportedType { path: PathBuf },

    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Snapshot store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt record for {entity_id}: {source}")]
    Corrupt {
        entity_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure of a single document step inside the merge loop.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl StepError {
    pub fn is_retry_exhaustion(&self) -> bool {
        matches!(self, Self::Extraction(e) if e.is_retry_exhaustion())
    }

    /// Short reason code for run summaries.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Content(ContentError::UnsupportedType { .. }) => "unsupported_type",
            Self::Content(ContentError::Io { .. }) => "content_io",
            Self::Extraction(ExtractionError::RetryExhausted { .. }) => "retry_exhausted",
            Self::Extraction(e) => e.kind().code(),
            Self::Parse(_) => "malformed_response",
        }
    }
}

/// Entity-level merge failures.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Every document failed and there was no prior snapshot
    #[error("no valid metadata extracted for {entity_id}")]
    NoValidMetadata { entity_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MergeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoValidMetadata { .. } => "no_valid_metadata",
            Self::Store(_) => "store_error",
        }
    }
}

/// Result type alias for acquisition operations.
pub type AcquisitionResult<T> = std::result::Result<T, AcquisitionError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Raw failure reported by an extraction service implementation.
///
/// Carries just enough for classification: an HTTP-equivalent status, the
/// message, and a service-suggested retry delay when one was given.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ServiceError {
    pub status: Option<u16>,
    pub message: String,
    pub retry_delay: Option<std::time::Duration>,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            retry_delay: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_delay(mut self, delay: std::time::Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }
}

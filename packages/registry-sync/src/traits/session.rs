//! Remote acquisition session traits.
//!
//! A session wraps one expensive remote resource (a browser, an
//! authenticated HTTP session). It is opened once per run, used serially
//! for every entity, and closed at the end.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AcquisitionResult;

/// A document listed by the registry for an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    /// Opaque reference understood by [`RegistrySession::fetch_bytes`]
    pub remote_ref: String,

    /// Publication date, when the registry shows one
    pub date_hint: Option<NaiveDate>,

    /// Human-readable title
    pub title: String,

    /// File extension of the published file (without the dot)
    pub extension: String,
}

impl RemoteDocument {
    pub fn new(remote_ref: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            remote_ref: remote_ref.into(),
            date_hint: None,
            title: title.into(),
            extension: "pdf".to_string(),
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date_hint = Some(date);
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}

/// An open session against the remote registry.
#[async_trait]
pub trait RegistrySession: Send {
    /// List the documents published for an entity.
    ///
    /// Fails with `NotFound` for unknown entities and `Timeout` when the
    /// registry does not respond in time.
    async fn fetch_document_list(&mut self, entity_id: &str)
        -> AcquisitionResult<Vec<RemoteDocument>>;

    /// Download the bytes behind a remote reference.
    async fn fetch_bytes(&mut self, remote_ref: &str) -> AcquisitionResult<Vec<u8>>;

    /// Release the remote resource.
    async fn close(&mut self) -> AcquisitionResult<()>;
}

/// Opens sessions. Fails with `SessionInit` when the resource is unavailable.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: RegistrySession;

    async fn open(&self) -> AcquisitionResult<Self::Session>;
}

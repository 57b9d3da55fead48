//! Session over a local mirror of the registry.
//!
//! The mirror is a directory tree `<root>/<entity_id>/<file>`, as produced
//! by an export or a previous crawl. Publication dates come from the
//! `YYYY-MM-DD_` file name prefix.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{AcquisitionError, AcquisitionResult};
use crate::pipeline::fingerprint::is_regular_file;
use crate::traits::session::{RegistrySession, RemoteDocument, SessionFactory};
use crate::types::document::{date_prefix, has_recognized_extension};

/// Opens [`DirectoryMirrorSession`]s rooted at one directory.
#[derive(Debug, Clone)]
pub struct DirectoryMirror {
    root: PathBuf,
}

impl DirectoryMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SessionFactory for DirectoryMirror {
    type Session = DirectoryMirrorSession;

    async fn open(&self) -> AcquisitionResult<DirectoryMirrorSession> {
        let is_dir = tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(AcquisitionError::SessionInit(format!(
                "mirror root {} is not a directory",
                self.root.display()
            )));
        }
        Ok(DirectoryMirrorSession {
            root: self.root.clone(),
        })
    }
}

#[derive(Debug)]
pub struct DirectoryMirrorSession {
    root: PathBuf,
}

impl DirectoryMirrorSession {
    fn describe(path: &Path) -> Option<RemoteDocument> {
        let stem = path.file_stem()?.to_str()?;
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();

        let date = date_prefix(stem);
        let title = match date {
            Some(_) => stem.get(11..).unwrap_or_default(),
            None => stem,
        };

        let mut document =
            RemoteDocument::new(path.to_string_lossy(), title).with_extension(extension);
        if let Some(date) = date {
            document = document.with_date(date);
        }
        Some(document)
    }
}

#[async_trait]
impl RegistrySession for DirectoryMirrorSession {
    async fn fetch_document_list(
        &mut self,
        entity_id: &str,
    ) -> AcquisitionResult<Vec<RemoteDocument>> {
        let dir = self.root.join(entity_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AcquisitionError::NotFound {
                    entity_id: entity_id.to_string(),
                })
            }
            Err(source) => return Err(AcquisitionError::Io { path: dir, source }),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| AcquisitionError::Io {
                path: dir.clone(),
                source,
            })?
        {
            let path = entry.path();
            if has_recognized_extension(&path) && is_regular_file(&path).await {
                paths.push(path);
            }
        }
        paths.sort();

        let documents: Vec<RemoteDocument> =
            paths.iter().filter_map(|p| Self::describe(p)).collect();
        debug!(entity_id = %entity_id, documents = documents.len(), "Listed mirror documents");
        Ok(documents)
    }

    async fn fetch_bytes(&mut self, remote_ref: &str) -> AcquisitionResult<Vec<u8>> {
        tokio::fs::read(remote_ref)
            .await
            .map_err(|e| AcquisitionError::Crawl(format!("reading {}: {}", remote_ref, e)))
    }

    async fn close(&mut self) -> AcquisitionResult<()> {
        Ok(())
    }
}

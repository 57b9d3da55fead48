//! Content fingerprint gate.
//!
//! Decides whether a remote document has to be downloaded by comparing the
//! SHA-256 of the local copy with the SHA-256 of the remote bytes.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::traits::session::RegistrySession;
use crate::types::document::RECOGNIZED_EXTENSIONS;

/// SHA-256 hex of a byte slice.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 hex of a file's contents.
pub async fn fingerprint_file(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(fingerprint(&bytes))
}

/// Outcome of [`should_fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchDecision {
    /// Local copy matches the remote (or the remote could not be checked)
    Skip { local: PathBuf },

    /// Local copy is stale and has been deleted; write `bytes` in its place
    Replace { stale: PathBuf, bytes: Vec<u8> },

    /// No usable local copy; download the document
    FetchNew,
}

impl FetchDecision {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip { .. })
    }
}

/// Find an existing local copy for `stem` under any recognized extension.
///
/// `stem` is the target path without extension, e.g.
/// `input/12345/2021-06-15_deed`.
pub async fn find_local_candidate(stem: &Path) -> Option<PathBuf> {
    for ext in RECOGNIZED_EXTENSIONS {
        let candidate = with_extension(stem, ext);
        if is_regular_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

/// Whether `path` is a file, following symlinks. Errors count as no.
pub(crate) async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

// Path::with_extension would clobber dots inside the stem.
fn with_extension(stem: &Path, ext: &str) -> PathBuf {
    let mut os = stem.as_os_str().to_owned();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

/// Decide whether to download `remote_ref`, given the local target `stem`.
///
/// - no local candidate: `FetchNew`
/// - local file unreadable: delete it, `FetchNew`
/// - remote bytes unavailable: `Skip` (keep what we have)
/// - hashes equal: `Skip`
/// - hashes differ: delete the stale file, `Replace` with the remote bytes
pub async fn should_fetch<S>(session: &mut S, remote_ref: &str, stem: &Path) -> FetchDecision
where
    S: RegistrySession + ?Sized,
{
    let Some(local) = find_local_candidate(stem).await else {
        return FetchDecision::FetchNew;
    };

    let local_hash = match fingerprint_file(&local).await {
        Ok(hash) => hash,
        Err(e) => {
            warn!(path = %local.display(), error = %e, "Local copy unreadable, invalidating");
            if let Err(e) = tokio::fs::remove_file(&local).await {
                warn!(path = %local.display(), error = %e, "Failed to remove unreadable copy");
            }
            return FetchDecision::FetchNew;
        }
    };

    let remote_bytes = match session.fetch_bytes(remote_ref).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(
                remote_ref = %remote_ref,
                error = %e,
                "Remote hash unavailable, keeping local copy"
            );
            return FetchDecision::Skip { local };
        }
    };

    if fingerprint(&remote_bytes) == local_hash {
        debug!(path = %local.display(), "Local copy up to date");
        return FetchDecision::Skip { local };
    }

    debug!(path = %local.display(), "Remote content changed, replacing local copy");
    if let Err(e) = tokio::fs::remove_file(&local).await {
        warn!(path = %local.display(), error = %e, "Failed to remove stale copy");
    }
    FetchDecision::Replace {
        stale: local,
        bytes: remote_bytes,
    }
}

//! JSON file snapshot store.
//!
//! One file per entity, `<dir>/<entity_id>.json`, holding
//! `{ "<entity_id>": { ...record } }`. Writes go through a temporary file
//! and a rename so a crash never leaves a half-written record.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::traits::store::SnapshotStore;
use crate::types::record::EntityRecord;

pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `entity_id`'s record.
    pub fn path_for(&self, entity_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", entity_id))
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load(&self, entity_id: &str) -> StoreResult<Option<EntityRecord>> {
        let path = self.path_for(entity_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let mut wrapper: IndexMap<String, EntityRecord> =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                entity_id: entity_id.to_string(),
                source,
            })?;

        let record = wrapper.shift_remove(entity_id);
        if record.is_none() {
            warn!(
                entity_id = %entity_id,
                path = %path.display(),
                "Record file does not contain the entity key"
            );
        }
        Ok(record)
    }

    async fn save(&self, entity_id: &str, record: &EntityRecord) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let mut wrapper = IndexMap::new();
        wrapper.insert(entity_id, record);
        let json = serde_json::to_vec_pretty(&wrapper)?;

        let path = self.path_for(entity_id);
        let tmp = self.dir.join(format!(".{}.json.tmp", entity_id));
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;

        debug!(entity_id = %entity_id, path = %path.display(), "Record saved");
        Ok(())
    }
}

//! In-memory snapshot store for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::StoreResult;
use crate::traits::store::SnapshotStore;
use crate::types::record::EntityRecord;

/// In-memory storage for entity records.
///
/// Not suitable for production as data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, EntityRecord>>,
    saves: RwLock<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entity ids in the order they were saved (repeats included).
    pub fn saves(&self) -> Vec<String> {
        self.saves.read().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self, entity_id: &str) -> StoreResult<Option<EntityRecord>> {
        Ok(self.records.read().unwrap().get(entity_id).cloned())
    }

    async fn save(&self, entity_id: &str, record: &EntityRecord) -> StoreResult<()> {
        self.records
            .write()
            .unwrap()
            .insert(entity_id.to_string(), record.clone());
        self.saves.write().unwrap().push(entity_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load() {
        let store = MemoryStore::new();
        assert!(store.load("1").await.unwrap().is_none());

        let mut record = EntityRecord::default();
        record.identity.name = Some("ACME".into());
        store.save("1", &record).await.unwrap();
        store.save("1", &record).await.unwrap();

        assert_eq!(store.load("1").await.unwrap(), Some(record));
        assert_eq!(store.len(), 1);
        assert_eq!(store.saves(), vec!["1", "1"]);
    }
}

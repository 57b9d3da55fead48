//! Snapshot store trait.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::record::EntityRecord;

/// Persistence for per-entity records, keyed by entity id.
///
/// Last writer wins; the pipeline never runs two writers for the same
/// entity within one run.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, entity_id: &str) -> StoreResult<Option<EntityRecord>>;

    async fn save(&self, entity_id: &str, record: &EntityRecord) -> StoreResult<()>;
}

//! Cumulative metadata merger.
//!
//! Processes an entity's documents oldest first. Each successful document
//! replaces the snapshot with the service's merged output and records one
//! ledger entry; failed documents are reported and skipped.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{MergeError, StepError};
use crate::pipeline::client::ResilientExtractionClient;
use crate::pipeline::parser::parse_response;
use crate::pipeline::prompts::{merge_prompt, merge_schema, snapshot_schema, INITIAL_PROMPT};
use crate::traits::content::ContentExtractor;
use crate::traits::observer::{NoopObserver, SyncObserver};
use crate::traits::service::{ExtractionRequest, ExtractionService};
use crate::traits::store::SnapshotStore;
use crate::types::document::{sort_chronologically, Document};
use crate::types::record::{ChangeLedger, EntityRecord, Identity, LedgerEntry, Metadata, Snapshot};

/// Where the entity stands before the next document.
///
/// Initialization is decided by this state, never by the position of a
/// document in the current batch.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeState {
    /// No snapshot has ever been produced for this entity
    Uninitialized,
    /// A snapshot exists, together with the ledger that produced it
    WithSnapshot {
        snapshot: Snapshot,
        ledger: ChangeLedger,
    },
}

impl MergeState {
    /// Rebuild state from a persisted record.
    pub fn from_record(record: Option<EntityRecord>) -> (Identity, Self) {
        match record {
            Some(EntityRecord {
                identity,
                metadata: Metadata {
                    current_snapshot: Some(snapshot),
                },
                tracked_changes,
            }) => (
                identity,
                Self::WithSnapshot {
                    snapshot,
                    ledger: tracked_changes,
                },
            ),
            Some(record) => (record.identity, Self::Uninitialized),
            None => (Identity::default(), Self::Uninitialized),
        }
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            Self::Uninitialized => None,
            Self::WithSnapshot { snapshot, .. } => Some(snapshot),
        }
    }

    /// Fold one processed document into the state.
    fn apply(self, document: &str, snapshot: Snapshot, entry: LedgerEntry) -> Self {
        let mut ledger = match self {
            Self::Uninitialized => ChangeLedger::new(),
            Self::WithSnapshot { ledger, .. } => ledger,
        };
        ledger.record(document, entry);
        Self::WithSnapshot { snapshot, ledger }
    }
}

/// A document that failed inside the merge loop.
#[derive(Debug)]
pub struct DocumentFailure {
    pub document: String,
    pub error: StepError,
}

impl DocumentFailure {
    pub fn is_retry_exhaustion(&self) -> bool {
        self.error.is_retry_exhaustion()
    }
}

/// Result of merging one entity.
#[derive(Debug)]
pub struct MergeOutcome {
    pub entity_id: String,
    /// Documents that produced a snapshot in this run
    pub processed_count: usize,
    pub failures: Vec<DocumentFailure>,
    /// The persisted record, or why nothing was persisted
    pub result: Result<EntityRecord, MergeError>,
}

impl MergeOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn record(&self) -> Option<&EntityRecord> {
        self.result.as_ref().ok()
    }
}

/// Which prompt a document step uses.
enum Step<'a> {
    Initial,
    Merge(Option<&'a Snapshot>),
}

/// Runs the per-entity merge loop.
pub struct MetadataMerger<E, C, S>
where
    E: ExtractionService,
    C: ContentExtractor,
    S: SnapshotStore,
{
    client: Arc<ResilientExtractionClient<E>>,
    content: Arc<C>,
    store: Arc<S>,
    observer: Arc<dyn SyncObserver>,
}

// Manual impl: derive would require E, C and S to be Clone.
impl<E, C, S> Clone for MetadataMerger<E, C, S>
where
    E: ExtractionService,
    C: ContentExtractor,
    S: SnapshotStore,
{
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            content: self.content.clone(),
            store: self.store.clone(),
            observer: self.observer.clone(),
        }
    }
}

impl<E, C, S> MetadataMerger<E, C, S>
where
    E: ExtractionService,
    C: ContentExtractor,
    S: SnapshotStore,
{
    pub fn new(client: Arc<ResilientExtractionClient<E>>, content: Arc<C>, store: Arc<S>) -> Self {
        Self {
            client,
            content,
            store,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn client(&self) -> &Arc<ResilientExtractionClient<E>> {
        &self.client
    }

    /// Load the entity's record and merge `documents` into it.
    pub async fn run(&self, entity_id: &str, documents: Vec<Document>) -> MergeOutcome {
        match self.store.load(entity_id).await {
            Ok(existing) => self.run_from(entity_id, existing, documents).await,
            Err(e) => {
                warn!(entity_id = %entity_id, error = %e, "Failed to load existing record");
                MergeOutcome {
                    entity_id: entity_id.to_string(),
                    processed_count: 0,
                    failures: Vec::new(),
                    result: Err(MergeError::Store(e)),
                }
            }
        }
    }

    /// Merge `documents` into an already loaded record.
    pub async fn run_from(
        &self,
        entity_id: &str,
        existing: Option<EntityRecord>,
        mut documents: Vec<Document>,
    ) -> MergeOutcome {
        let (mut identity, mut state) = MergeState::from_record(existing);
        sort_chronologically(&mut documents);

        info!(
            entity_id = %entity_id,
            documents = documents.len(),
            initialized = state.snapshot().is_some(),
            "Merging entity documents"
        );

        let mut processed_count = 0;
        let mut failures = Vec::new();

        for (index, document) in documents.iter().enumerate() {
            let step = match &state {
                MergeState::Uninitialized if index == 0 => Step::Initial,
                other => Step::Merge(other.snapshot()),
            };

            let outcome = self.process_document(document, step).await;
            match outcome {
                Ok((snapshot, entry)) => {
                    identity.fill_from(&snapshot);
                    state = state.apply(&document.name, snapshot, entry);
                    processed_count += 1;
                    self.observer.document_merged(entity_id, &document.name, true);
                    debug!(entity_id = %entity_id, document = %document.name, "Document merged");
                }
                Err(error) => {
                    warn!(
                        entity_id = %entity_id,
                        document = %document.name,
                        code = error.code(),
                        retry_exhausted = error.is_retry_exhaustion(),
                        error = %error,
                        "Document failed, continuing with next"
                    );
                    self.observer.document_merged(entity_id, &document.name, false);
                    failures.push(DocumentFailure {
                        document: document.name.clone(),
                        error,
                    });
                }
            }
        }

        let result = match state {
            MergeState::WithSnapshot { snapshot, ledger } => {
                let record = EntityRecord {
                    identity,
                    metadata: Metadata {
                        current_snapshot: Some(snapshot),
                    },
                    tracked_changes: ledger,
                };
                match self.store.save(entity_id, &record).await {
                    Ok(()) => Ok(record),
                    Err(e) => Err(MergeError::Store(e)),
                }
            }
            MergeState::Uninitialized => Err(MergeError::NoValidMetadata {
                entity_id: entity_id.to_string(),
            }),
        };

        info!(
            entity_id = %entity_id,
            processed = processed_count,
            failed = failures.len(),
            success = result.is_ok(),
            "Entity merge finished"
        );

        MergeOutcome {
            entity_id: entity_id.to_string(),
            processed_count,
            failures,
            result,
        }
    }

    async fn process_document(
        &self,
        document: &Document,
        step: Step<'_>,
    ) -> Result<(Snapshot, LedgerEntry), StepError> {
        let content = self.content.extract(&document.path).await?;

        let is_initial = matches!(step, Step::Initial);
        let (prompt, schema) = match step {
            Step::Initial => (INITIAL_PROMPT.to_string(), snapshot_schema()),
            Step::Merge(current) => (merge_prompt(current), merge_schema()),
        };

        let request = ExtractionRequest {
            system_prompt: &prompt,
            content: &content,
            identifier: &document.name,
            schema: &schema,
        };
        let raw = self.client.extract(&request).await?;
        let object = parse_response(&raw, &document.name)?;
        let mut snapshot = Snapshot::from_response(object);

        let changes = snapshot.take_changes();
        let entry = if is_initial {
            LedgerEntry::initial()
        } else {
            changes
                .map(LedgerEntry::Changes)
                .unwrap_or_else(LedgerEntry::no_change)
        };

        Ok((snapshot, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::stores::MemoryStore;
    use crate::testing::{MockExtractionService, StaticContentExtractor};
    use crate::types::record::ChangeDelta;
    use serde_json::json;

    type TestMerger = MetadataMerger<MockExtractionService, StaticContentExtractor, MemoryStore>;

    fn merger(service: MockExtractionService, store: Arc<MemoryStore>) -> TestMerger {
        let client = ResilientExtractionClient::new(service)
            .with_policy(crate::pipeline::retry::RetryPolicy::new().with_max_attempts(1));
        MetadataMerger::new(Arc::new(client), Arc::new(StaticContentExtractor::new()), store)
    }

    fn docs(names: &[&str]) -> Vec<Document> {
        names.iter().map(|n| Document::new(*n, format!("/in/{}", n))).collect()
    }

    #[tokio::test]
    async fn test_processes_in_date_order() {
        let service = MockExtractionService::new().default_response(r#"{"name":"ACME"}"#);
        let store = Arc::new(MemoryStore::new());
        let merger = merger(service, store);

        merger
            .run("E1", docs(&["2021-05-01_x", "undated_z", "2020-01-01_y"]))
            .await;

        let order: Vec<String> = merger
            .client
            .service()
            .calls()
            .into_iter()
            .map(|c| c.identifier)
            .collect();
        assert_eq!(order, vec!["2020-01-01_y", "2021-05-01_x", "undated_z"]);
    }

    #[tokio::test]
    async fn test_fresh_entity_two_documents() {
        let service = MockExtractionService::new()
            .then_respond(r#"{"name":"ACME LDA","tax_id":"500100200","creation_date":"2020-01-01","representatives":[{"name":"Ana","role":"manager","active":true}]}"#)
            .then_respond(r#"```json
{"name":"ACME LDA","tax_id":"500100200","creation_date":"2020-01-01",
 "representatives":[{"name":"Ana","role":"manager","active":false},{"name":"Rui","role":"manager","active":true}],
 "structural_changes":["Rui appointed manager","Ana resigned"],"economic_changes":null}
```"#);
        let store = Arc::new(MemoryStore::new());
        let merger = merger(service, store.clone());

        let outcome = merger
            .run("E1", docs(&["2021-06-15_amendment.pdf", "2020-01-01_deed.pdf"]))
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.processed_count, 2);
        let record = outcome.record().unwrap();
        assert_eq!(record.identity.name.as_deref(), Some("ACME LDA"));
        assert_eq!(record.identity.tax_id.as_deref(), Some("500100200"));

        let ledger = &record.tracked_changes;
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.names().next(), Some("2020-01-01_deed.pdf"));
        assert_eq!(ledger.get("2020-01-01_deed.pdf"), Some(&LedgerEntry::initial()));
        assert_eq!(
            ledger.get("2021-06-15_amendment.pdf"),
            Some(&LedgerEntry::Changes(ChangeDelta {
                structural_changes: Some(json!(["Rui appointed manager", "Ana resigned"])),
                economic_changes: None,
            }))
        );

        let snapshot = record.snapshot().unwrap();
        assert_eq!(snapshot.active_representatives().count(), 1);
        assert!(snapshot.structural_changes.is_none());

        // The record was persisted
        assert_eq!(store.load("E1").await.unwrap().as_ref(), Some(record));

        // First call used the initial prompt, second the merge prompt
        let calls = merger.client.service().calls();
        assert_eq!(calls[0].system_prompt, INITIAL_PROMPT);
        assert!(calls[1].system_prompt.contains("ACME LDA"));
    }

    #[tokio::test]
    async fn test_loosely_typed_response_is_kept() {
        let service = MockExtractionService::new().then_respond(
            r#"{"name":"ACME LDA","tax_id":500100200,
                "representatives":[{"name":"Ana","capital_share_percentage":"100%"}]}"#,
        );
        let store = Arc::new(MemoryStore::new());
        let merger = merger(service, store.clone());

        let outcome = merger.run("E1", docs(&["2020-01-01_deed.pdf"])).await;

        assert!(outcome.is_success());
        assert!(outcome.failures.is_empty());
        let record = outcome.record().unwrap();
        assert_eq!(record.identity.tax_id.as_deref(), Some("500100200"));
        assert_eq!(
            record.snapshot().unwrap().representatives[0].capital_share_percentage,
            Some(100.0)
        );
        assert!(record.tracked_changes.contains("2020-01-01_deed.pdf"));
        assert!(store.load("E1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_resume_takes_merge_branch() {
        let store = Arc::new(MemoryStore::new());
        let mut existing = EntityRecord::default();
        existing.identity.name = Some("Old Name".into());
        existing.metadata.current_snapshot = Some(Snapshot {
            name: Some("Old Name".into()),
            ..Default::default()
        });
        existing
            .tracked_changes
            .record("2020-01-01_doc", LedgerEntry::initial());
        store.save("E2", &existing).await.unwrap();

        let service = MockExtractionService::new().then_respond(r#"{"name":"New Name"}"#);
        let merger = merger(service, store.clone());

        let outcome = merger.run("E2", docs(&["2022-03-01_doc"])).await;

        let record = outcome.record().unwrap();
        assert_eq!(record.tracked_changes.len(), 2);
        assert_eq!(
            record.tracked_changes.get("2022-03-01_doc"),
            Some(&LedgerEntry::no_change())
        );
        // Identity is set once
        assert_eq!(record.identity.name.as_deref(), Some("Old Name"));
        assert_eq!(record.snapshot().unwrap().name.as_deref(), Some("New Name"));

        let calls = merger.client.service().calls();
        assert_ne!(calls[0].system_prompt, INITIAL_PROMPT);
        assert!(calls[0].system_prompt.contains("Old Name"));
    }

    #[tokio::test]
    async fn test_reprocessing_overwrites_single_entry() {
        let store = Arc::new(MemoryStore::new());
        let service = MockExtractionService::new()
            .then_respond(r#"{"name":"ACME"}"#)
            .then_respond(r#"{"name":"ACME","economic_changes":["capital increased to 10000"]}"#)
            .then_respond(r#"{"name":"ACME","economic_changes":["capital increased to 20000"]}"#);
        let merger = merger(service, store);

        merger.run("E3", docs(&["2020-01-01_a", "2021-01-01_b"])).await;
        let outcome = merger.run("E3", docs(&["2021-01-01_b"])).await;

        let ledger = &outcome.record().unwrap().tracked_changes;
        assert_eq!(ledger.len(), 2);
        assert_eq!(
            ledger.get("2021-01-01_b"),
            Some(&LedgerEntry::Changes(ChangeDelta {
                structural_changes: None,
                economic_changes: Some(json!(["capital increased to 20000"])),
            }))
        );
    }

    #[tokio::test]
    async fn test_document_failure_is_isolated() {
        let store = Arc::new(MemoryStore::new());
        let service = MockExtractionService::new()
            .then_respond(r#"{"name":"ACME"}"#)
            .then_respond("the model rambled without JSON")
            .then_respond(r#"{"name":"ACME"}"#);
        let merger = merger(service, store);

        let outcome = merger
            .run("E4", docs(&["2020-01-01_a", "2021-01-01_b", "2022-01-01_c"]))
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.processed_count, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].document, "2021-01-01_b");
        assert_eq!(outcome.failures[0].error.code(), "malformed_response");

        let ledger = &outcome.record().unwrap().tracked_changes;
        assert!(!ledger.contains("2021-01-01_b"));
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn test_first_document_failure_continues_from_null_base() {
        let store = Arc::new(MemoryStore::new());
        let service = MockExtractionService::new()
            .then_fail(ServiceError::new("Invalid argument").with_status(400))
            .then_respond(r#"{"name":"ACME"}"#);
        let merger = merger(service, store);

        let outcome = merger.run("E5", docs(&["2020-01-01_a", "2021-01-01_b"])).await;

        assert!(outcome.is_success());
        let calls = merger.client.service().calls();
        assert!(calls[1].system_prompt.ends_with("null"));
        assert_eq!(
            outcome.record().unwrap().tracked_changes.get("2021-01-01_b"),
            Some(&LedgerEntry::no_change())
        );
        assert!(!outcome.failures[0].is_retry_exhaustion());
    }

    #[tokio::test]
    async fn test_no_snapshot_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let service = MockExtractionService::new().always_fail(ServiceError::new("overloaded").with_status(503));
        let merger = merger(service, store.clone());

        let outcome = merger.run("E6", docs(&["2020-01-01_a"])).await;

        assert!(matches!(outcome.result, Err(MergeError::NoValidMetadata { .. })));
        assert!(outcome.failures[0].is_retry_exhaustion());
        assert!(store.load("E6").await.unwrap().is_none());
    }

    #[test]
    fn test_state_from_record_without_snapshot() {
        let mut record = EntityRecord::default();
        record.identity.tax_id = Some("1".into());
        let (identity, state) = MergeState::from_record(Some(record));
        assert_eq!(identity.tax_id.as_deref(), Some("1"));
        assert_eq!(state, MergeState::Uninitialized);
    }
}

//! Entity sync orchestrator.
//!
//! Acquisition runs serially over one registry session. As soon as an
//! entity's documents are on disk its merge stage is spawned, so merging
//! overlaps with acquiring the next entity. A semaphore bounds how many
//! entities merge at once; the extraction client bounds calls underneath.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{AcquisitionError, AcquisitionResult};
use crate::pipeline::fingerprint::{fingerprint, should_fetch, FetchDecision};
use crate::pipeline::merger::MetadataMerger;
use crate::pipeline::planner::plan;
use crate::traits::content::ContentExtractor;
use crate::traits::observer::{NoopObserver, SyncObserver};
use crate::traits::service::ExtractionService;
use crate::traits::session::{RegistrySession, SessionFactory};
use crate::traits::store::SnapshotStore;
use crate::types::document::{document_file_name, has_recognized_extension, Document};
use crate::types::report::{EntityReport, ProcessingStatus, SyncSummary};

/// Default number of entities merging at the same time.
pub const DEFAULT_ENTITY_CONCURRENCY: usize = 4;

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Acquired documents live under `<input_dir>/<entity_id>/`
    pub input_dir: PathBuf,

    /// Maximum entities in the merge stage at once
    pub entity_concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            entity_concurrency: DEFAULT_ENTITY_CONCURRENCY,
        }
    }
}

impl OrchestratorConfig {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_entity_concurrency(mut self, concurrency: usize) -> Self {
        self.entity_concurrency = concurrency.max(1);
        self
    }

    pub fn entity_dir(&self, entity_id: &str) -> PathBuf {
        self.input_dir.join(entity_id)
    }
}

/// What acquisition did for one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acquisition {
    /// Documents the registry listed
    pub listed: usize,
    /// Documents written (new or replaced)
    pub written: usize,
    /// Documents whose local copy was already current
    pub unchanged: usize,
    /// Documents that could not be downloaded or written
    pub failed: usize,
}

type MergeTask = (String, JoinHandle<EntityReport>);

/// Runs sync and scan passes over a list of entities.
pub struct EntitySyncOrchestrator<E, C, S>
where
    E: ExtractionService + 'static,
    C: ContentExtractor + 'static,
    S: SnapshotStore + 'static,
{
    merger: MetadataMerger<E, C, S>,
    config: OrchestratorConfig,
    observer: Arc<dyn SyncObserver>,
    cancel: CancellationToken,
}

impl<E, C, S> EntitySyncOrchestrator<E, C, S>
where
    E: ExtractionService + 'static,
    C: ContentExtractor + 'static,
    S: SnapshotStore + 'static,
{
    pub fn new(merger: MetadataMerger<E, C, S>, config: OrchestratorConfig) -> Self {
        Self {
            merger,
            config,
            observer: Arc::new(NoopObserver),
            cancel: CancellationToken::new(),
        }
    }

    /// Observe acquisition, merge and completion events.
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.merger = self.merger.with_observer(observer.clone());
        self.observer = observer;
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops new acquisitions when cancelled. In-flight merges
    /// still finish.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Acquire every entity through one session, then merge.
    ///
    /// Never fails as a whole: per-entity problems end up in the summary.
    pub async fn sync<F>(&self, factory: &F, entity_ids: &[String]) -> SyncSummary
    where
        F: SessionFactory,
    {
        let entity_ids = distinct_ids(entity_ids);
        info!(entities = entity_ids.len(), "Starting sync run");

        let mut session = match factory.open().await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Failed to open registry session");
                let reports = entity_ids
                    .iter()
                    .map(|id| {
                        let report = EntityReport::new(*id).with_status(
                            ProcessingStatus::CrawlFailed {
                                reason: e.code().to_string(),
                            },
                        );
                        self.observer.entity_completed(&report);
                        report
                    })
                    .collect();
                return SyncSummary {
                    reports,
                    cancelled: false,
                };
            }
        };

        let limiter = Arc::new(Semaphore::new(self.config.entity_concurrency.max(1)));
        let mut slots: Vec<Slot> = Vec::with_capacity(entity_ids.len());
        let mut cancelled = false;

        for entity_id in entity_ids.iter().copied() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                slots.push(Slot::Done(EntityReport::new(entity_id)));
                continue;
            }

            let slot = match self.acquire(&mut session, entity_id).await {
                Ok(acquisition) => self.after_acquisition(entity_id, acquisition, &limiter).await,
                Err(e) => {
                    warn!(entity_id = %entity_id, code = e.code(), error = %e, "Acquisition failed");
                    self.finish(EntityReport::new(entity_id).with_status(
                        ProcessingStatus::CrawlFailed {
                            reason: e.code().to_string(),
                        },
                    ))
                }
            };
            slots.push(slot);
        }

        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close registry session");
        }

        if cancelled {
            warn!("Sync cancelled, waiting for scheduled merges");
        }
        self.collect(slots, cancelled).await
    }

    /// Merge documents already in the input directory. Opens no session.
    pub async fn scan(&self, entity_ids: &[String]) -> SyncSummary {
        let entity_ids = distinct_ids(entity_ids);
        info!(entities = entity_ids.len(), "Starting scan run");

        let limiter = Arc::new(Semaphore::new(self.config.entity_concurrency.max(1)));
        let mut slots = Vec::with_capacity(entity_ids.len());
        let mut cancelled = false;

        for entity_id in entity_ids.iter().copied() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                slots.push(Slot::Done(EntityReport::new(entity_id)));
                continue;
            }

            let dir = self.config.entity_dir(entity_id);
            let slot = match list_local_documents(&dir).await {
                Ok(documents) if documents.is_empty() => self.finish(
                    EntityReport::new(entity_id).with_status(ProcessingStatus::NoDocuments),
                ),
                Ok(documents) => self.spawn_merge(entity_id, documents, 0, &limiter),
                Err(e) => {
                    warn!(entity_id = %entity_id, error = %e, "Failed to list input documents");
                    self.finish(EntityReport::new(entity_id).with_status(
                        ProcessingStatus::ScanFailed {
                            reason: "io_error".to_string(),
                        },
                    ))
                }
            };
            slots.push(slot);
        }

        self.collect(slots, cancelled).await
    }

    /// Download what changed for one entity into its input directory.
    ///
    /// Listing failures abort the entity; individual download failures are
    /// counted and skipped.
    pub async fn acquire<R>(&self, session: &mut R, entity_id: &str) -> AcquisitionResult<Acquisition>
    where
        R: RegistrySession + ?Sized,
    {
        let remote = session.fetch_document_list(entity_id).await?;
        let dir = self.config.entity_dir(entity_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| AcquisitionError::Io {
                path: dir.clone(),
                source,
            })?;

        let mut acquisition = Acquisition {
            listed: remote.len(),
            ..Default::default()
        };
        let mut used_stems = HashSet::new();

        for document in &remote {
            let extension = document.extension.to_ascii_lowercase();
            let file_name = document_file_name(document.date_hint, &document.title, &extension);
            let base_stem = file_name
                .strip_suffix(&format!(".{}", extension))
                .unwrap_or(&file_name)
                .to_string();
            let stem = unique_stem(&base_stem, &mut used_stems);
            let file_name = format!("{}.{}", stem, extension);

            if !has_recognized_extension(Path::new(&file_name)) {
                debug!(entity_id = %entity_id, document = %file_name, "Skipping unrecognized file type");
                continue;
            }

            let bytes = match should_fetch(session, &document.remote_ref, &dir.join(&stem)).await {
                FetchDecision::Skip { .. } => {
                    acquisition.unchanged += 1;
                    continue;
                }
                FetchDecision::Replace { bytes, .. } => bytes,
                FetchDecision::FetchNew => match session.fetch_bytes(&document.remote_ref).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(
                            entity_id = %entity_id,
                            document = %file_name,
                            error = %e,
                            "Download failed, continuing with next document"
                        );
                        acquisition.failed += 1;
                        continue;
                    }
                },
            };

            let target = dir.join(&file_name);
            if let Err(e) = tokio::fs::write(&target, &bytes).await {
                warn!(path = %target.display(), error = %e, "Failed to write document");
                acquisition.failed += 1;
                continue;
            }

            acquisition.written += 1;
            debug!(
                entity_id = %entity_id,
                document = %file_name,
                fingerprint = %fingerprint(&bytes),
                "Document acquired"
            );
            self.observer.document_acquired(entity_id, &file_name);
        }

        info!(
            entity_id = %entity_id,
            listed = acquisition.listed,
            written = acquisition.written,
            unchanged = acquisition.unchanged,
            failed = acquisition.failed,
            "Entity acquired"
        );
        Ok(acquisition)
    }

    async fn after_acquisition(
        &self,
        entity_id: &str,
        acquisition: Acquisition,
        limiter: &Arc<Semaphore>,
    ) -> Slot {
        let report = EntityReport::new(entity_id);
        let documents = match list_local_documents(&self.config.entity_dir(entity_id)).await {
            Ok(documents) => documents,
            Err(e) => {
                warn!(entity_id = %entity_id, error = %e, "Failed to list input documents");
                return self.finish(report.with_status(ProcessingStatus::CrawlFailed {
                    reason: "io_error".to_string(),
                }));
            }
        };

        if documents.is_empty() {
            let status = if acquisition.failed > 0 {
                ProcessingStatus::CrawlFailed {
                    reason: "download_failed".to_string(),
                }
            } else {
                ProcessingStatus::NoDocuments
            };
            return self.finish(report.with_status(status));
        }

        self.spawn_merge(entity_id, documents, acquisition.written, limiter)
    }

    /// Schedule the merge stage without waiting for it.
    fn spawn_merge(
        &self,
        entity_id: &str,
        documents: Vec<Document>,
        acquired: usize,
        limiter: &Arc<Semaphore>,
    ) -> Slot {
        let merger = self.merger.clone();
        let observer = self.observer.clone();
        let limiter = limiter.clone();
        let id = entity_id.to_string();

        let handle = tokio::spawn(async move {
            let _permit = limiter.acquire_owned().await.ok();
            let mut report = merge_entity(&merger, &id, documents).await;
            report.documents_acquired = acquired;
            observer.entity_completed(&report);
            report
        });

        debug!(entity_id = %entity_id, "Merge stage scheduled");
        Slot::Pending((entity_id.to_string(), handle))
    }

    fn finish(&self, report: EntityReport) -> Slot {
        self.observer.entity_completed(&report);
        Slot::Done(report)
    }

    /// Await every scheduled merge. A panicked task only fails its entity.
    async fn collect(&self, slots: Vec<Slot>, cancelled: bool) -> SyncSummary {
        let mut reports = Vec::with_capacity(slots.len());
        for slot in slots {
            let report = match slot {
                Slot::Done(report) => report,
                Slot::Pending((entity_id, handle)) => match handle.await {
                    Ok(report) => report,
                    Err(e) => {
                        error!(entity_id = %entity_id, error = %e, "Merge task failed");
                        let report = EntityReport::new(entity_id).with_status(
                            ProcessingStatus::ScanFailed {
                                reason: "task_panicked".to_string(),
                            },
                        );
                        self.observer.entity_completed(&report);
                        report
                    }
                },
            };
            reports.push(report);
        }

        let summary = SyncSummary { reports, cancelled };
        let counts = summary.counts();
        info!(
            successful = counts.successful,
            no_documents = counts.no_documents,
            crawl_failed = counts.crawl_failed,
            scan_failed = counts.scan_failed,
            cancelled = summary.cancelled,
            "Run finished"
        );
        summary
    }
}

/// Per-entity position in the run, kept in input order.
enum Slot {
    Done(EntityReport),
    Pending(MergeTask),
}

/// Plan, then merge only what the plan selected.
async fn merge_entity<E, C, S>(
    merger: &MetadataMerger<E, C, S>,
    entity_id: &str,
    documents: Vec<Document>,
) -> EntityReport
where
    E: ExtractionService,
    C: ContentExtractor,
    S: SnapshotStore,
{
    let mut report = EntityReport::new(entity_id);

    let existing = match merger.store().load(entity_id).await {
        Ok(existing) => existing,
        Err(e) => {
            warn!(entity_id = %entity_id, error = %e, "Failed to load existing record");
            return report.with_status(ProcessingStatus::ScanFailed {
                reason: "store_error".to_string(),
            });
        }
    };

    let work = plan(
        entity_id,
        existing.as_ref().map(|record| &record.tracked_changes),
        &documents,
    );
    report.plan_reason = Some(work.reason.clone());

    if !work.should_process {
        info!(entity_id = %entity_id, reason = %work.reason, "Entity up to date");
        return report.with_status(ProcessingStatus::Successful);
    }

    let outcome = merger
        .run_from(entity_id, existing, work.files_to_process)
        .await;
    report.documents_processed = outcome.processed_count;
    report.documents_failed = outcome.failures.len();

    let status = match &outcome.result {
        Ok(_) => ProcessingStatus::Successful,
        Err(e) => ProcessingStatus::ScanFailed {
            reason: e.code().to_string(),
        },
    };
    report.with_status(status)
}

/// Drop repeated ids, keeping the first occurrence. Each entity gets one
/// acquisition and one merge task per run.
fn distinct_ids(entity_ids: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    let ids: Vec<&str> = entity_ids
        .iter()
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect();
    if ids.len() < entity_ids.len() {
        warn!(
            repeated = entity_ids.len() - ids.len(),
            "Ignoring repeated entity ids"
        );
    }
    ids
}

/// Pick `base`, or `base_2`, `base_3`, ... when an earlier document of the
/// same listing already took it.
fn unique_stem(base: &str, used: &mut HashSet<String>) -> String {
    let mut candidate = base.to_string();
    let mut suffix = 2;
    while used.contains(&candidate) {
        candidate = format!("{}_{}", base, suffix);
        suffix += 1;
    }
    used.insert(candidate.clone());
    candidate
}

/// Documents with a recognized extension in `dir`, sorted by name.
///
/// A missing directory is an empty list.
pub async fn list_local_documents(dir: &Path) -> std::io::Result<Vec<Document>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut documents = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() || !has_recognized_extension(&path) {
            continue;
        }
        let bytes = tokio::fs::read(&path).await?;
        documents.push(Document::from_path(path).with_fingerprint(fingerprint(&bytes)));
    }
    documents.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(documents)
}

/// Entity ids present in the input directory (one subdirectory each).
pub async fn discover_entities(input_dir: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(input_dir).await?;
    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    ids.push(name.to_string());
                }
            }
        }
    }
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::client::ResilientExtractionClient;
    use crate::pipeline::retry::RetryPolicy;
    use crate::stores::MemoryStore;
    use crate::error::ServiceError;
    use crate::testing::{
        wait_until, GatedExtractionService, MockExtractionService, MockSession,
        MockSessionFactory, RecordingObserver, StaticContentExtractor,
    };
    use crate::traits::service::ExtractionRequest;
    use crate::traits::session::RemoteDocument;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    type TestOrchestrator =
        EntitySyncOrchestrator<MockExtractionService, StaticContentExtractor, MemoryStore>;

    fn orchestrator(service: MockExtractionService, input_dir: &Path) -> TestOrchestrator {
        build(service, input_dir, DEFAULT_ENTITY_CONCURRENCY)
    }

    fn build<E: ExtractionService + 'static>(
        service: E,
        input_dir: &Path,
        entity_concurrency: usize,
    ) -> EntitySyncOrchestrator<E, StaticContentExtractor, MemoryStore> {
        let client = ResilientExtractionClient::new(service)
            .with_policy(RetryPolicy::new().with_max_attempts(1))
            .with_max_concurrent_calls(16);
        let merger = MetadataMerger::new(
            Arc::new(client),
            Arc::new(StaticContentExtractor::new()),
            Arc::new(MemoryStore::new()),
        );
        let config = OrchestratorConfig::new(input_dir).with_entity_concurrency(entity_concurrency);
        EntitySyncOrchestrator::new(merger, config)
    }

    /// One dated document per entity.
    fn session_with(entity_ids: &[&str]) -> MockSession {
        entity_ids.iter().fold(MockSession::new(), |session, id| {
            session.with_document(
                *id,
                RemoteDocument::new(format!("{}-deed", id), "deed").with_date(date(2020, 1, 1)),
                id.as_bytes().to_vec(),
            )
        })
    }

    fn ids(entity_ids: &[&str]) -> Vec<String> {
        entity_ids.iter().map(|id| id.to_string()).collect()
    }

    /// Panics for documents whose name contains the marker.
    struct PanickingService(&'static str);

    #[async_trait]
    impl ExtractionService for PanickingService {
        async fn generate(&self, request: &ExtractionRequest<'_>) -> Result<String, ServiceError> {
            if request.identifier.contains(self.0) {
                panic!("extraction blew up on {}", request.identifier);
            }
            Ok(r#"{"name":"ACME"}"#.to_string())
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_unique_stem_suffixes() {
        let mut used = HashSet::new();
        assert_eq!(unique_stem("2020-01-01_deed", &mut used), "2020-01-01_deed");
        assert_eq!(unique_stem("2020-01-01_deed", &mut used), "2020-01-01_deed_2");
        assert_eq!(unique_stem("2020-01-01_deed", &mut used), "2020-01-01_deed_3");
        assert_eq!(unique_stem("other", &mut used), "other");
    }

    #[tokio::test]
    async fn test_acquire_writes_and_dedupes() {
        let input = tempfile::tempdir().unwrap();
        let mut session = MockSession::new()
            .with_document(
                "100",
                RemoteDocument::new("r1", "Deed").with_date(date(2020, 1, 1)),
                b"one".to_vec(),
            )
            .with_document(
                "100",
                RemoteDocument::new("r2", "Deed").with_date(date(2020, 1, 1)),
                b"two".to_vec(),
            );
        let orchestrator = orchestrator(MockExtractionService::new(), input.path());

        let first = orchestrator.acquire(&mut session, "100").await.unwrap();
        assert_eq!(first.written, 2);

        let dir = input.path().join("100");
        assert_eq!(std::fs::read(dir.join("2020-01-01_deed.pdf")).unwrap(), b"one");
        assert_eq!(std::fs::read(dir.join("2020-01-01_deed_2.pdf")).unwrap(), b"two");

        // Same listing again: both copies match, nothing rewritten
        let second = orchestrator.acquire(&mut session, "100").await.unwrap();
        assert_eq!(second.written, 0);
        assert_eq!(second.unchanged, 2);

        // Remote content changes: replaced in place, no second copy
        session.set_bytes("r2", b"two, amended".to_vec());
        let third = orchestrator.acquire(&mut session, "100").await.unwrap();
        assert_eq!(third.written, 1);
        assert_eq!(
            std::fs::read(dir.join("2020-01-01_deed_2.pdf")).unwrap(),
            b"two, amended"
        );
        assert_eq!(list_local_documents(&dir).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_session_open_failure_fails_every_entity() {
        let input = tempfile::tempdir().unwrap();
        let observer = Arc::new(RecordingObserver::new());
        let orchestrator = orchestrator(MockExtractionService::new(), input.path())
            .with_observer(observer.clone());

        let ids = vec!["1".to_string(), "2".to_string()];
        let summary = orchestrator.sync(&MockSessionFactory::failing(), &ids).await;

        assert_eq!(summary.counts().crawl_failed, 2);
        assert_eq!(
            summary.report("1").unwrap().status.reason(),
            Some("session_init_failed")
        );
        assert_eq!(observer.completed(), ids);
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_no_acquisition() {
        let input = tempfile::tempdir().unwrap();
        let session = MockSession::new().with_empty_entity("1");
        let factory = MockSessionFactory::new(session.clone());
        let orchestrator = orchestrator(MockExtractionService::new(), input.path());
        orchestrator.cancellation_token().cancel();

        let summary = orchestrator.sync(&factory, &["1".to_string()]).await;

        assert!(summary.cancelled);
        assert_eq!(summary.report("1").unwrap().status, ProcessingStatus::Unknown);
        assert!(session.listed().is_empty());
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_all_downloads_failing_is_crawl_failure() {
        let input = tempfile::tempdir().unwrap();
        let session = MockSession::new()
            .with_document("7", RemoteDocument::new("r1", "deed"), b"x".to_vec())
            .with_broken_ref("r1");
        let orchestrator = orchestrator(MockExtractionService::new(), input.path());

        let summary = orchestrator
            .sync(&MockSessionFactory::new(session), &["7".to_string()])
            .await;

        assert_eq!(
            summary.report("7").unwrap().status,
            ProcessingStatus::CrawlFailed {
                reason: "download_failed".into()
            }
        );
    }

    #[tokio::test]
    async fn test_discover_entities_lists_directories() {
        let input = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(input.path().join("200")).unwrap();
        std::fs::create_dir_all(input.path().join("100")).unwrap();
        std::fs::create_dir_all(input.path().join(".cache")).unwrap();
        std::fs::write(input.path().join("notes.txt"), b"x").unwrap();

        let ids = discover_entities(input.path()).await.unwrap();
        assert_eq!(ids, vec!["100", "200"]);
    }

    #[tokio::test]
    async fn test_list_local_documents_filters_and_fingerprints() {
        let input = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("2020-01-01_deed.pdf"), b"hello").unwrap();
        std::fs::write(input.path().join("photo.png"), b"img").unwrap();

        let documents = list_local_documents(input.path()).await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].name, "2020-01-01_deed.pdf");
        assert_eq!(documents[0].fingerprint.as_deref(), Some(fingerprint(b"hello").as_str()));

        assert!(list_local_documents(&input.path().join("missing"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_acquisition_does_not_wait_for_merges() {
        let input = tempfile::tempdir().unwrap();
        let session = session_with(&["A", "B"]);
        let factory = MockSessionFactory::new(session.clone());
        let service = GatedExtractionService::new(
            MockExtractionService::new().default_response(r#"{"name":"ACME"}"#),
        );
        let orchestrator = build(service.clone(), input.path(), DEFAULT_ENTITY_CONCURRENCY);
        let entity_ids = ids(&["A", "B"]);

        let (summary, ()) = tokio::join!(orchestrator.sync(&factory, &entity_ids), async {
            wait_until(|| session.listed().len() == 2).await;
            // B was listed while A's merge was still held at the service
            assert_eq!(service.finished(), 0);
            wait_until(|| service.in_flight() == 2).await;
            service.open();
        });

        assert_eq!(session.listed(), vec!["A", "B"]);
        assert_eq!(summary.counts().successful, 2);
        assert_eq!(service.finished(), 2);
    }

    #[tokio::test]
    async fn test_entity_concurrency_bounds_merges() {
        let input = tempfile::tempdir().unwrap();
        let session = session_with(&["1", "2", "3", "4"]);
        let factory = MockSessionFactory::new(session.clone());
        let service = GatedExtractionService::new(
            MockExtractionService::new().default_response(r#"{"name":"ACME"}"#),
        );
        let orchestrator = build(service.clone(), input.path(), 2);
        let entity_ids = ids(&["1", "2", "3", "4"]);

        let (summary, ()) = tokio::join!(orchestrator.sync(&factory, &entity_ids), async {
            wait_until(|| session.listed().len() == 4 && service.in_flight() == 2).await;
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            assert_eq!(service.peak(), 2);
            service.open();
        });

        assert_eq!(summary.counts().successful, 4);
        assert_eq!(service.peak(), 2);
        assert_eq!(service.finished(), 4);
    }

    #[tokio::test]
    async fn test_panicked_merge_fails_only_its_entity() {
        let input = tempfile::tempdir().unwrap();
        let session = MockSession::new()
            .with_document("1", RemoteDocument::new("r1", "boom"), b"1".to_vec())
            .with_document("2", RemoteDocument::new("r2", "deed"), b"2".to_vec());
        let observer = Arc::new(RecordingObserver::new());
        let orchestrator = build(PanickingService("boom"), input.path(), DEFAULT_ENTITY_CONCURRENCY)
            .with_observer(observer.clone());

        let summary = orchestrator
            .sync(&MockSessionFactory::new(session), &ids(&["1", "2"]))
            .await;

        assert_eq!(
            summary.report("1").unwrap().status,
            ProcessingStatus::ScanFailed {
                reason: "task_panicked".into()
            }
        );
        assert_eq!(summary.report("2").unwrap().status, ProcessingStatus::Successful);
        let mut completed = observer.completed();
        completed.sort();
        assert_eq!(completed, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_repeated_ids_sync_once() {
        let input = tempfile::tempdir().unwrap();
        let session = session_with(&["1", "2"]);
        let service = MockExtractionService::new().default_response(r#"{"name":"ACME"}"#);
        let orchestrator = orchestrator(service.clone(), input.path());

        let summary = orchestrator
            .sync(
                &MockSessionFactory::new(session.clone()),
                &ids(&["1", "2", "1"]),
            )
            .await;

        assert_eq!(summary.reports.len(), 2);
        assert_eq!(session.listed(), vec!["1", "2"]);
        assert_eq!(service.call_count(), 2);

        let rescan = orchestrator.scan(&ids(&["2", "2"])).await;
        assert_eq!(rescan.reports.len(), 1);
        assert_eq!(rescan.report("2").unwrap().status, ProcessingStatus::Successful);
    }
}

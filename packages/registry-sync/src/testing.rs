//! Testing utilities including mock implementations.
//!
//! Useful for exercising the sync pipeline without a browser session, a
//! model API or real sleeps.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::{AcquisitionError, AcquisitionResult, ContentError, ServiceError};
use crate::pipeline::retry::Sleeper;
use crate::traits::content::{ContentExtractor, DocumentContent};
use crate::traits::observer::SyncObserver;
use crate::traits::service::{ExtractionRequest, ExtractionService};
use crate::traits::session::{RegistrySession, RemoteDocument, SessionFactory};
use crate::types::report::{EntityReport, ProcessingStatus};

// =============================================================================
// Extraction service
// =============================================================================

type Scripted = Result<String, ServiceError>;

/// A mock extraction service with scripted responses.
///
/// Responses registered for a specific identifier win over the shared
/// queue; the shared queue wins over the fallback. With nothing left to
/// return the call fails with a non-retryable error. Clones share state.
#[derive(Clone, Default)]
pub struct MockExtractionService {
    queue: Arc<RwLock<VecDeque<Scripted>>>,
    by_identifier: Arc<RwLock<HashMap<String, VecDeque<Scripted>>>>,
    fallback: Arc<RwLock<Option<Scripted>>>,
    calls: Arc<RwLock<Vec<MockExtractionCall>>>,
}

/// Record of a call made to the mock service.
#[derive(Debug, Clone)]
pub struct MockExtractionCall {
    pub identifier: String,
    pub system_prompt: String,
}

impl MockExtractionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    pub fn then_respond(self, text: impl Into<String>) -> Self {
        self.queue.write().unwrap().push_back(Ok(text.into()));
        self
    }

    /// Queue a failure.
    pub fn then_fail(self, error: ServiceError) -> Self {
        self.queue.write().unwrap().push_back(Err(error));
        self
    }

    /// Queue a response for calls labelled `identifier` only.
    pub fn respond_for(self, identifier: impl Into<String>, text: impl Into<String>) -> Self {
        self.by_identifier
            .write()
            .unwrap()
            .entry(identifier.into())
            .or_default()
            .push_back(Ok(text.into()));
        self
    }

    /// Queue a failure for calls labelled `identifier` only.
    pub fn fail_for(self, identifier: impl Into<String>, error: ServiceError) -> Self {
        self.by_identifier
            .write()
            .unwrap()
            .entry(identifier.into())
            .or_default()
            .push_back(Err(error));
        self
    }

    /// Fail every call once the scripted responses run out.
    pub fn always_fail(self, error: ServiceError) -> Self {
        *self.fallback.write().unwrap() = Some(Err(error));
        self
    }

    /// Return `text` once the scripted responses run out.
    pub fn default_response(self, text: impl Into<String>) -> Self {
        *self.fallback.write().unwrap() = Some(Ok(text.into()));
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockExtractionCall> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    fn next_response(&self, identifier: &str) -> Scripted {
        if let Some(queue) = self.by_identifier.write().unwrap().get_mut(identifier) {
            if let Some(scripted) = queue.pop_front() {
                return scripted;
            }
        }
        if let Some(scripted) = self.queue.write().unwrap().pop_front() {
            return scripted;
        }
        self.fallback
            .read()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(ServiceError::new("no scripted response").with_status(400)))
    }
}

#[async_trait]
impl ExtractionService for MockExtractionService {
    async fn generate(&self, request: &ExtractionRequest<'_>) -> Result<String, ServiceError> {
        self.calls.write().unwrap().push(MockExtractionCall {
            identifier: request.identifier.to_string(),
            system_prompt: request.system_prompt.to_string(),
        });
        self.next_response(request.identifier)
    }
}

/// Holds every call until [`open`](Self::open) is called, then answers
/// from the wrapped [`MockExtractionService`].
///
/// Counts calls waiting or running at once. Clones share state.
#[derive(Clone)]
pub struct GatedExtractionService {
    inner: MockExtractionService,
    gate: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl GatedExtractionService {
    pub fn new(inner: MockExtractionService) -> Self {
        Self {
            inner,
            gate: Arc::new(Semaphore::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Release every held call and every later one.
    pub fn open(&self) {
        // Acquiring from a closed semaphore returns at once.
        self.gate.close();
    }

    /// Calls currently held or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest `in_flight` seen so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Calls that returned.
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MockExtractionService {
        &self.inner
    }
}

#[async_trait]
impl ExtractionService for GatedExtractionService {
    async fn generate(&self, request: &ExtractionRequest<'_>) -> Result<String, ServiceError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let _ = self.gate.acquire().await;
        let result = self.inner.generate(request).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }
}

/// Poll `condition` until it holds. Panics after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "condition not reached within 5s");
}

// =============================================================================
// Registry session
// =============================================================================

#[derive(Default)]
struct SessionState {
    documents: HashMap<String, Vec<RemoteDocument>>,
    bytes: HashMap<String, Vec<u8>>,
    timeouts: HashSet<String>,
    broken_refs: HashSet<String>,
    listed: Vec<String>,
    fetched: Vec<String>,
    closed: bool,
}

/// A mock registry session backed by in-memory documents.
///
/// Clones share state, so a test can keep a handle after the orchestrator
/// takes ownership of the session.
#[derive(Clone, Default)]
pub struct MockSession {
    state: Arc<RwLock<SessionState>>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` for `remote_ref`.
    pub fn with_bytes(self, remote_ref: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.state
            .write()
            .unwrap()
            .bytes
            .insert(remote_ref.into(), bytes);
        self
    }

    /// List `document` for `entity_id` and serve `bytes` for it.
    pub fn with_document(
        self,
        entity_id: impl Into<String>,
        document: RemoteDocument,
        bytes: Vec<u8>,
    ) -> Self {
        {
            let mut state = self.state.write().unwrap();
            state.bytes.insert(document.remote_ref.clone(), bytes);
            state
                .documents
                .entry(entity_id.into())
                .or_default()
                .push(document);
        }
        self
    }

    /// List `entity_id` with no documents.
    pub fn with_empty_entity(self, entity_id: impl Into<String>) -> Self {
        self.state
            .write()
            .unwrap()
            .documents
            .entry(entity_id.into())
            .or_default();
        self
    }

    /// Listing `entity_id` times out.
    pub fn with_timeout(self, entity_id: impl Into<String>) -> Self {
        self.state
            .write()
            .unwrap()
            .timeouts
            .insert(entity_id.into());
        self
    }

    /// Downloading `remote_ref` fails even though it is listed.
    pub fn with_broken_ref(self, remote_ref: impl Into<String>) -> Self {
        self.state
            .write()
            .unwrap()
            .broken_refs
            .insert(remote_ref.into());
        self
    }

    /// Replace the bytes served for `remote_ref`.
    pub fn set_bytes(&self, remote_ref: &str, bytes: Vec<u8>) {
        self.state
            .write()
            .unwrap()
            .bytes
            .insert(remote_ref.to_string(), bytes);
    }

    /// Entity ids listed so far.
    pub fn listed(&self) -> Vec<String> {
        self.state.read().unwrap().listed.clone()
    }

    /// Remote refs downloaded so far (repeats included).
    pub fn fetched(&self) -> Vec<String> {
        self.state.read().unwrap().fetched.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().unwrap().closed
    }

    /// Forget call history.
    pub fn clear_calls(&self) {
        let mut state = self.state.write().unwrap();
        state.listed.clear();
        state.fetched.clear();
    }
}

#[async_trait]
impl RegistrySession for MockSession {
    async fn fetch_document_list(
        &mut self,
        entity_id: &str,
    ) -> AcquisitionResult<Vec<RemoteDocument>> {
        let mut state = self.state.write().unwrap();
        state.listed.push(entity_id.to_string());

        if state.timeouts.contains(entity_id) {
            return Err(AcquisitionError::Timeout(format!(
                "listing {} timed out",
                entity_id
            )));
        }

        state
            .documents
            .get(entity_id)
            .cloned()
            .ok_or_else(|| AcquisitionError::NotFound {
                entity_id: entity_id.to_string(),
            })
    }

    async fn fetch_bytes(&mut self, remote_ref: &str) -> AcquisitionResult<Vec<u8>> {
        let mut state = self.state.write().unwrap();
        state.fetched.push(remote_ref.to_string());

        if state.broken_refs.contains(remote_ref) {
            return Err(AcquisitionError::Crawl(format!("download of {} failed", remote_ref)));
        }
        state
            .bytes
            .get(remote_ref)
            .cloned()
            .ok_or_else(|| AcquisitionError::Crawl(format!("no document at {}", remote_ref)))
    }

    async fn close(&mut self) -> AcquisitionResult<()> {
        self.state.write().unwrap().closed = true;
        Ok(())
    }
}

/// Hands out clones of one [`MockSession`].
#[derive(Default)]
pub struct MockSessionFactory {
    session: MockSession,
    fail_open: bool,
    opened: AtomicUsize,
}

impl MockSessionFactory {
    pub fn new(session: MockSession) -> Self {
        Self {
            session,
            ..Default::default()
        }
    }

    /// A factory whose `open` always fails.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Default::default()
        }
    }

    pub fn session(&self) -> &MockSession {
        &self.session
    }

    /// Number of successful `open` calls.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    type Session = MockSession;

    async fn open(&self) -> AcquisitionResult<MockSession> {
        if self.fail_open {
            return Err(AcquisitionError::SessionInit("browser unavailable".into()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.session.clone())
    }
}

// =============================================================================
// Sleeper, observer, content
// =============================================================================

/// Records requested sleeps and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: RwLock<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.read().unwrap().clone()
    }

    pub fn total(&self) -> Duration {
        self.sleeps.read().unwrap().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.write().unwrap().push(duration);
    }
}

/// Event seen by a [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    Acquired {
        entity_id: String,
        document: String,
    },
    Merged {
        entity_id: String,
        document: String,
        succeeded: bool,
    },
    Completed {
        entity_id: String,
        status: ProcessingStatus,
    },
}

/// Observer that keeps every event for assertions.
#[derive(Default)]
pub struct RecordingObserver {
    events: RwLock<Vec<ObserverEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObserverEvent> {
        self.events.read().unwrap().clone()
    }

    /// Documents acquired for `entity_id`, in order.
    pub fn acquired(&self, entity_id: &str) -> Vec<String> {
        self.events
            .read()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ObserverEvent::Acquired {
                    entity_id: id,
                    document,
                } if id == entity_id => Some(document.clone()),
                _ => None,
            })
            .collect()
    }

    /// Entity ids that reached a final status.
    pub fn completed(&self) -> Vec<String> {
        self.events
            .read()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ObserverEvent::Completed { entity_id, .. } => Some(entity_id.clone()),
                _ => None,
            })
            .collect()
    }
}

impl SyncObserver for RecordingObserver {
    fn document_acquired(&self, entity_id: &str, document: &str) {
        self.events.write().unwrap().push(ObserverEvent::Acquired {
            entity_id: entity_id.to_string(),
            document: document.to_string(),
        });
    }

    fn document_merged(&self, entity_id: &str, document: &str, succeeded: bool) {
        self.events.write().unwrap().push(ObserverEvent::Merged {
            entity_id: entity_id.to_string(),
            document: document.to_string(),
            succeeded,
        });
    }

    fn entity_completed(&self, report: &EntityReport) {
        self.events.write().unwrap().push(ObserverEvent::Completed {
            entity_id: report.entity_id.clone(),
            status: report.status.clone(),
        });
    }
}

/// Returns a text payload for any path without touching the disk.
///
/// Paths whose extension is listed with [`Self::rejecting`] fail with
/// `UnsupportedType`.
#[derive(Default)]
pub struct StaticContentExtractor {
    rejected: HashSet<String>,
}

impl StaticContentExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(mut self, extension: impl Into<String>) -> Self {
        self.rejected.insert(extension.into());
        self
    }
}

#[async_trait]
impl ContentExtractor for StaticContentExtractor {
    async fn extract(&self, path: &Path) -> Result<DocumentContent, ContentError> {
        let rejected = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.rejected.contains(e));
        if rejected {
            return Err(ContentError::UnsupportedType {
                path: path.to_path_buf(),
            });
        }
        Ok(DocumentContent::Text(format!("contents of {}", path.display())))
    }
}

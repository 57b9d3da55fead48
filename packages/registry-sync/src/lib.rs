//! Registry Document Sync
//!
//! Keeps a per-entity structured record (a snapshot plus a change ledger)
//! up to date from documents published in a business registry.
//!
//! Each run acquires the documents of every entity through one remote
//! session, downloading only what changed, and merges new documents into
//! the entity's record oldest first with an AI extraction service.
//! Acquisition is serial; merges run concurrently across entities.
//!
//! # Usage
//!
//! ```rust,ignore
//! use registry_sync::{
//!     EntitySyncOrchestrator, FileContentExtractor, JsonFileStore, MetadataMerger,
//!     OrchestratorConfig, ResilientExtractionClient,
//! };
//! use registry_sync::ai::GeminiExtractionService;
//! use registry_sync::sessions::DirectoryMirror;
//!
//! let client = ResilientExtractionClient::new(GeminiExtractionService::from_env()?);
//! let merger = MetadataMerger::new(
//!     Arc::new(client),
//!     Arc::new(FileContentExtractor::new()),
//!     Arc::new(JsonFileStore::new("output")),
//! );
//! let orchestrator = EntitySyncOrchestrator::new(merger, OrchestratorConfig::new("input"));
//!
//! let summary = orchestrator.sync(&DirectoryMirror::new("mirror"), &ids).await;
//! println!("{}", summary);
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Collaborator seams (session, extraction service, content, store, observer)
//! - [`types`] - Documents, records and run reports
//! - [`pipeline`] - Gate, client, parser, planner, merger and orchestrator
//! - [`stores`] - Snapshot stores (JSON files, memory)
//! - [`sessions`] - Registry sessions (local mirror)
//! - [`extractors`] - Content extractors
//! - [`testing`] - Mock implementations for testing

pub mod ai;
pub mod config;
pub mod error;
pub mod extractors;
pub mod pipeline;
pub mod sessions;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use config::SyncConfig;
pub use error::{
    AcquisitionError, ContentError, ExtractionError, ExtractionErrorKind, MergeError, ParseError,
    ServiceError, StepError, StoreError,
};
pub use extractors::FileContentExtractor;
pub use pipeline::{
    EntitySyncOrchestrator, MetadataMerger, OrchestratorConfig, ResilientExtractionClient,
    RetryPolicy,
};
pub use stores::{JsonFileStore, MemoryStore};
pub use traits::{
    content::{ContentExtractor, DocumentContent},
    observer::{NoopObserver, ProgressLog, SyncObserver},
    service::{ExtractionRequest, ExtractionService},
    session::{RegistrySession, RemoteDocument, SessionFactory},
    store::SnapshotStore,
};
pub use types::{
    document::Document,
    record::{
        ChangeDelta, ChangeLedger, EntityRecord, Identity, LedgerEntry, Representative, Snapshot,
    },
    report::{EntityReport, ProcessingStatus, SyncSummary},
};

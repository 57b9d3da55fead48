//! Sync pipeline.
//!
//! Stages, leaves first:
//! - Content fingerprint gate (skip/replace/fetch per remote document)
//! - Resilient extraction client (retry, backoff, concurrency cap)
//! - Lenient response parser
//! - Incremental work planner
//! - Cumulative metadata merger
//! - Entity sync orchestrator (serial acquisition, concurrent merges)

pub mod client;
pub mod fingerprint;
pub mod merger;
pub mod orchestrator;
pub mod parser;
pub mod planner;
pub mod prompts;
pub mod retry;

pub use client::{classify, ResilientExtractionClient, DEFAULT_MAX_CONCURRENT_CALLS};
pub use fingerprint::{fingerprint, find_local_candidate, should_fetch, FetchDecision};
pub use merger::{DocumentFailure, MergeOutcome, MergeState, MetadataMerger};
pub use orchestrator::{
    discover_entities, list_local_documents, Acquisition, EntitySyncOrchestrator,
    OrchestratorConfig, DEFAULT_ENTITY_CONCURRENCY,
};
pub use parser::{parse_response, strip_code_fence};
pub use planner::{plan, WorkPlan};
pub use retry::{BackoffState, RetryPolicy, Sleeper, TokioSleeper};

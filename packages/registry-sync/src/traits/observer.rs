//! Progress observer.
//!
//! Callbacks fire at fixed checkpoints of the pipeline. Observers must be
//! cheap and must not block; they are called from concurrent merge tasks.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use crate::types::report::{EntityReport, ProcessingStatus};

pub trait SyncObserver: Send + Sync {
    /// A document was written to the input directory.
    fn document_acquired(&self, _entity_id: &str, _document: &str) {}

    /// A document went through the merge step.
    fn document_merged(&self, _entity_id: &str, _document: &str, _succeeded: bool) {}

    /// An entity reached its final status for this run.
    fn entity_completed(&self, _report: &EntityReport) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}

/// Counts events and logs progress through `tracing`.
#[derive(Debug, Default)]
pub struct ProgressLog {
    total_entities: usize,
    acquired: AtomicUsize,
    merged: AtomicUsize,
    merge_failures: AtomicUsize,
    completed: AtomicUsize,
}

impl ProgressLog {
    pub fn new(total_entities: usize) -> Self {
        Self {
            total_entities,
            ..Default::default()
        }
    }

    pub fn documents_acquired(&self) -> usize {
        self.acquired.load(Ordering::Relaxed)
    }

    pub fn documents_merged(&self) -> usize {
        self.merged.load(Ordering::Relaxed)
    }

    pub fn merge_failures(&self) -> usize {
        self.merge_failures.load(Ordering::Relaxed)
    }

    pub fn entities_completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }
}

impl SyncObserver for ProgressLog {
    fn document_acquired(&self, _entity_id: &str, _document: &str) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    fn document_merged(&self, _entity_id: &str, _document: &str, succeeded: bool) {
        if succeeded {
            self.merged.fetch_add(1, Ordering::Relaxed);
        } else {
            self.merge_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn entity_completed(&self, report: &EntityReport) {
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        match &report.status {
            ProcessingStatus::Successful | ProcessingStatus::NoDocuments => info!(
                entity_id = %report.entity_id,
                status = report.status.label(),
                "[{}/{}] entity done",
                done,
                self.total_entities
            ),
            status => info!(
                entity_id = %report.entity_id,
                status = status.label(),
                reason = status.reason().unwrap_or_default(),
                "[{}/{}] entity failed",
                done,
                self.total_entities
            ),
        }
    }
}

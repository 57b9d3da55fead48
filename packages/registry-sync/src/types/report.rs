//! Per-entity processing status and the run-level summary.

use serde::Serialize;
use std::fmt;

/// Outcome of one entity in one sync run. Recomputed every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessingStatus {
    Unknown,
    /// Acquisition raised
    CrawlFailed { reason: String },
    /// Acquisition succeeded but found no matching files
    NoDocuments,
    /// Merge completed and the snapshot is persisted
    Successful,
    /// Merge raised or produced no snapshot
    ScanFailed { reason: String },
}

impl ProcessingStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::CrawlFailed { .. } => "crawl_failed",
            Self::NoDocuments => "no_documents",
            Self::Successful => "successful",
            Self::ScanFailed { .. } => "scan_failed",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::CrawlFailed { reason } | Self::ScanFailed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Per-entity line of the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct EntityReport {
    pub entity_id: String,
    #[serde(flatten)]
    pub status: ProcessingStatus,
    pub documents_acquired: usize,
    pub documents_processed: usize,
    pub documents_failed: usize,
    /// Why the planner did or did not schedule work
    pub plan_reason: Option<String>,
}

impl EntityReport {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            status: ProcessingStatus::Unknown,
            documents_acquired: 0,
            documents_processed: 0,
            documents_failed: 0,
            plan_reason: None,
        }
    }

    pub fn with_status(mut self, status: ProcessingStatus) -> Self {
        self.status = status;
        self
    }
}

/// Aggregate counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub successful: usize,
    pub no_documents: usize,
    pub crawl_failed: usize,
    pub scan_failed: usize,
    pub unknown: usize,
}

/// Result of a sync or scan run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub reports: Vec<EntityReport>,
    /// True when the run was cancelled before every entity was acquired
    pub cancelled: bool,
}

impl SyncSummary {
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for report in &self.reports {
            match report.status {
                ProcessingStatus::Successful => counts.successful += 1,
                ProcessingStatus::NoDocuments => counts.no_documents += 1,
                ProcessingStatus::CrawlFailed { .. } => counts.crawl_failed += 1,
                ProcessingStatus::ScanFailed { .. } => counts.scan_failed += 1,
                ProcessingStatus::Unknown => counts.unknown += 1,
            }
        }
        counts
    }

    pub fn report(&self, entity_id: &str) -> Option<&EntityReport> {
        self.reports.iter().find(|r| r.entity_id == entity_id)
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntityReport> {
        self.reports.iter().filter(|r| r.status.reason().is_some())
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self.counts();
        writeln!(
            f,
            "{} entities: {} successful, {} no documents, {} crawl failed, {} scan failed",
            self.reports.len(),
            counts.successful,
            counts.no_documents,
            counts.crawl_failed,
            counts.scan_failed
        )?;
        if self.cancelled {
            writeln!(f, "run cancelled before all entities were acquired")?;
        }
        for report in self.failures() {
            writeln!(
                f,
                "  {} {}: {}",
                report.entity_id,
                report.status.label(),
                report.status.reason().unwrap_or_default()
            )?;
        }
        Ok(())
    }
}

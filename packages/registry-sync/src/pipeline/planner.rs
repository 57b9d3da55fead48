//! Incremental work planner.
//!
//! Decides which available documents still need extraction. Membership in
//! the change ledger is the record of work already paid for, so planning
//! twice over the same ledger and inputs is idempotent.

use serde::Serialize;
use tracing::debug;

use crate::types::document::Document;
use crate::types::record::ChangeLedger;

/// What the merger should process for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkPlan {
    pub should_process: bool,
    pub files_to_process: Vec<Document>,
    pub reason: String,
}

impl WorkPlan {
    fn process(files: Vec<Document>, reason: impl Into<String>) -> Self {
        Self {
            should_process: !files.is_empty(),
            files_to_process: files,
            reason: reason.into(),
        }
    }

    fn nothing(reason: impl Into<String>) -> Self {
        Self {
            should_process: false,
            files_to_process: Vec::new(),
            reason: reason.into(),
        }
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.files_to_process.iter().map(|d| d.name.as_str()).collect()
    }
}

/// Plan the work for `entity_id`.
///
/// 1. No ledger: process everything.
/// 2. Empty ledger: process everything.
/// 3. The latest dated input is the latest dated tracked file: nothing to do.
/// 4. Otherwise process exactly the inputs the ledger does not track.
pub fn plan(entity_id: &str, existing: Option<&ChangeLedger>, available: &[Document]) -> WorkPlan {
    let plan = plan_inner(existing, available);
    debug!(
        entity_id = %entity_id,
        should_process = plan.should_process,
        files = plan.files_to_process.len(),
        reason = %plan.reason,
        "Planned entity work"
    );
    plan
}

fn plan_inner(existing: Option<&ChangeLedger>, available: &[Document]) -> WorkPlan {
    let Some(ledger) = existing else {
        return WorkPlan::process(available.to_vec(), "no existing metadata");
    };

    if ledger.is_empty() {
        return WorkPlan::process(available.to_vec(), "existing metadata tracks no files");
    }

    let latest_input = available
        .iter()
        .filter_map(|d| d.date().map(|date| (d, date)))
        .max_by_key(|(_, date)| *date)
        .map(|(d, _)| d.name.as_str());

    if let (Some(input), Some((tracked, _))) = (latest_input, ledger.latest_dated()) {
        if input == tracked {
            return WorkPlan::nothing(format!(
                "latest input {} matches latest tracked file {}",
                input, tracked
            ));
        }
    }

    let new_files: Vec<Document> = available
        .iter()
        .filter(|d| !ledger.contains(&d.name))
        .cloned()
        .collect();

    if new_files.is_empty() {
        return WorkPlan::nothing("all available files already processed");
    }

    let names: Vec<&str> = new_files.iter().map(|d| d.name.as_str()).collect();
    let reason = format!("new files: {}", names.join(", "));
    WorkPlan::process(new_files, reason)
}

//! Prompts and response schemas for the extraction service.

use serde_json::{json, Value};

use crate::types::record::Snapshot;

/// Prompt for the first document of an entity with no prior snapshot.
pub const INITIAL_PROMPT: &str = r#"You are reading the founding or earliest available registry publication of a business entity.

Extract the entity's current structured record:
- name: the registered company name
- tax_id: the tax identification number, digits only
- creation_date: the incorporation date in YYYY-MM-DD format
- representatives: every person or company holding a role (manager, director, partner, shareholder, auditor) with
  name, role, active (true unless the document states they left), tax_id,
  capital_share_amount (numeric, in the document's currency) and capital_share_percentage (0-100)

Rules:
- Use null for anything the document does not state. Never guess.
- Output a single JSON object matching the provided schema, nothing else."#;

const MERGE_INSTRUCTIONS: &str = r#"You maintain the structured record of a business entity. Below is the CURRENT record, built from earlier registry publications. The attached document is a LATER publication.

Produce the UPDATED record:
- Start from the current record and apply only what the new document changes.
- Keep representatives that the document does not mention. Mark those who leave as active=false instead of removing them.
- Update capital share amounts and percentages when the document changes the share structure.
- Keep name, tax_id and creation_date unless the document explicitly changes them.

Also describe what this document changed:
- structural_changes: appointments, resignations, role changes, renames, seat transfers (null if none)
- economic_changes: capital increases or reductions, share transfers (null if none)

Use null for anything not stated. Output a single JSON object matching the provided schema, nothing else.

CURRENT RECORD:
"#;

/// Prompt for every later document, embedding the current snapshot.
///
/// `None` (no snapshot could be built from earlier documents) is rendered as
/// JSON `null`.
pub fn merge_prompt(snapshot: Option<&Snapshot>) -> String {
    let current = snapshot
        .and_then(|s| serde_json::to_string_pretty(s).ok())
        .unwrap_or_else(|| "null".to_string());
    format!("{}{}", MERGE_INSTRUCTIONS, current)
}

fn nullable(kind: &str) -> Value {
    json!({ "type": kind, "nullable": true })
}

fn representative_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "name": nullable("STRING"),
            "role": nullable("STRING"),
            "active": nullable("BOOLEAN"),
            "tax_id": nullable("STRING"),
            "capital_share_amount": nullable("NUMBER"),
            "capital_share_percentage": nullable("NUMBER")
        },
        "required": ["name", "role", "active"]
    })
}

/// Response schema for the initial extraction.
pub fn snapshot_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "name": nullable("STRING"),
            "tax_id": nullable("STRING"),
            "creation_date": nullable("STRING"),
            "representatives": {
                "type": "ARRAY",
                "items": representative_schema()
            }
        },
        "required": ["name", "tax_id", "creation_date", "representatives"]
    })
}

/// Response schema for merges: the snapshot plus the change fields.
pub fn merge_schema() -> Value {
    let mut schema = snapshot_schema();
    if let Some(properties) = schema["properties"].as_object_mut() {
        properties.insert(
            "structural_changes".to_string(),
            json!({ "type": "ARRAY", "items": { "type": "STRING" }, "nullable": true }),
        );
        properties.insert(
            "economic_changes".to_string(),
            json!({ "type": "ARRAY", "items": { "type": "STRING" }, "nullable": true }),
        );
    }
    schema
}

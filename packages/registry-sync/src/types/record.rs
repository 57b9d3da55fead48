//! Persisted entity record: identity, current snapshot and change ledger.
//!
//! Persisted shape (one object per entity, keyed by its id):
//!
//! ```json
//! {
//!   "12345678": {
//!     "name": "...", "tax_id": "...", "creation_date": "...",
//!     "metadata": { "current-snapshot": { ... } },
//!     "tracked-changes": { "2020-01-01_deed.pdf": "initial registration" }
//!   }
//! }
//! ```

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::types::document::date_prefix;

/// A person or company holding a role in the entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Representative {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub tax_id: Option<String>,
    #[serde(default)]
    pub capital_share_amount: Option<f64>,
    #[serde(default)]
    pub capital_share_percentage: Option<f64>,

    /// Fields the service returned that this type does not model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Representative {
    /// Build a representative from a service response object, coercing
    /// scalars the way [`Snapshot::from_response`] does.
    pub fn from_response(mut object: Map<String, Value>) -> Self {
        Self {
            name: take_text(&mut object, "name"),
            role: take_text(&mut object, "role"),
            active: take_flag(&mut object, "active"),
            tax_id: take_text(&mut object, "tax_id"),
            capital_share_amount: take_number(&mut object, "capital_share_amount"),
            capital_share_percentage: take_number(&mut object, "capital_share_percentage"),
            extra: object,
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Representative>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Representative>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Current best-known structured record for an entity.
///
/// Replaced wholesale after every processed document with the extraction
/// service's merged output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tax_id: Option<String>,
    #[serde(default)]
    pub creation_date: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub representatives: Vec<Representative>,

    /// Present only on freshly parsed merge responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structural_changes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub economic_changes: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Snapshot {
    /// Build a snapshot from a parsed service response.
    ///
    /// Never fails. Scalars are coerced to the modelled types, so a numeric
    /// tax id becomes a string and `"100%"` becomes `100.0`. A value that
    /// still does not fit is kept in `extra` under `<key>_raw`.
    pub fn from_response(mut object: Map<String, Value>) -> Self {
        Self {
            name: take_text(&mut object, "name"),
            tax_id: take_text(&mut object, "tax_id"),
            creation_date: take_text(&mut object, "creation_date"),
            representatives: take_representatives(&mut object),
            structural_changes: object.remove("structural_changes").filter(|v| !v.is_null()),
            economic_changes: object.remove("economic_changes").filter(|v| !v.is_null()),
            extra: object,
        }
    }

    /// Move the change fields out of the snapshot.
    ///
    /// Returns `None` when neither field carries a non-null value.
    pub fn take_changes(&mut self) -> Option<ChangeDelta> {
        let structural = self.structural_changes.take().filter(is_meaningful);
        let economic = self.economic_changes.take().filter(is_meaningful);

        if structural.is_none() && economic.is_none() {
            None
        } else {
            Some(ChangeDelta {
                structural_changes: structural,
                economic_changes: economic,
            })
        }
    }

    pub fn active_representatives(&self) -> impl Iterator<Item = &Representative> {
        self.representatives
            .iter()
            .filter(|r| r.active.unwrap_or(false))
    }
}

fn keep_raw(object: &mut Map<String, Value>, key: &str, value: Value) {
    object.insert(format!("{key}_raw"), value);
}

fn take_text(object: &mut Map<String, Value>, key: &str) -> Option<String> {
    match object.remove(key)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => {
            keep_raw(object, key, other);
            None
        }
    }
}

fn take_number(object: &mut Map<String, Value>, key: &str) -> Option<f64> {
    let value = object.remove(key)?;
    let parsed = match &value {
        Value::Null => return None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    };
    if parsed.is_none() {
        keep_raw(object, key, value);
    }
    parsed
}

/// Parse amounts such as `"100%"`, `"1 500.25"` or `"12,5"`.
fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .trim_end_matches('%')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let parsed = cleaned.parse::<f64>().ok().or_else(|| {
        // Single decimal comma
        if !cleaned.contains('.') && cleaned.matches(',').count() == 1 {
            cleaned.replace(',', ".").parse().ok()
        } else {
            None
        }
    });
    parsed.filter(|n| n.is_finite())
}

fn take_flag(object: &mut Map<String, Value>, key: &str) -> Option<bool> {
    let value = object.remove(key)?;
    let parsed = match &value {
        Value::Null => return None,
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    };
    if parsed.is_none() {
        keep_raw(object, key, value);
    }
    parsed
}

fn take_representatives(object: &mut Map<String, Value>) -> Vec<Representative> {
    let items = match object.remove("representatives") {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(items)) => items,
        Some(other) => {
            keep_raw(object, "representatives", other);
            return Vec::new();
        }
    };

    let mut representatives = Vec::with_capacity(items.len());
    let mut unparsed = Vec::new();
    for item in items {
        match item {
            Value::Object(entry) => representatives.push(Representative::from_response(entry)),
            other => unparsed.push(other),
        }
    }
    if !unparsed.is_empty() {
        keep_raw(object, "representatives", Value::Array(unparsed));
    }
    representatives
}

fn is_meaningful(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

/// Structured change delta recorded for a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structural_changes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub economic_changes: Option<Value>,
}

/// Fixed ledger values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerMarker {
    #[serde(rename = "initial registration")]
    InitialRegistration,
    #[serde(rename = "no significant change")]
    NoSignificantChange,
}

/// One ledger value: a fixed marker or a structured delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LedgerEntry {
    Marker(LedgerMarker),
    Changes(ChangeDelta),
}

impl LedgerEntry {
    pub fn initial() -> Self {
        Self::Marker(LedgerMarker::InitialRegistration)
    }

    pub fn no_change() -> Self {
        Self::Marker(LedgerMarker::NoSignificantChange)
    }
}

/// Append-only per-document change history.
///
/// Keys are document names in processing order. Recording a document that
/// is already present overwrites its single entry in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeLedger(IndexMap<String, LedgerEntry>);

impl ChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result for a document.
    pub fn record(&mut self, document: impl Into<String>, entry: LedgerEntry) {
        self.0.insert(document.into(), entry);
    }

    pub fn get(&self, document: &str) -> Option<&LedgerEntry> {
        self.0.get(document)
    }

    pub fn contains(&self, document: &str) -> bool {
        self.0.contains_key(document)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LedgerEntry)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The tracked document with the latest date prefix.
    pub fn latest_dated(&self) -> Option<(&str, NaiveDate)> {
        self.names()
            .filter_map(|name| date_prefix(name).map(|d| (name, d)))
            .max_by_key(|(_, date)| *date)
    }
}

impl FromIterator<(String, LedgerEntry)> for ChangeLedger {
    fn from_iter<I: IntoIterator<Item = (String, LedgerEntry)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Identity fields of an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tax_id: Option<String>,
    #[serde(default)]
    pub creation_date: Option<String>,
}

impl Identity {
    /// Fill unset fields from a snapshot. Fields already set are kept.
    pub fn fill_from(&mut self, snapshot: &Snapshot) {
        fill(&mut self.name, &snapshot.name);
        fill(&mut self.tax_id, &snapshot.tax_id);
        fill(&mut self.creation_date, &snapshot.creation_date);
    }
}

fn fill(slot: &mut Option<String>, candidate: &Option<String>) {
    if slot.is_none() {
        if let Some(value) = candidate.as_ref().filter(|v| !v.trim().is_empty()) {
            *slot = Some(value.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "current-snapshot", default)]
    pub current_snapshot: Option<Snapshot>,
}

/// Everything persisted for one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(flatten)]
    pub identity: Identity,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(rename = "tracked-changes", default)]
    pub tracked_changes: ChangeLedger,
}

impl EntityRecord {
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.metadata.current_snapshot.as_ref()
    }
}

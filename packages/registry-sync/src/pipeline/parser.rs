//! Lenient parsing of model responses into one JSON object.

use serde_json::{Map, Value};

use crate::error::ParseError;

/// Parse a free-form model response into a JSON object.
///
/// Tries, in order: the whole text as JSON; the text with a surrounding
/// Markdown code fence removed; the span from the first `{` to the last
/// `}`. The first attempt that yields an object wins. Anything else is a
/// [`ParseError`] carrying `label`.
pub fn parse_response(raw: &str, label: &str) -> Result<Map<String, Value>, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(error(label, "empty response"));
    }

    let candidates = [Some(trimmed), strip_code_fence(trimmed), outer_braces(trimmed)];
    for candidate in candidates.into_iter().flatten() {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            return Ok(map);
        }
    }

    Err(error(label, "no JSON object found"))
}

/// Remove a leading ```` ``` ```` fence (with an optional language tag in any
/// case) and a trailing one if present.
pub fn strip_code_fence(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    let tag_len = rest
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(rest.len());
    let body = &rest[tag_len..];
    let body = body.trim_end().strip_suffix("```").unwrap_or(body);
    Some(body.trim())
}

fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn error(label: &str, reason: &str) -> ParseError {
    ParseError {
        label: label.to_string(),
        reason: reason.to_string(),
    }
}

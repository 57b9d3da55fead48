//! Request and response types for the `generateContent` endpoint.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Request
// =============================================================================

/// A `generateContent` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

impl GenerateRequest {
    /// Create a request with a single user turn.
    pub fn new(parts: Vec<Part>) -> Self {
        Self {
            system_instruction: None,
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: None,
        }
    }

    /// Set the system instruction.
    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.system_instruction = Some(Content {
            role: None,
            parts: vec![Part::text(text)],
        });
        self
    }

    /// Constrain the response to JSON matching `schema`.
    pub fn json_schema(mut self, schema: serde_json::Value) -> Self {
        let config = self.generation_config.get_or_insert_with(GenerationConfig::default);
        config.response_mime_type = Some("application/json".to_string());
        config.response_schema = Some(schema);
        self
    }

    /// Set the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.generation_config
            .get_or_insert_with(GenerationConfig::default)
            .temperature = Some(temperature);
        self
    }
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// A content part: either text or inline binary data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    /// Inline binary part, base64 encoded for the wire.
    pub fn inline(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
}

// =============================================================================
// Response
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateResponseRaw {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl GenerateResponseRaw {
    /// Concatenated text of the first candidate.
    pub(crate) fn first_text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub details: Vec<serde_json::Value>,
}

impl ErrorBody {
    /// Retry delay from the first detail that carries one.
    pub(crate) fn retry_delay(&self) -> Option<Duration> {
        self.details
            .iter()
            .filter_map(|d| d.get("retryDelay").or_else(|| d.get("retry_delay")))
            .find_map(parse_retry_delay)
    }
}

/// Longest retry delay accepted from the service. Larger values saturate.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Parse a retry delay in either wire form: a duration string such as
/// `"3s"` / `"1.5s"`, or an object with `seconds` and `nanos`.
///
/// Values beyond [`MAX_RETRY_DELAY`] are clamped to it.
pub fn parse_retry_delay(value: &serde_json::Value) -> Option<Duration> {
    match value {
        serde_json::Value::String(s) => {
            let secs: f64 = s.trim().trim_end_matches('s').parse().ok()?;
            if !secs.is_finite() || secs < 0.0 {
                return None;
            }
            if secs >= MAX_RETRY_DELAY.as_secs_f64() {
                return Some(MAX_RETRY_DELAY);
            }
            Duration::try_from_secs_f64(secs).ok()
        }
        serde_json::Value::Object(map) => {
            let seconds = map.get("seconds").and_then(as_u64).unwrap_or(0);
            let nanos = map.get("nanos").and_then(as_u64).unwrap_or(0);
            if seconds == 0 && nanos == 0 {
                return None;
            }
            let delay = Duration::from_secs(seconds)
                .checked_add(Duration::from_nanos(nanos))
                .unwrap_or(MAX_RETRY_DELAY);
            Some(delay.min(MAX_RETRY_DELAY))
        }
        _ => None,
    }
}

// Protobuf JSON encodes int64 seconds as a string.
fn as_u64(value: &serde_json::Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_retry_delay_string() {
        assert_eq!(parse_retry_delay(&json!("3s")), Some(Duration::from_secs(3)));
        assert_eq!(
            parse_retry_delay(&json!("1.5s")),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_retry_delay(&json!("soon")), None);
    }

    #[test]
    fn test_parse_retry_delay_object() {
        assert_eq!(
            parse_retry_delay(&json!({"seconds": 2, "nanos": 500_000_000})),
            Some(Duration::from_millis(2500))
        );
        assert_eq!(
            parse_retry_delay(&json!({"seconds": "4"})),
            Some(Duration::from_secs(4))
        );
        assert_eq!(parse_retry_delay(&json!({})), None);
    }

    #[test]
    fn test_parse_retry_delay_clamps_oversized_values() {
        assert_eq!(parse_retry_delay(&json!("1e30s")), Some(MAX_RETRY_DELAY));
        assert_eq!(parse_retry_delay(&json!("90000s")), Some(MAX_RETRY_DELAY));
        assert_eq!(
            parse_retry_delay(&json!({"seconds": u64::MAX, "nanos": u64::MAX})),
            Some(MAX_RETRY_DELAY)
        );
        assert_eq!(
            parse_retry_delay(&json!({"seconds": "18446744073709551615"})),
            Some(MAX_RETRY_DELAY)
        );
        assert_eq!(parse_retry_delay(&json!("infs")), None);
    }

    #[test]
    fn test_error_body_retry_info() {
        let body: ErrorEnvelope = serde_json::from_value(json!({
            "error": {
                "code": 429,
                "message": "Resource has been exhausted",
                "status": "RESOURCE_EXHAUSTED",
                "details": [
                    {"@type": "type.googleapis.com/google.rpc.QuotaFailure"},
                    {"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "7s"}
                ]
            }
        }))
        .unwrap();

        assert_eq!(body.error.retry_delay(), Some(Duration::from_secs(7)));
        assert_eq!(body.error.status.as_deref(), Some("RESOURCE_EXHAUSTED"));
    }

    #[test]
    fn test_request_serialization() {
        let request = GenerateRequest::new(vec![Part::text("hello")])
            .system("be terse")
            .json_schema(json!({"type": "object"}));

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(
            value["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert!(value["generationConfig"].get("temperature").is_none());
    }

    #[test]
    fn test_inline_part_is_base64() {
        let part = Part::inline("application/pdf", b"%PDF");
        let data = part.inline_data.unwrap();
        assert_eq!(data.mime_type, "application/pdf");
        assert_eq!(data.data, "JVBERg==");
    }

    #[test]
    fn test_first_text_joins_parts() {
        let raw: GenerateResponseRaw = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "{\"a\":"}, {"text": "1}"}]}}]
        }))
        .unwrap();
        assert_eq!(raw.first_text().as_deref(), Some("{\"a\":1}"));
    }
}

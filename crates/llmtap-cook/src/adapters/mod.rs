//! Provider adapters: raw captured JSON to the provider-neutral form.
//!
//! Each adapter covers one wire format over the capability set
//! `{detect, extract_messages, extract_tools, extract_model,
//! extract_response, reassemble_stream}`. All parsing works on
//! `serde_json::Value` so unknown provider fields and future content block
//! types degrade gracefully instead of failing deserialization.

pub mod claude;
pub mod gemini;
pub mod openai;

use serde_json::Value;

use crate::bundle::{Message, Tool};
use crate::error::CookError;
use crate::record::RawRecord;

/// One wire format's translation into the neutral message/tool model.
pub trait ProviderAdapter: Send + Sync {
    /// Registry tag; also the `--format` value that forces this adapter.
    fn name(&self) -> &'static str;

    /// Whether this record looks like this provider's format.
    fn detect(&self, record: &RawRecord) -> bool;

    /// Input messages, in order, with provider roles mapped to the
    /// normalized role set.
    fn extract_messages(&self, record: &RawRecord) -> Result<Vec<Message>, CookError>;

    /// Tool definitions offered on the request.
    fn extract_tools(&self, record: &RawRecord) -> Vec<Tool>;

    fn extract_model(&self, record: &RawRecord) -> Option<String>;

    /// Messages produced by a single logical (non-stream-shaped) response.
    fn extract_response(&self, body: &Value) -> Result<Vec<Message>, CookError>;

    /// Collapse a captured list of SSE event payloads into the logical
    /// response JSON this provider would have returned without streaming.
    fn reassemble_stream(&self, events: &[Value]) -> Result<Value, CookError>;

    /// Response messages for a record, reassembling first when the capture
    /// stored the raw SSE event array.
    fn response_messages(&self, record: &RawRecord) -> Result<Vec<Message>, CookError> {
        let Some(response) = &record.response else {
            return Ok(Vec::new());
        };
        match &response.body {
            Value::Array(events) => {
                let logical = self.reassemble_stream(events)?;
                self.extract_response(&logical)
            }
            body => self.extract_response(body),
        }
    }
}

/// Tagged registry of the known formats.
///
/// Detection order matters: Gemini and Claude have unambiguous markers
/// (URL verbs, `contents`, `anthropic-version`), so the OpenAI-compatible
/// adapter — the shape many gateways imitate — is sniffed last.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn ProviderAdapter>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: vec![
                Box::new(gemini::GeminiAdapter),
                Box::new(claude::ClaudeAdapter),
                Box::new(openai::OpenAiAdapter),
            ],
        }
    }

    /// Look up an adapter by format name.
    pub fn get(&self, name: &str) -> Option<&dyn ProviderAdapter> {
        self.adapters
            .iter()
            .find(|a| a.name() == name)
            .map(Box::as_ref)
    }

    /// Resolve the adapter for a record: a forced format name wins,
    /// otherwise each adapter sniffs the record in registry order.
    pub fn resolve(
        &self,
        forced: Option<&str>,
        record: &RawRecord,
    ) -> Result<&dyn ProviderAdapter, CookError> {
        if let Some(name) = forced {
            return self
                .get(name)
                .ok_or_else(|| CookError::UnsupportedFormat(format!("unknown format {name:?}")));
        }
        self.adapters
            .iter()
            .find(|a| a.detect(record))
            .map(Box::as_ref)
            .ok_or_else(|| {
                CookError::UnsupportedFormat(format!(
                    "no adapter recognizes request to {}",
                    record.request.url
                ))
            })
    }
}

/// Flatten message content that may be a plain string or a list of text
/// parts into one string. Non-text parts are ignored.
pub(crate) fn content_to_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| {
                part.get("text")
                    .and_then(Value::as_str)
                    .or_else(|| part.as_str())
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::record::{RawRequest, RawResponse};
    use std::collections::BTreeMap;

    pub(crate) fn record_for(url: &str, body: Value) -> RawRecord {
        record_with_headers(url, body, &[])
    }

    pub(crate) fn record_with_headers(
        url: &str,
        body: Value,
        headers: &[(&str, &str)],
    ) -> RawRecord {
        RawRecord {
            id: "rec-1".into(),
            timestamp: 0,
            request: RawRequest {
                url: url.into(),
                method: "POST".into(),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
                body,
            },
            response: None,
            duration_ms: 0,
            error: None,
        }
    }

    pub(crate) fn with_response(mut record: RawRecord, body: Value) -> RawRecord {
        record.response = Some(RawResponse {
            status: 200,
            headers: BTreeMap::new(),
            body,
        });
        record
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::record_for;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_sniffs_each_format() {
        let registry = AdapterRegistry::new();

        let openai = record_for(
            "/v1/chat/completions",
            json!({"model": "gpt-4", "messages": []}),
        );
        assert_eq!(registry.resolve(None, &openai).unwrap().name(), "openai");

        let claude = record_for(
            "/v1/messages",
            json!({"model": "claude-sonnet-4", "max_tokens": 100, "messages": []}),
        );
        assert_eq!(registry.resolve(None, &claude).unwrap().name(), "claude");

        let gemini = record_for(
            "/v1beta/models/gemini-2.0-flash:generateContent",
            json!({"contents": []}),
        );
        assert_eq!(registry.resolve(None, &gemini).unwrap().name(), "gemini");
    }

    #[test]
    fn test_forced_format_wins_over_sniffing() {
        let registry = AdapterRegistry::new();
        let record = record_for("/anything", json!({"messages": []}));
        assert_eq!(
            registry.resolve(Some("claude"), &record).unwrap().name(),
            "claude"
        );
    }

    #[test]
    fn test_unknown_format_is_an_error() {
        let registry = AdapterRegistry::new();
        let record = record_for("/metrics", json!("plain"));
        assert!(matches!(
            registry.resolve(None, &record),
            Err(CookError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            registry.resolve(Some("cohere"), &record),
            Err(CookError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_content_to_text_shapes() {
        assert_eq!(content_to_text(&json!("plain")), "plain");
        assert_eq!(
            content_to_text(&json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}])),
            "ab"
        );
        assert_eq!(content_to_text(&json!(null)), "");
    }
}

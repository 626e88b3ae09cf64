//! The raw capture record: one JSONL line per completed exchange.
//!
//! The outer envelope is typed; request and response bodies stay as
//! `serde_json::Value` so captures survive unknown provider fields and
//! future content block types unchanged.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CookError;

/// One captured exchange, as appended by the proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// Opaque unique id assigned at capture time (UUID v4).
    pub id: String,
    /// Wall-clock receipt instant, milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub request: RawRequest,
    /// Absent when the upstream call failed before any response bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<RawResponse>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The client request as forwarded upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRequest {
    /// Path + query of the upstream call (no scheme/host).
    pub url: String,
    pub method: String,
    /// Headers minus hop-by-hop, credential values masked.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Decoded JSON body, or `{"base64": "..."}` for non-JSON payloads.
    pub body: Value,
}

/// The upstream response as delivered to the client.
///
/// For streamed exchanges `body` is either a JSON array of the decoded SSE
/// `data:` payloads (default) or the eagerly reassembled logical response
/// (when the proxy is configured to reassemble at capture time). The cook
/// adapters accept both shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl RawRecord {
    /// Parsed request body, when it is a JSON object.
    pub fn request_body(&self) -> Option<&serde_json::Map<String, Value>> {
        self.request.body.as_object()
    }
}

/// Parse capture text into records plus per-line diagnostics.
///
/// A reader must tolerate a trailing partial line (the file may still be
/// written to), so everything after the last newline is ignored. Malformed
/// interior lines are reported, not fatal.
pub fn parse_capture(text: &str) -> (Vec<RawRecord>, Vec<String>) {
    let complete = match text.rfind('\n') {
        Some(pos) => &text[..pos],
        None => return (Vec::new(), Vec::new()),
    };

    let mut records = Vec::new();
    let mut diagnostics = Vec::new();

    for (idx, line) in complete.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => diagnostics.push(format!("line {}: malformed_record: {e}", idx + 1)),
        }
    }

    (records, diagnostics)
}

/// Read and parse a capture file.
pub fn read_capture_file(path: &Path) -> Result<(Vec<RawRecord>, Vec<String>), CookError> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_capture(&text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record_line(id: &str, timestamp: u64) -> String {
        serde_json::to_string(&json!({
            "id": id,
            "timestamp": timestamp,
            "request": {
                "url": "/v1/chat/completions",
                "method": "POST",
                "headers": {},
                "body": {"model": "gpt-4", "messages": []}
            },
            "response": {"status": 200, "headers": {}, "body": {"choices": []}},
            "duration_ms": 12
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_complete_lines() {
        let text = format!("{}\n{}\n", record_line("a", 1), record_line("b", 2));
        let (records, diags) = parse_capture(&text);
        assert_eq!(records.len(), 2);
        assert!(diags.is_empty());
        assert_eq!(records[0].id, "a");
        assert_eq!(records[1].timestamp, 2);
    }

    #[test]
    fn test_trailing_partial_line_ignored() {
        let text = format!("{}\n{{\"id\":\"trunc", record_line("a", 1));
        let (records, diags) = parse_capture(&text);
        assert_eq!(records.len(), 1);
        assert!(diags.is_empty(), "partial tail must not be a diagnostic");
    }

    #[test]
    fn test_malformed_interior_line_reported() {
        let text = format!("{}\nnot json\n{}\n", record_line("a", 1), record_line("b", 2));
        let (records, diags) = parse_capture(&text);
        assert_eq!(records.len(), 2);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].contains("line 2"), "got: {}", diags[0]);
        assert!(diags[0].contains("malformed_record"));
    }

    #[test]
    fn test_no_newline_at_all() {
        let (records, diags) = parse_capture("{\"id\":\"x\"");
        assert!(records.is_empty());
        assert!(diags.is_empty());
    }

    #[test]
    fn test_record_without_response_roundtrips() {
        let record = RawRecord {
            id: "r1".into(),
            timestamp: 1,
            request: RawRequest {
                url: "/v1/messages".into(),
                method: "POST".into(),
                headers: BTreeMap::new(),
                body: json!({"model": "m"}),
            },
            response: None,
            duration_ms: 3,
            error: Some("upstream_connect: connection refused".into()),
        };
        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains("\"response\""));
        let back: RawRecord = serde_json::from_str(&line).unwrap();
        assert!(back.response.is_none());
        assert_eq!(back.error.as_deref(), Some("upstream_connect: connection refused"));
    }
}

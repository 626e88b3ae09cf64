//! Server-Sent-Events parsing for captured stream bodies.
//!
//! The proxy buffers streamed responses verbatim; this module turns that
//! buffer into the list of decoded `data:` payloads. Event framing is
//! blank-line separated, but `data:` lines are recognized line-by-line so a
//! missing final separator still yields the last event.

use serde_json::Value;

/// Decode the `data:` payloads of an SSE body, in order.
///
/// `[DONE]` sentinels and undecodable payloads are skipped. Multi-line
/// `data:` fields within one event are joined with `\n` per the SSE spec.
pub fn parse_sse_payloads(text: &str) -> Vec<Value> {
    let mut payloads = Vec::new();
    let mut data_lines: Vec<&str> = Vec::new();

    let flush = |lines: &mut Vec<&str>, out: &mut Vec<Value>| {
        if lines.is_empty() {
            return;
        }
        let data = lines.join("\n");
        lines.clear();
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return;
        }
        if let Ok(value) = serde_json::from_str::<Value>(data) {
            out.push(value);
        }
    };

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            flush(&mut data_lines, &mut payloads);
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // "event:" / "id:" / comment lines carry nothing the capture needs:
        // every provider repeats the event type inside the JSON payload.
    }
    flush(&mut data_lines, &mut payloads);

    payloads
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_openai_style_stream() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\n\
                    data: [DONE]\n\n";
        let events = parse_sse_payloads(body);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["choices"][0]["delta"]["content"], json!("He"));
    }

    #[test]
    fn test_anthropic_style_stream_with_event_lines() {
        let body = "event: message_start\n\
                    data: {\"type\":\"message_start\",\"message\":{\"role\":\"assistant\"}}\n\n\
                    event: content_block_delta\n\
                    data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n";
        let events = parse_sse_payloads(body);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], json!("message_start"));
        assert_eq!(events[1]["delta"]["text"], json!("hi"));
    }

    #[test]
    fn test_missing_final_separator() {
        let body = "data: {\"a\":1}\n\ndata: {\"b\":2}\n";
        let events = parse_sse_payloads(body);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], json!({"b": 2}));
    }

    #[test]
    fn test_undecodable_payloads_skipped() {
        let body = "data: {broken\n\ndata: {\"ok\":true}\n\n";
        let events = parse_sse_payloads(body);
        assert_eq!(events, vec![json!({"ok": true})]);
    }

    #[test]
    fn test_crlf_lines() {
        let body = "data: {\"a\":1}\r\n\r\ndata: [DONE]\r\n\r\n";
        let events = parse_sse_payloads(body);
        assert_eq!(events, vec![json!({"a": 1})]);
    }
}

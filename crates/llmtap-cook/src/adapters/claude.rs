//! Anthropic Messages API adapter.
//!
//! Request and response bodies carry typed content blocks; conversion walks
//! them in order. Thinking blocks become their own normalized messages —
//! they are never folded into the assistant text. Stream reassembly keeps
//! one accumulator per content block index and finalizes when the event
//! list ends, so truncated streams still yield the blocks received so far.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use super::{content_to_text, ProviderAdapter};
use crate::bundle::{Message, Role, Tool, ToolCall};
use crate::error::CookError;
use crate::record::RawRecord;

pub struct ClaudeAdapter;

impl ProviderAdapter for ClaudeAdapter {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn detect(&self, record: &RawRecord) -> bool {
        record.request.url.contains("/v1/messages")
            || record.request.headers.contains_key("anthropic-version")
            || record.request_body().is_some_and(|body| {
                body.get("tools")
                    .and_then(Value::as_array)
                    .is_some_and(|tools| {
                        tools.iter().any(|t| t.get("input_schema").is_some())
                    })
            })
    }

    fn extract_messages(&self, record: &RawRecord) -> Result<Vec<Message>, CookError> {
        let body = &record.request.body;
        let mut out = Vec::new();

        // `system` sits outside the messages array; lift it to a leading
        // system message. Both the string and block-array forms occur.
        if let Some(system) = body.get("system") {
            let text = match system {
                Value::String(s) => s.clone(),
                Value::Array(blocks) => blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n"),
                _ => String::new(),
            };
            if !text.is_empty() {
                out.push(Message::new(Role::System, text));
            }
        }

        let messages = body.get("messages").and_then(Value::as_array).ok_or_else(|| {
            CookError::MalformedRecord("request body has no messages array".into())
        })?;

        for message in messages {
            let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
            match message.get("content") {
                Some(Value::String(text)) => out.push(Message::new(
                    if role == "assistant" { Role::Assistant } else { Role::User },
                    text.clone(),
                )),
                Some(Value::Array(blocks)) => {
                    if role == "assistant" {
                        assistant_block_messages(blocks, &mut out);
                    } else {
                        user_block_messages(blocks, &mut out);
                    }
                }
                _ => {}
            }
        }
        Ok(out)
    }

    fn extract_tools(&self, record: &RawRecord) -> Vec<Tool> {
        let Some(tools) = record.request.body.get("tools").and_then(Value::as_array) else {
            return Vec::new();
        };
        tools
            .iter()
            .filter_map(|tool| {
                let name = tool.get("name").and_then(Value::as_str)?;
                // Server tools are declared by versioned type tags
                // (e.g. "web_search_20250305"); client tools carry an
                // input_schema and no type, or type "custom".
                let type_tag = tool.get("type").and_then(Value::as_str);
                let is_server_side = type_tag.is_some_and(|t| t != "custom");
                Some(Tool {
                    id: String::new(),
                    name: name.into(),
                    description: tool
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .into(),
                    parameters: tool.get("input_schema").cloned().unwrap_or(json!({})),
                    is_server_side,
                })
            })
            .collect()
    }

    fn extract_model(&self, record: &RawRecord) -> Option<String> {
        record
            .request
            .body
            .get("model")
            .and_then(Value::as_str)
            .map(String::from)
    }

    fn extract_response(&self, body: &Value) -> Result<Vec<Message>, CookError> {
        if body.get("type").and_then(Value::as_str) == Some("error") || body.get("error").is_some()
        {
            return Ok(Vec::new());
        }
        let blocks = body.get("content").and_then(Value::as_array).ok_or_else(|| {
            CookError::MalformedRecord("response has no content block array".into())
        })?;
        let mut out = Vec::new();
        assistant_block_messages(blocks, &mut out);
        Ok(out)
    }

    fn reassemble_stream(&self, events: &[Value]) -> Result<Value, CookError> {
        let mut model: Option<String> = None;
        let mut message_id: Option<String> = None;
        let mut stop_reason: Option<String> = None;
        let mut usage = Map::new();
        let mut blocks: BTreeMap<u64, BlockAccumulator> = BTreeMap::new();

        for event in events {
            match event.get("type").and_then(Value::as_str) {
                Some("message_start") => {
                    if let Some(message) = event.get("message") {
                        model = message.get("model").and_then(Value::as_str).map(String::from);
                        message_id = message.get("id").and_then(Value::as_str).map(String::from);
                        if let Some(input) = message
                            .get("usage")
                            .and_then(|u| u.get("input_tokens"))
                            .filter(|v| !v.is_null())
                        {
                            usage.insert("input_tokens".into(), input.clone());
                        }
                    }
                }
                Some("content_block_start") => {
                    let Some(index) = event.get("index").and_then(Value::as_u64) else {
                        continue;
                    };
                    let Some(block) = event.get("content_block") else {
                        continue;
                    };
                    blocks.insert(
                        index,
                        BlockAccumulator {
                            block_type: block
                                .get("type")
                                .and_then(Value::as_str)
                                .unwrap_or("text")
                                .into(),
                            id: block.get("id").and_then(Value::as_str).map(String::from),
                            name: block.get("name").and_then(Value::as_str).map(String::from),
                            text: block
                                .get("text")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .into(),
                            partial_json: String::new(),
                        },
                    );
                }
                Some("content_block_delta") => {
                    let Some(block) = event
                        .get("index")
                        .and_then(Value::as_u64)
                        .and_then(|index| blocks.get_mut(&index))
                    else {
                        continue;
                    };
                    let Some(delta) = event.get("delta") else {
                        continue;
                    };
                    match delta.get("type").and_then(Value::as_str) {
                        Some("text_delta") => {
                            if let Some(text) = delta.get("text").and_then(Value::as_str) {
                                block.text.push_str(text);
                            }
                        }
                        Some("thinking_delta") => {
                            if let Some(text) = delta.get("thinking").and_then(Value::as_str) {
                                block.text.push_str(text);
                            }
                        }
                        Some("input_json_delta") => {
                            if let Some(fragment) =
                                delta.get("partial_json").and_then(Value::as_str)
                            {
                                block.partial_json.push_str(fragment);
                            }
                        }
                        _ => {}
                    }
                }
                Some("message_delta") => {
                    if let Some(reason) = event
                        .get("delta")
                        .and_then(|d| d.get("stop_reason"))
                        .and_then(Value::as_str)
                    {
                        stop_reason = Some(reason.into());
                    }
                    if let Some(output) = event
                        .get("usage")
                        .and_then(|u| u.get("output_tokens"))
                        .filter(|v| !v.is_null())
                    {
                        usage.insert("output_tokens".into(), output.clone());
                    }
                }
                // message_stop and ping carry nothing to accumulate.
                _ => {}
            }
        }

        let content: Vec<Value> = blocks.into_values().map(BlockAccumulator::finalize).collect();
        Ok(json!({
            "type": "message",
            "id": message_id,
            "role": "assistant",
            "model": model,
            "content": content,
            "stop_reason": stop_reason,
            "usage": usage,
        }))
    }
}

/// Per-index accumulator for one streamed content block.
struct BlockAccumulator {
    block_type: String,
    id: Option<String>,
    name: Option<String>,
    /// Text or thinking characters, depending on the block type.
    text: String,
    partial_json: String,
}

impl BlockAccumulator {
    fn finalize(self) -> Value {
        match self.block_type.as_str() {
            "tool_use" => {
                let input: Value = serde_json::from_str(&self.partial_json).unwrap_or(json!({}));
                json!({
                    "type": "tool_use",
                    "id": self.id,
                    "name": self.name,
                    "input": input,
                })
            }
            "thinking" => json!({"type": "thinking", "thinking": self.text}),
            _ => json!({"type": "text", "text": self.text}),
        }
    }
}

/// Convert assistant-side content blocks, in order. Consecutive text blocks
/// merge into one assistant message, consecutive tool_use blocks into one
/// tool_use message; thinking blocks always stand alone.
fn assistant_block_messages(blocks: &[Value], out: &mut Vec<Message>) {
    let mut text = String::new();
    let mut calls: Vec<ToolCall> = Vec::new();

    let flush_text = |text: &mut String, out: &mut Vec<Message>| {
        if !text.is_empty() {
            out.push(Message::new(Role::Assistant, std::mem::take(text)));
        }
    };
    let flush_calls = |calls: &mut Vec<ToolCall>, out: &mut Vec<Message>| {
        if !calls.is_empty() {
            let mut msg = Message::new(Role::ToolUse, String::new());
            msg.tool_calls = std::mem::take(calls);
            out.push(msg);
        }
    };

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                flush_calls(&mut calls, out);
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                }
            }
            Some("thinking") => {
                flush_text(&mut text, out);
                flush_calls(&mut calls, out);
                let thinking = block
                    .get("thinking")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                out.push(Message::new(Role::Thinking, thinking));
            }
            Some("tool_use") | Some("server_tool_use") => {
                flush_text(&mut text, out);
                calls.push(ToolCall {
                    name: block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .into(),
                    arguments: block.get("input").cloned().unwrap_or(json!({})),
                    id: block.get("id").and_then(Value::as_str).map(String::from),
                });
            }
            other => {
                tracing::debug!(block_type = ?other, "skipping unhandled assistant content block");
            }
        }
    }
    flush_text(&mut text, out);
    flush_calls(&mut calls, out);
}

/// Convert user-side content blocks: text accumulates into user messages,
/// tool_result blocks become tool_result messages in place.
fn user_block_messages(blocks: &[Value], out: &mut Vec<Message>) {
    let mut text = String::new();

    let flush_text = |text: &mut String, out: &mut Vec<Message>| {
        if !text.is_empty() {
            out.push(Message::new(Role::User, std::mem::take(text)));
        }
    };

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                }
            }
            Some("tool_result") => {
                flush_text(&mut text, out);
                let content = block
                    .get("content")
                    .map(content_to_text)
                    .unwrap_or_default();
                let mut msg = Message::new(Role::ToolResult, content);
                msg.tool_use_id = block
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .map(String::from);
                msg.is_error = block.get("is_error").and_then(Value::as_bool);
                out.push(msg);
            }
            Some("image") => text.push_str("[image]"),
            other => {
                tracing::debug!(block_type = ?other, "skipping unhandled user content block");
            }
        }
    }
    flush_text(&mut text, out);
}

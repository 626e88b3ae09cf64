//! OpenAI-compatible chat completions adapter.
//!
//! Covers the `/v1/chat/completions` wire format and the many gateways that
//! imitate it. Streaming reassembly concatenates `delta.content` strings and
//! accumulates `delta.tool_calls` fragments by index into the same shape a
//! non-streaming response would have carried.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::{content_to_text, ProviderAdapter};
use crate::bundle::{Message, Role, Tool, ToolCall};
use crate::error::CookError;
use crate::record::RawRecord;

pub struct OpenAiAdapter;

impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn detect(&self, record: &RawRecord) -> bool {
        record.request.url.contains("/chat/completions")
            || record
                .request_body()
                .is_some_and(|body| body.get("messages").is_some_and(Value::is_array))
    }

    fn extract_messages(&self, record: &RawRecord) -> Result<Vec<Message>, CookError> {
        let messages = record
            .request
            .body
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                CookError::MalformedRecord("request body has no messages array".into())
            })?;

        let mut out = Vec::new();
        for message in messages {
            let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
            let content = message
                .get("content")
                .map(content_to_text)
                .unwrap_or_default();

            match role {
                "system" | "developer" => out.push(Message::new(Role::System, content)),
                "assistant" => {
                    let calls = message
                        .get("tool_calls")
                        .and_then(Value::as_array)
                        .map(|calls| calls.iter().map(normalize_tool_call).collect::<Vec<_>>())
                        .unwrap_or_default();
                    if calls.is_empty() {
                        out.push(Message::new(Role::Assistant, content));
                    } else {
                        let mut msg = Message::new(Role::ToolUse, content);
                        msg.tool_calls = calls;
                        out.push(msg);
                    }
                }
                "tool" => {
                    let mut msg = Message::new(Role::ToolResult, content);
                    msg.tool_use_id = message
                        .get("tool_call_id")
                        .and_then(Value::as_str)
                        .map(String::from);
                    out.push(msg);
                }
                _ => out.push(Message::new(Role::User, content)),
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
                // Either {"type":"function","function":{...}} or a flattened
                // definition (some gateways drop the wrapper).
                let function = tool.get("function").unwrap_or(tool);
                let name = function.get("name").and_then(Value::as_str)?;
                Some(Tool {
                    id: String::new(),
                    name: name.into(),
                    description: function
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .into(),
                    parameters: function.get("parameters").cloned().unwrap_or(json!({})),
                    is_server_side: false,
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
        if body.get("error").is_some() {
            return Ok(Vec::new());
        }
        let message = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .ok_or_else(|| {
                CookError::MalformedRecord("response has no choices[0].message".into())
            })?;

        let mut out = Vec::new();
        let content = message
            .get("content")
            .map(content_to_text)
            .unwrap_or_default();
        if !content.is_empty() {
            out.push(Message::new(Role::Assistant, content));
        }
        let calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| calls.iter().map(normalize_tool_call).collect::<Vec<_>>())
            .unwrap_or_default();
        if !calls.is_empty() {
            let mut msg = Message::new(Role::ToolUse, String::new());
            msg.tool_calls = calls;
            out.push(msg);
        }
        Ok(out)
    }

    fn reassemble_stream(&self, events: &[Value]) -> Result<Value, CookError> {
        let mut model: Option<String> = None;
        let mut role: Option<String> = None;
        let mut finish_reason: Option<String> = None;
        let mut usage: Option<Value> = None;
        let mut content = String::new();
        let mut calls: BTreeMap<u64, PartialCall> = BTreeMap::new();

        for event in events {
            if model.is_none() {
                model = event.get("model").and_then(Value::as_str).map(String::from);
            }
            if let Some(u) = event.get("usage").filter(|u| !u.is_null()) {
                usage = Some(u.clone());
            }
            let Some(choice) = event.get("choices").and_then(|c| c.get(0)) else {
                continue;
            };
            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                finish_reason = Some(reason.into());
            }
            let Some(delta) = choice.get("delta") else {
                continue;
            };
            if role.is_none() {
                role = delta.get("role").and_then(Value::as_str).map(String::from);
            }
            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                content.push_str(text);
            }
            for fragment in delta
                .get("tool_calls")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                let index = fragment.get("index").and_then(Value::as_u64).unwrap_or(0);
                let call = calls.entry(index).or_default();
                if call.id.is_none() {
                    call.id = fragment.get("id").and_then(Value::as_str).map(String::from);
                }
                let function = fragment.get("function").unwrap_or(fragment);
                if let Some(name) = function.get("name").and_then(Value::as_str) {
                    call.name = name.into();
                }
                if let Some(arguments) = function.get("arguments").and_then(Value::as_str) {
                    call.arguments.push_str(arguments);
                }
            }
        }

        let mut message = json!({
            "role": role.as_deref().unwrap_or("assistant"),
            "content": content,
        });
        if !calls.is_empty() {
            message["tool_calls"] = Value::Array(
                calls
                    .into_values()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {"name": call.name, "arguments": call.arguments},
                        })
                    })
                    .collect(),
            );
        }

        let mut reassembled = json!({
            "model": model,
            "choices": [{"message": message, "finish_reason": finish_reason}],
        });
        if let Some(u) = usage {
            reassembled["usage"] = u;
        }
        Ok(reassembled)
    }
}

/// Accumulator for one tool call spread across stream chunks.
#[derive(Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

fn normalize_tool_call(call: &Value) -> ToolCall {
    let function = call.get("function").unwrap_or(call);
    ToolCall {
        name: function
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .into(),
        arguments: parse_arguments(function.get("arguments")),
        id: call.get("id").and_then(Value::as_str).map(String::from),
    }
}

/// OpenAI ships tool arguments as a JSON string; decode it, preserving
/// undecodable text under `_raw` rather than dropping it.
fn parse_arguments(arguments: Option<&Value>) -> Value {
    match arguments {
        None => json!({}),
        Some(Value::String(text)) => {
            if text.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(text).unwrap_or_else(|_| json!({"_raw": text}))
            }
        }
        Some(other) => other.clone(),
    }
}

//! Google Gemini generateContent adapter.
//!
//! Gemini differs from the other formats in three ways this adapter has to
//! absorb: the model name lives in the URL path rather than the body, tool
//! calls carry no correlation ids (function responses correlate by name),
//! and the REST surface accepts both camelCase and snake_case field names.

use serde_json::{json, Value};

use super::ProviderAdapter;
use crate::bundle::{Message, Role, Tool, ToolCall};
use crate::error::CookError;
use crate::record::RawRecord;

/// Provider-hosted tool keys: the client cannot implement these.
const SERVER_TOOL_KEYS: &[&str] = &[
    "googleSearch",
    "google_search",
    "googleSearchRetrieval",
    "google_search_retrieval",
    "codeExecution",
    "code_execution",
    "urlContext",
    "url_context",
];

pub struct GeminiAdapter;

impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn detect(&self, record: &RawRecord) -> bool {
        record.request.url.contains(":generateContent")
            || record.request.url.contains(":streamGenerateContent")
            || record
                .request_body()
                .is_some_and(|body| body.contains_key("contents"))
    }

    fn extract_messages(&self, record: &RawRecord) -> Result<Vec<Message>, CookError> {
        let body = &record.request.body;
        let mut out = Vec::new();

        if let Some(instruction) = field(body, "system_instruction", "systemInstruction") {
            let text = instruction_text(instruction);
            if !text.is_empty() {
                out.push(Message::new(Role::System, text));
            }
        }

        let contents = body.get("contents").and_then(Value::as_array).ok_or_else(|| {
            CookError::MalformedRecord("request body has no contents array".into())
        })?;

        for content in contents {
            let role = content.get("role").and_then(Value::as_str).unwrap_or("user");
            if let Some(parts) = content.get("parts").and_then(Value::as_array) {
                part_messages(parts, role == "model", &mut out);
            }
        }
        Ok(out)
    }

    fn extract_tools(&self, record: &RawRecord) -> Vec<Tool> {
        let Some(tools) = record.request.body.get("tools").and_then(Value::as_array) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for entry in tools {
            let Some(entry) = entry.as_object() else {
                continue;
            };
            if let Some(declarations) = entry
                .get("function_declarations")
                .or_else(|| entry.get("functionDeclarations"))
                .and_then(Value::as_array)
            {
                for declaration in declarations {
                    let Some(name) = declaration.get("name").and_then(Value::as_str) else {
                        continue;
                    };
                    out.push(Tool {
                        id: String::new(),
                        name: name.into(),
                        description: declaration
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .into(),
                        parameters: declaration.get("parameters").cloned().unwrap_or(json!({})),
                        is_server_side: false,
                    });
                }
            }
            for key in SERVER_TOOL_KEYS {
                if entry.contains_key(*key) {
                    out.push(Tool {
                        id: String::new(),
                        name: (*key).into(),
                        description: String::new(),
                        parameters: json!({}),
                        is_server_side: true,
                    });
                }
            }
        }
        out
    }

    fn extract_model(&self, record: &RawRecord) -> Option<String> {
        if let Some(model) = record.request.body.get("model").and_then(Value::as_str) {
            return Some(model.into());
        }
        // The REST path is /v1beta/models/<model>:generateContent.
        let url = &record.request.url;
        let start = url.find("models/")? + "models/".len();
        let rest = &url[start..];
        let end = rest
            .find(|c| c == ':' || c == '?' || c == '/')
            .unwrap_or(rest.len());
        (end > 0).then(|| rest[..end].to_string())
    }

    fn extract_response(&self, body: &Value) -> Result<Vec<Message>, CookError> {
        if body.get("error").is_some() {
            return Ok(Vec::new());
        }
        let candidate = body
            .get("candidates")
            .and_then(|candidates| candidates.get(0));
        let Some(candidate) = candidate else {
            // Safety-blocked prompts return promptFeedback and no candidates.
            if body.get("promptFeedback").is_some() || body.get("prompt_feedback").is_some() {
                return Ok(Vec::new());
            }
            return Err(CookError::MalformedRecord(
                "response has no candidates".into(),
            ));
        };

        let mut out = Vec::new();
        if let Some(parts) = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
        {
            part_messages(parts, true, &mut out);
        }
        Ok(out)
    }

    fn reassemble_stream(&self, events: &[Value]) -> Result<Value, CookError> {
        let mut text = String::new();
        let mut parts: Vec<Value> = Vec::new();
        let mut finish_reason: Option<Value> = None;
        let mut usage: Option<Value> = None;
        let mut model_version: Option<Value> = None;

        let flush_text = |text: &mut String, parts: &mut Vec<Value>| {
            if !text.is_empty() {
                parts.push(json!({"text": std::mem::take(text)}));
            }
        };

        for event in events {
            if let Some(u) = field(event, "usage_metadata", "usageMetadata") {
                usage = Some(u.clone());
            }
            if let Some(v) = field(event, "model_version", "modelVersion") {
                model_version = Some(v.clone());
            }
            let Some(candidate) = event.get("candidates").and_then(|c| c.get(0)) else {
                continue;
            };
            if let Some(reason) = field(candidate, "finish_reason", "finishReason") {
                finish_reason = Some(reason.clone());
            }
            let Some(event_parts) = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
            else {
                continue;
            };
            for part in event_parts {
                if let Some(t) = part.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                } else {
                    // Function calls arrive whole; keep arrival order
                    // relative to the surrounding text.
                    flush_text(&mut text, &mut parts);
                    parts.push(part.clone());
                }
            }
        }
        flush_text(&mut text, &mut parts);

        Ok(json!({
            "candidates": [{
                "content": {"role": "model", "parts": parts},
                "finishReason": finish_reason,
            }],
            "usageMetadata": usage,
            "modelVersion": model_version,
        }))
    }
}

/// Read a field by its snake_case or camelCase spelling.
fn field<'a>(value: &'a Value, snake: &str, camel: &str) -> Option<&'a Value> {
    value.get(snake).or_else(|| value.get(camel))
}

fn instruction_text(instruction: &Value) -> String {
    match instruction {
        Value::String(s) => s.clone(),
        Value::Object(_) => instruction
            .get("parts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default(),
        _ => String::new(),
    }
}

/// Convert a parts array in order. `model` role maps to assistant; function
/// calls and responses become tool_use / tool_result messages, correlated
/// by function name (Gemini assigns no call ids).
fn part_messages(parts: &[Value], is_model: bool, out: &mut Vec<Message>) {
    let text_role = if is_model { Role::Assistant } else { Role::User };
    let mut text = String::new();
    let mut calls: Vec<ToolCall> = Vec::new();

    let flush_text = |text: &mut String, out: &mut Vec<Message>| {
        if !text.is_empty() {
            out.push(Message::new(text_role, std::mem::take(text)));
        }
    };
    let flush_calls = |calls: &mut Vec<ToolCall>, out: &mut Vec<Message>| {
        if !calls.is_empty() {
            let mut msg = Message::new(Role::ToolUse, String::new());
            msg.tool_calls = std::mem::take(calls);
            out.push(msg);
        }
    };

    for part in parts {
        if let Some(t) = part.get("text").and_then(Value::as_str) {
            flush_calls(&mut calls, out);
            text.push_str(t);
        } else if let Some(call) = field(part, "function_call", "functionCall") {
            flush_text(&mut text, out);
            calls.push(ToolCall {
                name: call
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .into(),
                arguments: call.get("args").cloned().unwrap_or(json!({})),
                id: call.get("id").and_then(Value::as_str).map(String::from),
            });
        } else if let Some(response) = field(part, "function_response", "functionResponse") {
            flush_text(&mut text, out);
            flush_calls(&mut calls, out);
            let name = response.get("name").and_then(Value::as_str);
            let payload = response.get("response").cloned().unwrap_or(Value::Null);
            let content = match payload {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => serde_json::to_string(&other).unwrap_or_default(),
            };
            let mut msg = Message::new(Role::ToolResult, content);
            msg.tool_use_id = name.map(String::from);
            out.push(msg);
        } else if field(part, "inline_data", "inlineData").is_some() {
            flush_calls(&mut calls, out);
            text.push_str("[inline data]");
        }
    }
    flush_text(&mut text, out);
    flush_calls(&mut calls, out);
}

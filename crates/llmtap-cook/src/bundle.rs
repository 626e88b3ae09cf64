//! Normalized trace entities: the cooked bundle consumed by the viewer.
//!
//! Message and Tool ids are content hashes (see [`crate::dedup`]); a
//! `RequestNode` references them by id only. All three collections are
//! immutable once the bundle is written.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized message role, provider-neutral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolUse,
    ToolResult,
    Thinking,
}

/// One tool invocation attached to a `tool_use` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Decoded argument object (OpenAI's JSON-string arguments are parsed).
    pub arguments: Value,
    /// Provider call id, when the provider assigns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A deduplicated conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Content hash, filled in by the interner.
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `tool_result` roles: the id of the tool_use being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl Message {
    /// A message with no id yet; the interner assigns one.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_use_id: None,
            is_error: None,
        }
    }
}

/// A deduplicated tool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Content hash, filled in by the interner.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub parameters: Value,
    /// True for provider-hosted tools the client cannot implement
    /// (e.g. Google search).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_server_side: bool,
}

/// One captured request with its place in the dependency forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestNode {
    /// Equals the raw capture record id.
    pub id: String,
    /// Parent request in the dependency forest; `None` for roots.
    pub parent_id: Option<String>,
    pub timestamp: u64,
    /// Ids of the messages actually sent, in order.
    pub request_messages: Vec<String>,
    /// Ids of the messages produced by the provider, in order. Thinking and
    /// assistant content stay separate entries.
    pub response_messages: Vec<String>,
    pub model: String,
    /// Ids of the tools offered on this request.
    pub tools: Vec<String>,
    pub duration_ms: u64,
}

/// The cooked output: everything the viewer needs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TraceBundle {
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub requests: Vec<RequestNode>,
}

//! Content-addressed interning of messages and tools.
//!
//! Ids are a pure function of canonical content: the first 16 bytes of the
//! SHA-256 of the canonical JSON encoding, as lowercase hex. serde_json maps
//! serialize with sorted keys here (preserve_order is not enabled), so two
//! structurally equal values always canonicalize identically.

use std::collections::HashMap;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::bundle::{Message, Tool, ToolCall};

/// Maintains the master message/tool collections in first-seen order.
#[derive(Debug, Default)]
pub struct Interner {
    messages: Vec<Message>,
    tools: Vec<Tool>,
    message_ids: HashMap<String, usize>,
    tool_ids: HashMap<String, usize>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a message, returning its content-hash id.
    ///
    /// Idempotent: interning an equal message returns the existing id and
    /// adds nothing.
    pub fn intern_message(&mut self, mut message: Message) -> String {
        let id = message_id(&message);
        if !self.message_ids.contains_key(&id) {
            message.id = id.clone();
            self.message_ids.insert(id.clone(), self.messages.len());
            self.messages.push(message);
        }
        id
    }

    /// Intern a tool, returning its content-hash id.
    pub fn intern_tool(&mut self, mut tool: Tool) -> String {
        let id = tool_id(&tool);
        if !self.tool_ids.contains_key(&id) {
            tool.id = id.clone();
            self.tool_ids.insert(id.clone(), self.tools.len());
            self.tools.push(tool);
        }
        id
    }

    /// The master collections, first-seen order.
    pub fn into_collections(self) -> (Vec<Message>, Vec<Tool>) {
        (self.messages, self.tools)
    }
}

/// Stable content hash of a message. Ignores any pre-set `id`.
pub fn message_id(message: &Message) -> String {
    hash_value(&canonical_message(message))
}

/// Stable content hash of a tool definition. Ignores any pre-set `id`.
pub fn tool_id(tool: &Tool) -> String {
    hash_value(&json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.parameters,
        "is_server_side": tool.is_server_side,
    }))
}

/// Canonical form: absent optionals dropped, an empty tool_calls list
/// treated the same as no list at all.
fn canonical_message(message: &Message) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("role".into(), serde_json::to_value(message.role).unwrap_or(Value::Null));
    obj.insert("content".into(), Value::String(message.content.clone()));
    if !message.tool_calls.is_empty() {
        obj.insert(
            "tool_calls".into(),
            Value::Array(message.tool_calls.iter().map(canonical_tool_call).collect()),
        );
    }
    if let Some(ref tool_use_id) = message.tool_use_id {
        obj.insert("tool_use_id".into(), Value::String(tool_use_id.clone()));
    }
    if let Some(is_error) = message.is_error {
        obj.insert("is_error".into(), Value::Bool(is_error));
    }
    Value::Object(obj)
}

fn canonical_tool_call(call: &ToolCall) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("name".into(), Value::String(call.name.clone()));
    obj.insert("arguments".into(), call.arguments.clone());
    if let Some(ref id) = call.id {
        obj.insert("id".into(), Value::String(id.clone()));
    }
    Value::Object(obj)
}

fn hash_value(value: &Value) -> String {
    let encoded = serde_json::to_vec(value).unwrap_or_default();
    let digest = Sha256::digest(&encoded);
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Role;
    use pretty_assertions::assert_eq;

    fn user(content: &str) -> Message {
        Message::new(Role::User, content)
    }

    #[test]
    fn test_equal_content_equal_id() {
        assert_eq!(message_id(&user("hi")), message_id(&user("hi")));
        assert_ne!(message_id(&user("hi")), message_id(&user("hi!")));
    }

    #[test]
    fn test_role_distinguishes_messages() {
        let as_user = message_id(&user("hi"));
        let as_assistant = message_id(&Message::new(Role::Assistant, "hi"));
        assert_ne!(as_user, as_assistant);
    }

    #[test]
    fn test_id_field_does_not_affect_hash() {
        let mut pre_set = user("hi");
        pre_set.id = "bogus".into();
        assert_eq!(message_id(&pre_set), message_id(&user("hi")));
    }

    #[test]
    fn test_argument_key_order_is_canonical() {
        let a = Message {
            tool_calls: vec![ToolCall {
                name: "bash".into(),
                arguments: serde_json::from_str(r#"{"cmd":"ls","cwd":"/"}"#).unwrap(),
                id: Some("t1".into()),
            }],
            ..Message::new(Role::ToolUse, "")
        };
        let b = Message {
            tool_calls: vec![ToolCall {
                name: "bash".into(),
                arguments: serde_json::from_str(r#"{"cwd":"/","cmd":"ls"}"#).unwrap(),
                id: Some("t1".into()),
            }],
            ..Message::new(Role::ToolUse, "")
        };
        assert_eq!(message_id(&a), message_id(&b));
    }

    #[test]
    fn test_interning_is_idempotent() {
        let mut interner = Interner::new();
        let first = interner.intern_message(user("hello"));
        let second = interner.intern_message(user("hello"));
        assert_eq!(first, second);
        let (messages, _) = interner.into_collections();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, first);
    }

    #[test]
    fn test_first_seen_order_preserved() {
        let mut interner = Interner::new();
        interner.intern_message(user("a"));
        interner.intern_message(user("b"));
        interner.intern_message(user("a"));
        interner.intern_message(user("c"));
        let (messages, _) = interner.into_collections();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_tool_interning() {
        let tool = |desc: &str| Tool {
            id: String::new(),
            name: "search".into(),
            description: desc.into(),
            parameters: serde_json::json!({"type": "object"}),
            is_server_side: false,
        };
        let mut interner = Interner::new();
        let a = interner.intern_tool(tool("find things"));
        let b = interner.intern_tool(tool("find things"));
        let c = interner.intern_tool(tool("find other things"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        let (_, tools) = interner.into_collections();
        assert_eq!(tools.len(), 2);
    }

    #[test]
    fn test_server_side_flag_in_tool_hash() {
        let mk = |server: bool| Tool {
            id: String::new(),
            name: "web_search".into(),
            description: String::new(),
            parameters: serde_json::json!({}),
            is_server_side: server,
        };
        assert_ne!(tool_id(&mk(true)), tool_id(&mk(false)));
    }
}

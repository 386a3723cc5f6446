//! Conversion between upstream message objects and [`ChatMessage`].

use chat_core::message::generate_id;
use chat_core::{ChatMessage, MessageRole, ToolInvocation};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", alias = "role", default)]
    kind: Option<String>,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default)]
    additional_kwargs: Option<WireKwargs>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(default)]
    artifact: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireKwargs {
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

/// Either `{id, name, args}` or the OpenAI `{id, function: {name, arguments}}`.
#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    args: Option<Value>,
    #[serde(default)]
    function: Option<WireFunction>,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

impl WireToolCall {
    fn into_invocation(self) -> Option<ToolInvocation> {
        let (function_name, function_args) = match self.function {
            Some(function) => (function.name, function.arguments),
            None => (None, None),
        };
        let name = self.name.or(function_name)?;
        let arguments = match self.args.or(function_args) {
            // OpenAI sends arguments as a JSON string
            Some(Value::String(raw)) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
            Some(value) => value,
            None => Value::Null,
        };

        Some(ToolInvocation {
            id: self.id,
            name,
            arguments,
        })
    }
}

/// Flatten string or `[{type: "text", text}]` content into plain text.
fn content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.as_str()),
                Value::Object(_) => part.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/// Decode one upstream message. Unsupported types and malformed objects yield
/// `None`.
pub fn decode_message(value: &Value) -> Option<ChatMessage> {
    let wire = match WireMessage::deserialize(value) {
        Ok(wire) => wire,
        Err(err) => {
            warn!("Skipping malformed message: {}", err);
            return None;
        }
    };

    let content = content_text(&wire.content);
    let kind = wire.kind.as_deref().unwrap_or_default();
    let role = match kind {
        "human" | "user" | "HumanMessage" | "HumanMessageChunk" => MessageRole::User,
        "ai" | "assistant" | "AIMessage" | "AIMessageChunk" => {
            let calls: Vec<ToolInvocation> = wire
                .tool_calls
                .or_else(|| wire.additional_kwargs.and_then(|kwargs| kwargs.tool_calls))
                .unwrap_or_default()
                .into_iter()
                .filter_map(WireToolCall::into_invocation)
                .collect();
            if calls.is_empty() {
                MessageRole::Assistant
            } else {
                MessageRole::ToolCall { calls }
            }
        }
        "tool" | "ToolMessage" | "ToolMessageChunk" => MessageRole::ToolResponse {
            name: wire.name,
            tool_call_id: wire.tool_call_id,
            result: wire.artifact,
        },
        other => {
            debug!("Skipping message of type {:?}", other);
            return None;
        }
    };

    Some(ChatMessage {
        id: wire.id.filter(|id| !id.is_empty()).unwrap_or_else(generate_id),
        role,
        content,
    })
}

/// Decode every element of a message array, skipping the ones that fail.
pub fn decode_messages(values: &[Value]) -> Vec<ChatMessage> {
    values.iter().filter_map(decode_message).collect()
}

/// Upstream shape of a message, for request bodies.
pub fn encode_message(message: &ChatMessage) -> Value {
    match &message.role {
        MessageRole::User => json!({
            "id": message.id,
            "type": "human",
            "content": message.content,
        }),
        MessageRole::Assistant => json!({
            "id": message.id,
            "type": "ai",
            "content": message.content,
        }),
        MessageRole::ToolCall { calls } => {
            let tool_calls: Vec<Value> = calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "name": call.name,
                        "args": call.arguments,
                    })
                })
                .collect();
            json!({
                "id": message.id,
                "type": "ai",
                "content": message.content,
                "tool_calls": tool_calls,
            })
        }
        MessageRole::ToolResponse {
            name,
            tool_call_id,
            ..
        } => json!({
            "id": message.id,
            "type": "tool",
            "content": message.content,
            "name": name,
            "tool_call_id": tool_call_id,
        }),
    }
}

/// Messages of an `updates` payload: `agent.messages`, else the first node
/// carrying a `messages` array.
pub fn update_messages(payload: &Value) -> Option<&Vec<Value>> {
    let nodes = payload.as_object()?;
    if let Some(messages) = nodes
        .get("agent")
        .and_then(|agent| agent.get("messages"))
        .and_then(Value::as_array)
    {
        return Some(messages);
    }
    nodes
        .values()
        .find_map(|node| node.get("messages").and_then(Value::as_array))
}

/// `tool_calls` at the top level or under `additional_kwargs`, if non-empty.
pub fn tool_calls_of(payload: &Value) -> Option<&Vec<Value>> {
    payload
        .get("tool_calls")
        .and_then(Value::as_array)
        .filter(|calls| !calls.is_empty())
        .or_else(|| {
            payload
                .get("additional_kwargs")
                .and_then(|kwargs| kwargs.get("tool_calls"))
                .and_then(Value::as_array)
                .filter(|calls| !calls.is_empty())
        })
}

/// Text of an `error` payload.
pub fn error_message(payload: &Value) -> String {
    match payload {
        Value::String(message) => message.clone(),
        _ => payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string()),
    }
}

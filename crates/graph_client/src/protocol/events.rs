//! Typed stream events produced by the dispatcher.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Key that marks a human-in-the-loop interrupt in any payload.
pub const INTERRUPT_KEY: &str = "__interrupt__";

/// The `event:` tag of a stream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventKind {
    Metadata,
    Partial,
    Updates,
    Values,
    Error,
    Complete,
    /// Absent or unrecognized tag.
    Unknown(Option<String>),
}

impl StreamEventKind {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "messages/metadata" => Self::Metadata,
            "messages/partial" => Self::Partial,
            "updates" => Self::Updates,
            "values" => Self::Values,
            "error" => Self::Error,
            "messages/complete" => Self::Complete,
            other => Self::Unknown(Some(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Metadata => "messages/metadata",
            Self::Partial => "messages/partial",
            Self::Updates => "updates",
            Self::Values => "values",
            Self::Error => "error",
            Self::Complete => "messages/complete",
            Self::Unknown(Some(tag)) => tag,
            Self::Unknown(None) => "<untyped>",
        }
    }
}

impl fmt::Display for StreamEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a conversation update replaces the trunk or is merged onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    Append,
    Replace,
}

impl UpdateMode {
    pub fn is_replace(self) -> bool {
        matches!(self, Self::Replace)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Processing,
    Success,
}

impl ToolStatus {
    fn from_value(value: &Value) -> Self {
        match value.get("status").and_then(Value::as_str) {
            Some("success") => Self::Success,
            _ => Self::Processing,
        }
    }
}

/// A sub-agent or tool invocation in progress or finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    #[serde(default)]
    pub namespace: Vec<String>,
    /// Graph node that produced the event.
    pub node: Option<String>,
    pub tool_name: Option<String>,
    pub status: ToolStatus,
    pub content: Option<Value>,
    /// The payload the event was decoded from.
    pub payload: Value,
}

impl ToolEvent {
    /// Build from one `dataMap` entry of a `[namespace, dataMap]` tuple.
    pub fn from_node(namespace: Vec<String>, node: &str, value: &Value) -> Self {
        Self {
            namespace,
            node: Some(node.to_string()),
            tool_name: tool_name_of(value).or_else(|| Some(node.to_string())),
            status: ToolStatus::from_value(value),
            content: value.get("content").cloned(),
            payload: value.clone(),
        }
    }

    /// Build from a standalone tool event object (the `tool_events` list).
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        Some(Self {
            namespace: object.get("namespace").map(string_list).unwrap_or_default(),
            node: object
                .get("node")
                .and_then(Value::as_str)
                .map(str::to_string),
            tool_name: tool_name_of(value),
            status: ToolStatus::from_value(value),
            content: object.get("content").cloned(),
            payload: value.clone(),
        })
    }

    /// Build from one entry of a `tool_calls` list.
    pub fn from_tool_call(call: &Value) -> Self {
        let function = call.get("function");
        let tool_name = call
            .get("name")
            .or_else(|| function.and_then(|f| f.get("name")))
            .and_then(Value::as_str)
            .map(str::to_string);
        let arguments = call
            .get("args")
            .or_else(|| function.and_then(|f| f.get("arguments")))
            .cloned();

        Self {
            namespace: Vec::new(),
            node: None,
            tool_name,
            status: ToolStatus::Processing,
            content: arguments,
            payload: call.clone(),
        }
    }

    /// Identity used to fold repeated updates about the same invocation.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.namespace.join(":"),
            self.node.as_deref().unwrap_or_default(),
            self.tool_name.as_deref().unwrap_or_default()
        )
    }
}

fn tool_name_of(value: &Value) -> Option<String> {
    value
        .get("tool_name")
        .or_else(|| value.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Accepts `["a", "b"]` or `"a"`.
pub(crate) fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub args: Value,
}

/// A human-in-the-loop approval request embedded in the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptMessage {
    pub id: String,
    pub action: ActionRequest,
    /// Namespace of the interrupted checkpoint.
    pub checkpoint_ns: Option<String>,
    pub description: Option<String>,
    /// Allowed responses and similar UI hints, passed through untouched.
    pub config: Option<Value>,
    /// Text to show in place of a message.
    pub content: String,
}

impl InterruptMessage {
    /// Build from the value under the `__interrupt__` key. `None` when it holds
    /// no entry.
    pub fn from_marker(marker: &Value) -> Option<Self> {
        let entry = match marker {
            Value::Array(entries) => entries.first()?,
            Value::Object(_) => marker,
            _ => return None,
        };

        let checkpoint_ns = entry
            .get("ns")
            .map(string_list)
            .and_then(|ns| ns.into_iter().next());

        let value = match entry.get("value") {
            Some(Value::Array(values)) => values.first().cloned().unwrap_or(Value::Null),
            Some(value) => value.clone(),
            None => Value::Null,
        };

        let action = match value.get("action_request") {
            Some(request) => ActionRequest {
                action: request
                    .get("action")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                args: request.get("args").cloned().unwrap_or(Value::Null),
            },
            None => ActionRequest {
                action: value
                    .get("action")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                args: value.clone(),
            },
        };

        let description = value
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| value.as_str().map(str::to_string));

        let content = match (&description, action.action.is_empty()) {
            (Some(description), _) => description.clone(),
            (None, false) => format!("Approval required: {}", action.action),
            (None, true) => "Approval required".to_string(),
        };

        Some(Self {
            id: Uuid::new_v4().to_string(),
            action,
            checkpoint_ns,
            description,
            config: value.get("config").cloned(),
            content,
        })
    }
}

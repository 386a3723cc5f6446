//! ChatMessage - One turn in a conversation
//!
//! Roles are a closed sum type so every consumer has to handle tool turns
//! explicitly instead of falling through a string match.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single tool invocation requested by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Who authored a turn, plus the structured payload tool turns carry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    /// Assistant turn that asks for one or more tools to run.
    ToolCall { calls: Vec<ToolInvocation> },
    /// The result of a tool run.
    ToolResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResponse { .. } => "tool_response",
        }
    }
}

/// One turn in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    #[serde(flatten)]
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn new(id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
        }
    }

    /// Create a user message with a freshly generated id
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(generate_id(), MessageRole::User, content)
    }

    /// Create an assistant message with a freshly generated id
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(generate_id(), MessageRole::Assistant, content)
    }

    pub fn is_user(&self) -> bool {
        matches!(self.role, MessageRole::User)
    }

    /// True for every turn authored by the model, including tool requests.
    pub fn is_assistant(&self) -> bool {
        matches!(self.role, MessageRole::Assistant | MessageRole::ToolCall { .. })
    }

    pub fn is_tool(&self) -> bool {
        matches!(
            self.role,
            MessageRole::ToolCall { .. } | MessageRole::ToolResponse { .. }
        )
    }

    /// Copy of this message with different text, keeping id and role.
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            id: self.id.clone(),
            role: self.role.clone(),
            content: content.into(),
        }
    }
}

/// Generate a unique message id.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

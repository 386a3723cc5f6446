//! Message module - Conversation turn types
//!
//! Shared message types used by the dispatcher, the branch engine and the session.

mod chat;

pub use chat::{generate_id, ChatMessage, MessageRole, ToolInvocation};

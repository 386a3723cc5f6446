//! chat_core - Core types and configuration for the graph chat client
//!
//! This crate provides the foundational types used across all chat-related crates:
//! - `message` - ChatMessage, MessageRole, ToolInvocation
//! - `config` - Config loaded from file and environment
//! - `paths` - Location of the per-user config directory

pub mod config;
pub mod message;
pub mod paths;

// Re-export commonly used types
pub use config::{Config, ProxyAuth};
pub use message::{ChatMessage, MessageRole, ToolInvocation};

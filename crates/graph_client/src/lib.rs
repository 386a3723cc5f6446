//! graph_client - Streaming client for a remote graph-execution service
//!
//! - `sse` - incremental Server-Sent-Events framing
//! - `protocol` - typed events and message decoding
//! - `handler` - the `StreamHandler` callback seam
//! - `dispatcher` - routes frames to a handler, drives a body stream
//! - `client` - HTTP run requests

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod sse;

pub use client::{GraphClient, ResumeDecision, RunRequest, StaticToken, TokenProvider};
pub use dispatcher::{FramingMode, StreamDispatcher, StreamOutcome};
pub use error::ClientError;
pub use handler::{StreamCallbacks, StreamHandler};
pub use protocol::{InterruptMessage, StreamEventKind, ToolEvent, ToolStatus, UpdateMode};
pub use sse::{EventParser, SseFrame};

//! Routes parsed stream frames to a [`StreamHandler`].

use std::pin::pin;

use anyhow::Result;
use bytes::Bytes;
use chat_core::{ChatMessage, Config};
use futures_util::{Stream, StreamExt};
use log::{debug, error, warn};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::handler::StreamHandler;
use crate::protocol::{
    decode_message, decode_messages, error_message, interrupt_marker, partial_tool_events,
    tool_calls_of, update_messages, InterruptMessage, StreamEventKind, ToolEvent, UpdateMode,
};
use crate::sse::{EventParser, SseFrame};

/// How a `data:` block without an `event:` line is attributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FramingMode {
    /// Inherit the type of an immediately preceding type-only block.
    #[default]
    Lenient,
    /// Skip an untyped block that follows a type-only block.
    Strict,
}

/// How a dispatch loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
    /// Transport failure; the message was already passed to `on_error`.
    Failed(String),
}

#[derive(Debug, Default)]
pub struct StreamDispatcher {
    parser: EventParser,
    router: Router,
}

#[derive(Debug, Default)]
struct Router {
    framing: FramingMode,
    last_event_kind: Option<StreamEventKind>,
}

impl StreamDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_framing(framing: FramingMode) -> Self {
        Self {
            parser: EventParser::new(),
            router: Router {
                framing,
                last_event_kind: None,
            },
        }
    }

    pub fn from_config(config: &Config) -> Self {
        if config.strict_framing {
            Self::with_framing(FramingMode::Strict)
        } else {
            Self::with_framing(FramingMode::Lenient)
        }
    }

    pub fn framing(&self) -> FramingMode {
        self.router.framing
    }

    /// Parse one chunk and dispatch every event it completes, in order.
    pub fn feed<H>(&mut self, chunk: &[u8], handler: &mut H)
    where
        H: StreamHandler + ?Sized,
    {
        let Self { parser, router } = self;
        parser.feed(chunk, |frame| router.dispatch_frame(frame, handler));
    }

    /// Drive a byte stream to its end, or until `cancel` fires.
    pub async fn run<S, E, H>(
        &mut self,
        stream: S,
        handler: &mut H,
        cancel: &CancellationToken,
    ) -> StreamOutcome
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: std::fmt::Display,
        H: StreamHandler + ?Sized,
    {
        handler.on_set_loading(true);
        let mut stream = pin!(stream);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Stream cancelled");
                    break StreamOutcome::Cancelled;
                }
                next = stream.next() => match next {
                    Some(Ok(chunk)) => self.feed(&chunk, handler),
                    Some(Err(err)) => {
                        let message = format!("Failed to read stream: {}", err);
                        error!("{}", message);
                        deliver("on_error", handler.on_error(message.clone()));
                        break StreamOutcome::Failed(message);
                    }
                    None => break StreamOutcome::Completed,
                },
            }
        };

        if self.parser.pending() {
            debug!("Dropping incomplete event at end of stream");
        }
        self.reset();
        handler.on_set_loading(false);
        outcome
    }

    /// [`Self::run`] over a response body. A non-success status is reported
    /// once and nothing is read.
    pub async fn dispatch_response<H>(
        &mut self,
        response: reqwest::Response,
        handler: &mut H,
        cancel: &CancellationToken,
    ) -> StreamOutcome
    where
        H: StreamHandler + ?Sized,
    {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.is_empty() {
                format!("Run request failed with status {}", status)
            } else {
                format!("Run request failed with status {}: {}", status, body)
            };
            error!("{}", message);
            deliver("on_error", handler.on_error(message.clone()));
            handler.on_set_loading(false);
            return StreamOutcome::Failed(message);
        }

        self.run(response.bytes_stream(), handler, cancel).await
    }

    /// Drop buffered bytes and any remembered event type.
    pub fn reset(&mut self) {
        self.parser.reset();
        self.router.last_event_kind = None;
    }
}

impl Router {
    fn dispatch_frame<H>(&mut self, frame: SseFrame, handler: &mut H)
    where
        H: StreamHandler + ?Sized,
    {
        let kind = match frame.event.as_deref() {
            Some(tag) if frame.data.is_empty() => {
                self.last_event_kind = Some(StreamEventKind::parse(tag));
                return;
            }
            Some(tag) => {
                self.last_event_kind = None;
                StreamEventKind::parse(tag)
            }
            None => match (self.last_event_kind.clone(), self.framing) {
                (Some(kind), FramingMode::Lenient) => kind,
                (Some(kind), FramingMode::Strict) => {
                    warn!("Skipping untyped data after type-only `{}` event", kind);
                    self.last_event_kind = None;
                    return;
                }
                (None, _) => StreamEventKind::Unknown(None),
            },
        };

        let payload: Value = match serde_json::from_str(&frame.data) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Skipping malformed `{}` payload: {}", kind, err);
                return;
            }
        };
        // an inherited type is spent only once its payload decodes
        self.last_event_kind = None;

        dispatch_event(&kind, &payload, handler);
    }
}

/// Route one decoded payload.
pub fn dispatch_event<H>(kind: &StreamEventKind, payload: &Value, handler: &mut H)
where
    H: StreamHandler + ?Sized,
{
    if let Some(marker) = interrupt_marker(payload) {
        match InterruptMessage::from_marker(marker) {
            Some(interrupt) => {
                debug!("Interrupt `{}` in `{}` event", interrupt.action.action, kind);
                deliver("on_interrupt", handler.on_interrupt(interrupt));
            }
            None => debug!("Ignoring empty interrupt marker in `{}` event", kind),
        }
        return;
    }

    match kind {
        StreamEventKind::Metadata => debug!("Message metadata: {}", payload),
        StreamEventKind::Partial => dispatch_partial(payload, handler),
        StreamEventKind::Updates => match update_messages(payload) {
            Some(messages) => apply_update(handler, decode_messages(messages), UpdateMode::Append),
            None => debug!("`updates` event without messages"),
        },
        StreamEventKind::Values => {
            match payload.get("messages").and_then(Value::as_array) {
                Some(messages) => {
                    apply_update(handler, decode_messages(messages), UpdateMode::Replace)
                }
                None => debug!("`values` event without messages"),
            }
            if let Some(raw) = payload.get("tool_events").and_then(Value::as_array) {
                let events: Vec<ToolEvent> = raw.iter().filter_map(ToolEvent::from_value).collect();
                if !events.is_empty() {
                    deliver("on_tool_event", handler.on_tool_event(events));
                }
            }
        }
        StreamEventKind::Error => {
            let message = error_message(payload);
            warn!("Upstream error: {}", message);
            deliver("on_error", handler.on_error(message));
        }
        StreamEventKind::Complete => debug!("Message complete"),
        StreamEventKind::Unknown(_) => dispatch_unknown(kind, payload, handler),
    }
}

fn dispatch_partial<H>(payload: &Value, handler: &mut H)
where
    H: StreamHandler + ?Sized,
{
    if let Some(events) = partial_tool_events(payload) {
        deliver("on_tool_event", handler.on_tool_event(events));
        return;
    }

    let first = payload
        .as_array()
        .and_then(|items| items.first())
        .filter(|first| first.is_object());
    match first.and_then(decode_message) {
        Some(message) => {
            if deliver("on_message", handler.on_message(message)) {
                after_update(handler);
            }
        }
        None => debug!("Unrecognized `messages/partial` payload"),
    }
}

fn dispatch_unknown<H>(kind: &StreamEventKind, payload: &Value, handler: &mut H)
where
    H: StreamHandler + ?Sized,
{
    if let Some(calls) = tool_calls_of(payload) {
        let events = calls.iter().map(ToolEvent::from_tool_call).collect();
        deliver("on_tool_event", handler.on_tool_event(events));
        return;
    }

    if let Some(items) = payload.as_array() {
        if items.first().is_some_and(|first| first.get("content").is_some()) {
            apply_update(handler, decode_messages(items), UpdateMode::Append);
            return;
        }
    }

    if let Some(messages) = payload.get("messages").and_then(Value::as_array) {
        apply_update(handler, decode_messages(messages), UpdateMode::Append);
        return;
    }

    debug!("Unhandled `{}` event: {}", kind, payload);
}

fn apply_update<H>(handler: &mut H, messages: Vec<ChatMessage>, mode: UpdateMode)
where
    H: StreamHandler + ?Sized,
{
    if deliver("on_update", handler.on_update(messages, mode)) {
        after_update(handler);
    }
}

fn after_update<H>(handler: &mut H)
where
    H: StreamHandler + ?Sized,
{
    handler.on_scroll_down();
    handler.on_set_loading(false);
}

/// Log a failed callback. Returns whether it succeeded.
fn deliver(callback: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            error!("{} callback failed: {:#}", callback, err);
            false
        }
    }
}

//! Callback seam between the dispatcher and whoever owns the conversation.

use anyhow::Result;
use chat_core::ChatMessage;

use crate::protocol::{InterruptMessage, ToolEvent, UpdateMode};

/// Receiver of dispatched stream events.
///
/// Every method has a no-op default, so implementors only override what they
/// consume. An `Err` from a fallible callback is logged by the dispatcher and
/// the stream keeps going.
pub trait StreamHandler {
    /// A single partial message; merge it by id.
    fn on_message(&mut self, _message: ChatMessage) -> Result<()> {
        Ok(())
    }

    fn on_tool_event(&mut self, _events: Vec<ToolEvent>) -> Result<()> {
        Ok(())
    }

    fn on_update(&mut self, _messages: Vec<ChatMessage>, _mode: UpdateMode) -> Result<()> {
        Ok(())
    }

    fn on_error(&mut self, _message: String) -> Result<()> {
        Ok(())
    }

    fn on_interrupt(&mut self, _interrupt: InterruptMessage) -> Result<()> {
        Ok(())
    }

    fn on_scroll_down(&mut self) {}

    fn on_set_loading(&mut self, _loading: bool) {}
}

impl<H: StreamHandler + ?Sized> StreamHandler for &mut H {
    fn on_message(&mut self, message: ChatMessage) -> Result<()> {
        (**self).on_message(message)
    }

    fn on_tool_event(&mut self, events: Vec<ToolEvent>) -> Result<()> {
        (**self).on_tool_event(events)
    }

    fn on_update(&mut self, messages: Vec<ChatMessage>, mode: UpdateMode) -> Result<()> {
        (**self).on_update(messages, mode)
    }

    fn on_error(&mut self, message: String) -> Result<()> {
        (**self).on_error(message)
    }

    fn on_interrupt(&mut self, interrupt: InterruptMessage) -> Result<()> {
        (**self).on_interrupt(interrupt)
    }

    fn on_scroll_down(&mut self) {
        (**self).on_scroll_down()
    }

    fn on_set_loading(&mut self, loading: bool) {
        (**self).on_set_loading(loading)
    }
}

type Callback<T> = Box<dyn FnMut(T) -> Result<()> + Send>;

/// Closure-based [`StreamHandler`]; unset callbacks are ignored.
#[derive(Default)]
pub struct StreamCallbacks {
    message: Option<Callback<ChatMessage>>,
    tool_event: Option<Callback<Vec<ToolEvent>>>,
    update: Option<Box<dyn FnMut(Vec<ChatMessage>, UpdateMode) -> Result<()> + Send>>,
    error: Option<Callback<String>>,
    interrupt: Option<Callback<InterruptMessage>>,
    scroll_down: Option<Box<dyn FnMut() + Send>>,
    set_loading: Option<Box<dyn FnMut(bool) + Send>>,
}

impl StreamCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(
        mut self,
        f: impl FnMut(ChatMessage) -> Result<()> + Send + 'static,
    ) -> Self {
        self.message = Some(Box::new(f));
        self
    }

    pub fn with_tool_event(
        mut self,
        f: impl FnMut(Vec<ToolEvent>) -> Result<()> + Send + 'static,
    ) -> Self {
        self.tool_event = Some(Box::new(f));
        self
    }

    pub fn with_update(
        mut self,
        f: impl FnMut(Vec<ChatMessage>, UpdateMode) -> Result<()> + Send + 'static,
    ) -> Self {
        self.update = Some(Box::new(f));
        self
    }

    pub fn with_error(mut self, f: impl FnMut(String) -> Result<()> + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn with_interrupt(
        mut self,
        f: impl FnMut(InterruptMessage) -> Result<()> + Send + 'static,
    ) -> Self {
        self.interrupt = Some(Box::new(f));
        self
    }

    pub fn with_scroll_down(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.scroll_down = Some(Box::new(f));
        self
    }

    pub fn with_set_loading(mut self, f: impl FnMut(bool) + Send + 'static) -> Self {
        self.set_loading = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for StreamCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCallbacks")
            .field("message", &self.message.is_some())
            .field("tool_event", &self.tool_event.is_some())
            .field("update", &self.update.is_some())
            .field("error", &self.error.is_some())
            .field("interrupt", &self.interrupt.is_some())
            .finish_non_exhaustive()
    }
}

impl StreamHandler for StreamCallbacks {
    fn on_message(&mut self, message: ChatMessage) -> Result<()> {
        match self.message.as_mut() {
            Some(f) => f(message),
            None => Ok(()),
        }
    }

    fn on_tool_event(&mut self, events: Vec<ToolEvent>) -> Result<()> {
        match self.tool_event.as_mut() {
            Some(f) => f(events),
            None => Ok(()),
        }
    }

    fn on_update(&mut self, messages: Vec<ChatMessage>, mode: UpdateMode) -> Result<()> {
        match self.update.as_mut() {
            Some(f) => f(messages, mode),
            None => Ok(()),
        }
    }

    fn on_error(&mut self, message: String) -> Result<()> {
        match self.error.as_mut() {
            Some(f) => f(message),
            None => Ok(()),
        }
    }

    fn on_interrupt(&mut self, interrupt: InterruptMessage) -> Result<()> {
        match self.interrupt.as_mut() {
            Some(f) => f(interrupt),
            None => Ok(()),
        }
    }

    fn on_scroll_down(&mut self) {
        if let Some(f) = self.scroll_down.as_mut() {
            f();
        }
    }

    fn on_set_loading(&mut self, loading: bool) {
        if let Some(f) = self.set_loading.as_mut() {
            f(loading);
        }
    }
}

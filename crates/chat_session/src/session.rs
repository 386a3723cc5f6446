//! ChatSession - One conversation wired from the run stream into branch state
//!
//! The session is the `StreamHandler` for its own runs: authoritative updates
//! replace the trunk, partial and append updates merge into it, and an
//! edit/regenerate in flight is completed by branching the reply once the new
//! one arrives.

use anyhow::Result as AnyResult;
use chat_core::ChatMessage;
use chat_state::{BranchDirection, BranchEngine, BranchInfo, MessageMetadata};
use graph_client::{
    GraphClient, InterruptMessage, ResumeDecision, RunRequest, StreamHandler, StreamOutcome,
    ToolEvent, UpdateMode,
};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SessionError};

/// A branch operation waiting for the run that answers it.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Continuation {
    /// User turn at `index` was edited; the reply lands at `index + 1`.
    Edit {
        index: usize,
        previous_reply: Option<PreviousReply>,
    },
    /// Assistant turn at `index` is being produced again.
    Regenerate {
        index: usize,
        previous_reply: PreviousReply,
    },
}

/// The reply a continuation replaces. A thread run first echoes its stored
/// state, so a turn still matching this is not the answer yet.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PreviousReply {
    id: String,
    content: String,
}

impl PreviousReply {
    fn of(message: &ChatMessage) -> Self {
        Self {
            id: message.id.clone(),
            content: message.content.clone(),
        }
    }

    fn is_replaced_by(&self, message: &ChatMessage) -> bool {
        message.id != self.id || message.content != self.content
    }
}

#[derive(Debug, Default)]
pub struct ChatSession {
    engine: BranchEngine,
    tool_events: Vec<ToolEvent>,
    pending_interrupt: Option<InterruptMessage>,
    loading: bool,
    last_error: Option<String>,
    thread_id: Option<String>,
    continuation: Option<Continuation>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session whose runs execute inside a server-side thread.
    pub fn with_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            ..Default::default()
        }
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn set_thread_id(&mut self, thread_id: Option<String>) {
        self.thread_id = thread_id;
    }

    pub fn engine(&self) -> &BranchEngine {
        &self.engine
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn pending_interrupt(&self) -> Option<&InterruptMessage> {
        self.pending_interrupt.as_ref()
    }

    /// Tool activity seen so far, one entry per invocation.
    pub fn tool_events(&self) -> &[ToolEvent] {
        &self.tool_events
    }

    pub fn current_conversation(&self) -> Vec<ChatMessage> {
        self.engine.current_conversation()
    }

    pub fn message_metadata(&self, message: &ChatMessage) -> Option<MessageMetadata> {
        self.engine.message_metadata(message)
    }

    pub fn branch_info(&self, message_id: &str) -> Option<BranchInfo> {
        self.engine.branch_info(message_id)
    }

    pub fn switch_branch(&mut self, index: usize, direction: BranchDirection) -> bool {
        self.engine.switch_branch(index, direction)
    }

    /// Forget the conversation and start over without a thread.
    pub fn new_chat(&mut self) {
        info!("Starting new chat");
        self.engine.clear();
        self.tool_events.clear();
        self.pending_interrupt = None;
        self.last_error = None;
        self.thread_id = None;
        self.continuation = None;
    }

    /// Append a user turn and build the run that answers it.
    pub fn prepare_send(&mut self, content: impl Into<String>) -> Result<RunRequest> {
        let message = ChatMessage::user(content);
        debug!("Sending message {}", message.id);

        self.engine.merge_into_base([message]);
        self.begin_run(None);
        Ok(self.request_for(self.current_conversation()))
    }

    /// Branch the user turn at `index` to `content` and build the run that
    /// answers the edited question.
    pub fn prepare_edit(&mut self, index: usize, content: impl Into<String>) -> Result<RunRequest> {
        let view = self.current_conversation();
        let message = view.get(index).ok_or(SessionError::InvalidIndex(index))?;
        if !message.is_user() {
            return Err(SessionError::NotUserMessage(index));
        }

        let base = self.engine.base_conversation();
        let original = base[index].content.clone();
        let previous_reply = base
            .get(index + 1)
            .filter(|next| next.is_assistant())
            .map(PreviousReply::of);

        let content = content.into();
        if !self
            .engine
            .create_branch_at_index(index, original, content, false)
        {
            return Err(SessionError::InvalidIndex(index));
        }
        debug!("Edited message at {}", index);

        self.begin_run(Some(Continuation::Edit {
            index,
            previous_reply,
        }));
        let mut history = self.current_conversation();
        history.truncate(index + 1);
        Ok(self.request_for(history))
    }

    /// Build the run that produces a new reply for the assistant turn at
    /// `index`.
    pub fn prepare_regenerate(&mut self, index: usize) -> Result<RunRequest> {
        let view = self.current_conversation();
        let message = view.get(index).ok_or(SessionError::InvalidIndex(index))?;
        if !message.is_assistant() {
            return Err(SessionError::NotAssistantMessage(index));
        }
        debug!("Regenerating message at {}", index);

        self.begin_run(Some(Continuation::Regenerate {
            index,
            previous_reply: PreviousReply::of(message),
        }));
        let mut history = view;
        history.truncate(index);
        Ok(self.request_for(history))
    }

    /// Build the run that answers the pending interrupt.
    pub fn prepare_resume(&mut self, decision: ResumeDecision) -> Result<RunRequest> {
        let thread_id = self.thread_id.clone().ok_or(SessionError::NoThread)?;
        let interrupt = self
            .pending_interrupt
            .take()
            .ok_or(SessionError::NoPendingInterrupt)?;
        debug!(
            "Resuming interrupt {} ({}) with {:?}",
            interrupt.id, interrupt.action.action, decision
        );

        self.begin_run(None);
        Ok(RunRequest::resume(decision).in_thread(thread_id))
    }

    /// Stream `request` into this session.
    pub async fn run(
        &mut self,
        client: &GraphClient,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        let outcome = client.stream_run(request, self, cancel).await;
        if let Some(continuation) = self.continuation.take() {
            debug!("Run ended before {:?} was answered", continuation);
        }
        outcome
    }

    pub async fn send_message(
        &mut self,
        client: &GraphClient,
        content: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let request = self.prepare_send(content)?;
        Ok(self.run(client, &request, cancel).await)
    }

    pub async fn edit_message(
        &mut self,
        client: &GraphClient,
        index: usize,
        content: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let request = self.prepare_edit(index, content)?;
        Ok(self.run(client, &request, cancel).await)
    }

    pub async fn regenerate(
        &mut self,
        client: &GraphClient,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let request = self.prepare_regenerate(index)?;
        Ok(self.run(client, &request, cancel).await)
    }

    pub async fn resume(
        &mut self,
        client: &GraphClient,
        decision: ResumeDecision,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let request = self.prepare_resume(decision)?;
        Ok(self.run(client, &request, cancel).await)
    }

    fn begin_run(&mut self, continuation: Option<Continuation>) {
        self.last_error = None;
        self.pending_interrupt = None;
        self.continuation = continuation;
    }

    fn request_for(&self, history: Vec<ChatMessage>) -> RunRequest {
        let request = RunRequest::with_messages(&history);
        match &self.thread_id {
            Some(thread_id) => request.in_thread(thread_id.clone()),
            None => request,
        }
    }

    /// Branch the new reply against the old one once the trunk carries it.
    fn resolve_continuation(&mut self) {
        let Some(continuation) = self.continuation.clone() else {
            return;
        };

        let (index, previous) = match continuation {
            Continuation::Edit {
                index,
                previous_reply,
            } => (index + 1, previous_reply),
            Continuation::Regenerate {
                index,
                previous_reply,
            } => (index, Some(previous_reply)),
        };

        let Some(reply) = self
            .engine
            .base_conversation()
            .get(index)
            .filter(|message| message.is_assistant())
            .filter(|message| previous.as_ref().map_or(true, |old| old.is_replaced_by(message)))
            .map(|message| message.content.clone())
        else {
            return;
        };

        self.continuation = None;
        match previous {
            Some(previous) => {
                self.engine
                    .create_branch_at_index(index, previous.content, reply, true);
            }
            None => debug!("Edited message had no reply to branch"),
        }
    }
}

impl StreamHandler for ChatSession {
    fn on_message(&mut self, message: ChatMessage) -> AnyResult<()> {
        self.engine.merge_into_base([message]);
        Ok(())
    }

    fn on_tool_event(&mut self, events: Vec<ToolEvent>) -> AnyResult<()> {
        for event in events {
            let key = event.key();
            match self.tool_events.iter_mut().find(|known| known.key() == key) {
                Some(known) => *known = event,
                None => self.tool_events.push(event),
            }
        }
        Ok(())
    }

    fn on_update(&mut self, messages: Vec<ChatMessage>, mode: UpdateMode) -> AnyResult<()> {
        match mode {
            UpdateMode::Replace => {
                self.engine.set_base_conversation(messages);
                self.resolve_continuation();
            }
            UpdateMode::Append => {
                self.engine.merge_into_base(messages);
            }
        }
        Ok(())
    }

    fn on_error(&mut self, message: String) -> AnyResult<()> {
        warn!("Run reported an error: {}", message);
        self.last_error = Some(message);
        Ok(())
    }

    fn on_interrupt(&mut self, interrupt: InterruptMessage) -> AnyResult<()> {
        info!("Run interrupted for approval of {}", interrupt.action.action);
        self.pending_interrupt = Some(interrupt);
        Ok(())
    }

    fn on_set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::MessageRole;
    use graph_client::StreamDispatcher;
    use serde_json::{json, Value};

    fn user(id: &str, content: &str) -> ChatMessage {
        ChatMessage::new(id, MessageRole::User, content)
    }

    fn ai(id: &str, content: &str) -> ChatMessage {
        ChatMessage::new(id, MessageRole::Assistant, content)
    }

    fn contents(view: &[ChatMessage]) -> Vec<String> {
        view.iter().map(|m| m.content.clone()).collect()
    }

    fn session_with(messages: Vec<ChatMessage>) -> ChatSession {
        let mut session = ChatSession::new();
        session
            .on_update(messages, UpdateMode::Replace)
            .unwrap();
        session
    }

    fn wire(message: &ChatMessage) -> Value {
        json!({
            "id": message.id,
            "type": if message.is_user() { "human" } else { "ai" },
            "content": message.content,
        })
    }

    /// Feed a `values` event carrying `messages` through a real dispatcher.
    fn stream_values(session: &mut ChatSession, messages: &[ChatMessage]) {
        let payload = json!({ "messages": messages.iter().map(wire).collect::<Vec<_>>() });
        let frame = format!("event: values\ndata: {}\n\n", payload);
        StreamDispatcher::new().feed(frame.as_bytes(), session);
    }

    fn four_turns() -> Vec<ChatMessage> {
        vec![
            user("u0", "user0"),
            ai("a1", "ai1"),
            user("u2", "user2"),
            ai("a3", "ai3"),
        ]
    }

    #[test]
    fn test_send_appends_and_requests_history() {
        let mut session = session_with(vec![user("u0", "hi"), ai("a1", "hello")]);

        let request = session.prepare_send("how are you").unwrap();
        let sent = &request.input.as_ref().unwrap()["messages"];
        assert_eq!(sent.as_array().unwrap().len(), 3);
        assert_eq!(sent[2]["content"], "how are you");
        assert_eq!(sent[2]["type"], "human");
        assert_eq!(request.thread_id, None);
        assert_eq!(session.current_conversation().len(), 3);
    }

    #[test]
    fn test_edit_branches_question_and_answer_together() {
        let mut session = session_with(four_turns());

        let request = session.prepare_edit(2, "user2 edited").unwrap();
        let sent = request.input.as_ref().unwrap()["messages"].as_array().unwrap().clone();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2]["content"], "user2 edited");
        assert_eq!(
            contents(&session.current_conversation()),
            vec!["user0", "ai1", "user2 edited"]
        );

        let mut fresh = four_turns();
        fresh[2] = user("u2", "user2 edited");
        fresh[3] = ai("a3b", "ai3 for edit");
        stream_values(&mut session, &fresh);

        assert_eq!(
            contents(&session.current_conversation()),
            vec!["user0", "ai1", "user2 edited", "ai3 for edit"]
        );
        let reply_point = session.engine().branch_point(3).unwrap();
        assert_eq!(reply_point.linked_branch_index(), Some(2));

        assert!(session.switch_branch(2, BranchDirection::Prev));
        assert_eq!(
            contents(&session.current_conversation()),
            vec!["user0", "ai1", "user2", "ai3"]
        );

        assert!(session.switch_branch(3, BranchDirection::Next));
        assert_eq!(
            contents(&session.current_conversation()),
            vec!["user0", "ai1", "user2 edited", "ai3 for edit"]
        );
    }

    #[test]
    fn test_regenerate_records_previous_reply() {
        let mut session = session_with(four_turns());

        let request = session.prepare_regenerate(3).unwrap();
        let sent = request.input.as_ref().unwrap()["messages"].as_array().unwrap().len();
        assert_eq!(sent, 3);

        let mut fresh = four_turns();
        fresh[3] = ai("a3b", "ai3 again");
        stream_values(&mut session, &fresh);

        let info = session.branch_info("a3b").unwrap();
        assert_eq!(info.total, 2);
        assert_eq!(info.current, 2);
        assert_eq!(session.current_conversation()[3].content, "ai3 again");

        assert!(session.switch_branch(3, BranchDirection::Prev));
        assert_eq!(session.current_conversation()[3].content, "ai3");
    }

    #[test]
    fn test_continuation_waits_for_reply() {
        let mut session = session_with(four_turns());
        session.prepare_edit(2, "user2 edited").unwrap();

        // first values event only echoes the question
        let mut partial = four_turns();
        partial.truncate(2);
        partial.push(user("u2", "user2 edited"));
        stream_values(&mut session, &partial);
        assert!(session.engine().branch_point(3).is_none());

        partial.push(ai("a3b", "answer"));
        stream_values(&mut session, &partial);
        assert!(session.engine().branch_point(3).is_some());
    }

    #[test]
    fn test_edit_and_regenerate_validate_index() {
        let mut session = session_with(four_turns());

        assert_eq!(session.prepare_edit(9, "x").unwrap_err(), SessionError::InvalidIndex(9));
        assert_eq!(session.prepare_edit(1, "x").unwrap_err(), SessionError::NotUserMessage(1));
        assert_eq!(
            session.prepare_regenerate(0).unwrap_err(),
            SessionError::NotAssistantMessage(0)
        );
    }

    #[test]
    fn test_regenerate_skips_thread_state_echo() {
        let mut session = ChatSession::with_thread("t-1");
        session
            .on_update(vec![user("u0", "user0"), ai("a1", "ai1")], UpdateMode::Replace)
            .unwrap();
        session.prepare_regenerate(1).unwrap();

        // the thread's stored state comes back before the new reply
        stream_values(&mut session, &[user("u0", "user0"), ai("a1", "ai1")]);
        assert!(session.engine().branch_point(1).is_none());

        stream_values(&mut session, &[user("u0", "user0"), ai("a1b", "ai1 new")]);
        assert_eq!(
            contents(&session.current_conversation()),
            vec!["user0", "ai1 new"]
        );
        let point = session.engine().branch_point(1).unwrap();
        let branches: Vec<&str> = point.branches().iter().map(|b| b.content.as_str()).collect();
        assert_eq!(branches, vec!["ai1", "ai1 new"]);
    }

    #[test]
    fn test_edit_skips_stale_reply_echo() {
        let mut session = ChatSession::with_thread("t-1");
        session.on_update(four_turns(), UpdateMode::Replace).unwrap();
        session.prepare_edit(2, "user2 edited").unwrap();

        stream_values(&mut session, &four_turns());
        assert!(session.engine().branch_point(3).is_none());

        let mut fresh = four_turns();
        fresh[2] = user("u2", "user2 edited");
        fresh[3] = ai("a3b", "ai3 for edit");
        stream_values(&mut session, &fresh);
        assert_eq!(
            contents(&session.current_conversation()),
            vec!["user0", "ai1", "user2 edited", "ai3 for edit"]
        );
    }

    #[test]
    fn test_partial_messages_merge_by_id() {
        let mut session = session_with(vec![user("u0", "hi")]);

        session.on_message(ai("a1", "hel")).unwrap();
        session.on_message(ai("a1", "hello")).unwrap();
        session
            .on_update(vec![ai("a1", "hello"), ai("a2", "more")], UpdateMode::Append)
            .unwrap();

        assert_eq!(
            contents(&session.current_conversation()),
            vec!["hi", "hello", "more"]
        );
    }

    #[test]
    fn test_resume_requires_thread_and_interrupt() {
        let mut session = ChatSession::new();
        assert_eq!(
            session.prepare_resume(ResumeDecision::Accept).unwrap_err(),
            SessionError::NoThread
        );

        let mut session = ChatSession::with_thread("t-1");
        assert_eq!(
            session.prepare_resume(ResumeDecision::Accept).unwrap_err(),
            SessionError::NoPendingInterrupt
        );

        let frame = "event: updates\ndata: {\"__interrupt__\":[{\"value\":{\"action_request\":{\"action\":\"send_email\"}}}]}\n\n";
        StreamDispatcher::new().feed(frame.as_bytes(), &mut session);
        assert_eq!(
            session.pending_interrupt().unwrap().action.action,
            "send_email"
        );

        let request = session.prepare_resume(ResumeDecision::Ignore).unwrap();
        assert_eq!(request.thread_id.as_deref(), Some("t-1"));
        assert_eq!(request.command.unwrap()["resume"][0]["type"], "ignore");
        assert!(session.pending_interrupt().is_none());
    }

    #[test]
    fn test_tool_events_upsert_by_key() {
        let mut session = ChatSession::new();
        let frames = concat!(
            "event: messages/partial\ndata: [[\"agent:1\"],{\"tools\":{\"tool_name\":\"search\",\"status\":\"running\"}}]\n\n",
            "event: messages/partial\ndata: [[\"agent:1\"],{\"tools\":{\"tool_name\":\"search\",\"status\":\"success\"}}]\n\n",
        );
        StreamDispatcher::new().feed(frames.as_bytes(), &mut session);

        assert_eq!(session.tool_events().len(), 1);
        assert_eq!(session.tool_events()[0].status, graph_client::ToolStatus::Success);
    }

    #[test]
    fn test_error_event_is_kept() {
        let mut session = ChatSession::new();
        StreamDispatcher::new().feed(
            b"event: error\ndata: {\"message\":\"quota exceeded\"}\n\n",
            &mut session,
        );
        assert_eq!(session.last_error(), Some("quota exceeded"));
    }

    #[test]
    fn test_new_chat_resets_everything() {
        let mut session = ChatSession::with_thread("t-1");
        session.on_update(four_turns(), UpdateMode::Replace).unwrap();
        session.prepare_edit(2, "edited").unwrap();
        session.on_error("boom".to_string()).unwrap();

        session.new_chat();

        assert!(session.current_conversation().is_empty());
        assert!(!session.engine().has_multiple_branches("u2"));
        assert_eq!(session.last_error(), None);
        assert_eq!(session.thread_id(), None);
    }

    #[test]
    fn test_metadata_reports_branches() {
        let mut session = session_with(four_turns());
        session.prepare_edit(0, "user0 edited").unwrap();

        let base = session.engine().base_conversation().to_vec();
        let metadata = session.message_metadata(&base[0]).unwrap();
        assert!(metadata.has_branches);
        assert_eq!(metadata.branch.unwrap().current, 2);
        assert!(!session.message_metadata(&base[1]).unwrap().has_branches);
    }
}

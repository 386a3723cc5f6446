use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("No message at index {0}")]
    InvalidIndex(usize),

    #[error("Message at index {0} is not a user message")]
    NotUserMessage(usize),

    #[error("Message at index {0} is not an assistant message")]
    NotAssistantMessage(usize),

    #[error("No interrupt is waiting for a decision")]
    NoPendingInterrupt,

    #[error("Resuming requires a thread id")]
    NoThread,
}

pub type Result<T> = std::result::Result<T, SessionError>;

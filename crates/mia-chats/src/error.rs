use mia_core::{ChatId, MessageId};
use mia_stream::{Role, StreamError};
use thiserror::Error;

/// Errors returned by store commands.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("chat not found, id: {0}")]
    ChatNotFound(ChatId),

    #[error("message not found, id: {0}")]
    MessageNotFound(MessageId),

    /// Only assistant replies can be regenerated.
    #[error("message is not assistant message, got={role}")]
    NotAssistantMessage { role: Role },

    #[error("message is either hidden or deleted: {0}")]
    MessageUnavailable(MessageId),

    /// Another session is still writing this message.
    #[error("message {0} is still streaming")]
    Busy(MessageId),

    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("profile already exists: {0}")]
    DuplicateProfile(String),

    /// The streaming session failed; the partial reply stays in the chat.
    #[error("stream failed: {0}")]
    Stream(#[from] StreamError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

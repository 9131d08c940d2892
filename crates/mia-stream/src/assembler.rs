//! Incremental assembly of one streamed reply.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use mia_core::MessageId;

use crate::error::StreamError;
use crate::wire::{DeltaEvent, FinishReason, Role};

/// Lifecycle of a streamed message.
///
/// `AwaitingFirstToken → Streaming → Complete`, or any state `→ Failed`.
/// `Complete` and `Failed` are terminal for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    AwaitingFirstToken,
    Streaming,
    Complete,
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Complete | MessageStatus::Failed)
    }

    /// Still being written by a session.
    pub fn is_loading(self) -> bool {
        matches!(
            self,
            MessageStatus::AwaitingFirstToken | MessageStatus::Streaming
        )
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MessageStatus::AwaitingFirstToken => "awaiting_first_token",
            MessageStatus::Streaming => "streaming",
            MessageStatus::Complete => "complete",
            MessageStatus::Failed => "failed",
        })
    }
}

/// The accumulation target of one streaming session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledMessage {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
    pub status: MessageStatus,
    /// Cause recorded by the failing session, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Last finish reason reported by the stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl AssembledMessage {
    /// A fresh, empty message waiting for its first token.
    pub fn new(id: MessageId, role: Role) -> Self {
        Self {
            id,
            role,
            text: String::new(),
            status: MessageStatus::AwaitingFirstToken,
            failure: None,
            finish_reason: None,
        }
    }
}

/// Sole writer of one [`AssembledMessage`] for the duration of a session.
///
/// Owning the message makes a second concurrent writer impossible.
#[derive(Debug)]
pub struct Assembler {
    message: AssembledMessage,
}

impl Assembler {
    /// Begin a session on `target`.
    ///
    /// Fresh and terminal messages are reset to an empty
    /// `AwaitingFirstToken` state (terminal ones are being regenerated).
    /// A message that is still `Streaming` belongs to another session.
    pub fn begin(mut target: AssembledMessage) -> Result<Self, StreamError> {
        if target.status == MessageStatus::Streaming {
            return Err(StreamError::InvalidState {
                found: target.status,
            });
        }
        target.text.clear();
        target.status = MessageStatus::AwaitingFirstToken;
        target.failure = None;
        target.finish_reason = None;
        debug!(message_id = %target.id, "assembly session started");
        Ok(Self { message: target })
    }

    pub fn message(&self) -> &AssembledMessage {
        &self.message
    }

    pub fn status(&self) -> MessageStatus {
        self.message.status
    }

    pub fn into_message(self) -> AssembledMessage {
        self.message
    }

    /// Fold `events` into the message in order. Returns whether anything
    /// was applied. No-op once the session is terminal.
    ///
    /// Only choice 0 is assembled. Role and finish reason never touch `text`.
    pub fn apply_events(&mut self, events: &[DeltaEvent]) -> bool {
        if self.message.status.is_terminal() {
            return false;
        }

        let mut applied = false;
        for event in events.iter().filter(|e| e.sequence_index == 0) {
            if self.message.status == MessageStatus::AwaitingFirstToken {
                self.message.status = MessageStatus::Streaming;
            }
            if let Some(content) = &event.content {
                self.message.text.push_str(content);
            }
            if event.finish_reason.is_some() {
                self.message.finish_reason = event.finish_reason;
            }
            applied = true;
        }
        applied
    }

    /// Successful end of stream. Idempotent; ignored after a failure.
    pub fn complete(&mut self) {
        if self.message.status.is_terminal() {
            return;
        }
        self.message.status = MessageStatus::Complete;
        debug!(
            message_id = %self.message.id,
            len = self.message.text.len(),
            "assembly complete"
        );
    }

    /// Fail the session, keeping any partial text. Idempotent; ignored
    /// once the session is already terminal.
    pub fn fail(&mut self, cause: impl Into<String>) {
        if self.message.status.is_terminal() {
            return;
        }
        let cause = cause.into();
        debug!(message_id = %self.message.id, %cause, "assembly failed");
        self.message.status = MessageStatus::Failed;
        self.message.failure = Some(cause);
    }
}

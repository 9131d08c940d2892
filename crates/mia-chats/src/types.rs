use serde::{Deserialize, Serialize};

use mia_core::types::{now_timestamp, Timestamp};
use mia_core::{ChatId, MessageId};
use mia_stream::{AssembledMessage, ChatCompletionMessage, MessageStatus, Role};

/// Persona a chat is held with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub name: String,
    pub desc: String,
}

impl Character {
    pub fn new(id: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            desc: desc.into(),
        }
    }

    /// The built-in default character.
    pub fn mia() -> Self {
        Self::new("a1", "Mia", "Mia is a cat girl")
    }
}

/// One message in a chat's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
    /// UI hint: hide the per-message action bar.
    pub actions_hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ChatMessage {
    /// A finished message (user input, seeded system prompts).
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            status: MessageStatus::Complete,
            created_at: now_timestamp(),
            hidden_at: None,
            deleted_at: None,
            actions_hidden: true,
            failure: None,
        }
    }

    /// An empty assistant reply about to be streamed.
    pub fn pending_reply() -> Self {
        Self {
            status: MessageStatus::AwaitingFirstToken,
            ..Self::new(Role::Assistant, "")
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status.is_loading()
    }

    /// Eligible as request history: finished, visible, not deleted.
    pub fn is_valid_history(&self) -> bool {
        self.status == MessageStatus::Complete
            && self.hidden_at.is_none()
            && self.deleted_at.is_none()
    }

    pub fn to_completion_message(&self) -> ChatCompletionMessage {
        ChatCompletionMessage::new(self.role, self.content.clone())
    }

    pub fn to_assembled(&self) -> AssembledMessage {
        AssembledMessage {
            id: self.id.clone(),
            role: self.role,
            text: self.content.clone(),
            status: self.status,
            failure: self.failure.clone(),
            finish_reason: None,
        }
    }

    /// Copy the streamed state of `snapshot` into this record.
    pub fn apply_snapshot(&mut self, snapshot: &AssembledMessage) {
        self.content.clone_from(&snapshot.text);
        self.status = snapshot.status;
        self.failure.clone_from(&snapshot.failure);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A conversation with one character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub name: String,
    pub character: Character,
    pub messages: Vec<ChatMessage>,
    /// Messages always sent with a request (e.g. a persona prompt).
    pub must_have_messages: Vec<ChatMessage>,
    pub total_usage: Usage,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

impl Chat {
    pub fn new(name: impl Into<String>, character: Character) -> Self {
        let now = now_timestamp();
        Self {
            id: ChatId::new(),
            name: name.into(),
            character,
            messages: Vec::new(),
            must_have_messages: Vec::new(),
            total_usage: Usage::default(),
            created_at: now.clone(),
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn message(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn message_mut(&mut self, id: &MessageId) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }

    pub fn touch(&mut self) {
        self.updated_at = now_timestamp();
    }

    /// Request history built from `messages`: must-have messages first,
    /// then every valid message in order.
    pub fn history<'a>(
        &self,
        messages: impl IntoIterator<Item = &'a ChatMessage>,
    ) -> Vec<ChatCompletionMessage> {
        let valid = messages
            .into_iter()
            .filter(|m| m.is_valid_history())
            .map(ChatMessage::to_completion_message);
        self.must_have_messages
            .iter()
            .map(ChatMessage::to_completion_message)
            .chain(valid)
            .collect()
    }
}

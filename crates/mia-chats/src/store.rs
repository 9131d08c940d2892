//! Conversation store: the single owner of chat state.
//!
//! All mutation goes through the command methods below. Streaming commands
//! write each snapshot into the store under a short synchronous lock, then
//! forward it to the caller's observer; no lock is held across an await.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use mia_core::types::now_timestamp;
use mia_core::{ChatId, MessageId};
use mia_stream::{
    run_session, AssembledMessage, ChatCompletionMessage, ChatCompletionRequest, MessageStatus,
    Role, SessionEnd, SessionReport, StreamObserver, Transport,
};

use crate::error::{Result, StoreError};
use crate::types::{Character, Chat, ChatMessage};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    Asc,
    #[default]
    Desc,
}

/// Parameters for [`ChatStore::list_chats`]. Defaults to newest first.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListChats {
    pub sort_by: SortBy,
    pub order: Order,
}

struct StoreState {
    chats: Vec<Chat>,
    characters: Vec<Character>,
    /// Used for naming new chats.
    chat_next_index: u32,
}

impl StoreState {
    fn live_chat_mut(&mut self, id: &ChatId) -> Result<&mut Chat> {
        self.chats
            .iter_mut()
            .find(|c| &c.id == id && c.deleted_at.is_none())
            .ok_or_else(|| StoreError::ChatNotFound(id.clone()))
    }
}

pub struct ChatStore {
    state: Mutex<StoreState>,
    transport: Arc<dyn Transport>,
    model: String,
    /// Messages currently being written by a session, with their cancel handles.
    in_flight: DashMap<MessageId, CancellationToken>,
}

/// Removes the in-flight entry when the session ends or its future is dropped.
struct InFlight<'a> {
    map: &'a DashMap<MessageId, CancellationToken>,
    id: MessageId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

impl ChatStore {
    pub fn new(transport: Arc<dyn Transport>, model: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(StoreState {
                chats: Vec::new(),
                characters: vec![Character::mia()],
                chat_next_index: 1,
            }),
            transport,
            model: model.into(),
            in_flight: DashMap::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn get_chat(&self, id: &ChatId) -> Option<Chat> {
        self.lock().chats.iter().find(|c| &c.id == id).cloned()
    }

    /// Live (not deleted) chats in the requested order.
    pub fn list_chats(&self, params: ListChats) -> Vec<Chat> {
        let mut chats: Vec<Chat> = self
            .lock()
            .chats
            .iter()
            .filter(|c| c.deleted_at.is_none())
            .cloned()
            .collect();

        chats.sort_by(|a, b| {
            let ord = match params.sort_by {
                SortBy::CreatedAt => a.created_at.cmp(&b.created_at),
                SortBy::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            };
            match params.order {
                Order::Asc => ord,
                Order::Desc => ord.reverse(),
            }
        });
        chats
    }

    /// Create a chat. Without a name it is called `Chat {n}`.
    #[instrument(skip(self, character), fields(character = %character.name))]
    pub fn create_chat(&self, name: Option<&str>, character: Character) -> Chat {
        let mut state = self.lock();
        let name = match name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => format!("Chat {}", state.chat_next_index),
        };
        let chat = Chat::new(name, character);
        state.chats.push(chat.clone());
        state.chat_next_index += 1;
        info!(chat_id = %chat.id, name = %chat.name, "chat created");
        chat
    }

    /// Rename a chat. An empty or absent name leaves it unchanged.
    #[instrument(skip(self), fields(chat_id = %id))]
    pub fn update_chat(&self, id: &ChatId, name: Option<&str>) -> Result<()> {
        let mut state = self.lock();
        let chat = state.live_chat_mut(id)?;
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            chat.name = name.to_string();
            chat.touch();
        }
        Ok(())
    }

    /// Soft delete: the chat disappears from listings but keeps its data.
    #[instrument(skip(self), fields(chat_id = %id))]
    pub fn delete_chat(&self, id: &ChatId) -> Result<()> {
        let mut state = self.lock();
        let chat = state.live_chat_mut(id)?;
        chat.touch();
        chat.deleted_at = Some(chat.updated_at.clone());
        Ok(())
    }

    /// Soft-delete one message. A message that is still streaming is `Busy`.
    #[instrument(skip(self), fields(chat_id = %chat_id, message_id = %message_id))]
    pub fn delete_message(&self, chat_id: &ChatId, message_id: &MessageId) -> Result<()> {
        let mut state = self.lock();
        let chat = state.live_chat_mut(chat_id)?;
        if self.in_flight.contains_key(message_id) {
            return Err(StoreError::Busy(message_id.clone()));
        }
        let message = chat
            .message_mut(message_id)
            .ok_or_else(|| StoreError::MessageNotFound(message_id.clone()))?;
        message.deleted_at = Some(now_timestamp());
        chat.touch();
        Ok(())
    }

    pub fn characters(&self) -> Vec<Character> {
        self.lock().characters.clone()
    }

    pub fn add_character(&self, character: Character) {
        self.lock().characters.push(character);
    }

    /// Any one of the known characters, picked uniformly.
    pub fn random_character(&self) -> Character {
        self.lock()
            .characters
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(Character::mia)
    }

    /// Whether the stored message is still awaiting or receiving tokens.
    /// An abandoned reply keeps reporting its last status.
    pub fn is_message_loading(&self, chat_id: &ChatId, message_id: &MessageId) -> bool {
        self.lock()
            .chats
            .iter()
            .find(|c| &c.id == chat_id)
            .and_then(|c| c.message(message_id))
            .is_some_and(ChatMessage::is_loading)
    }

    /// True while a session is writing `message_id`.
    pub fn is_streaming(&self, message_id: &MessageId) -> bool {
        self.in_flight.contains_key(message_id)
    }

    /// Abandon the session writing `message_id`. The message keeps
    /// whatever status it last reached. Returns false if none is running.
    pub fn cancel(&self, message_id: &MessageId) -> bool {
        match self.in_flight.get(message_id) {
            Some(token) => {
                debug!(%message_id, "cancelling streaming session");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn claim(&self, id: &MessageId) -> Result<(InFlight<'_>, CancellationToken)> {
        match self.in_flight.entry(id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Busy(id.clone())),
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                Ok((
                    InFlight {
                        map: &self.in_flight,
                        id: id.clone(),
                    },
                    token,
                ))
            }
        }
    }

    /// Append a user message plus an empty assistant reply, then stream
    /// the reply. History is the chat's valid messages and the new one.
    #[instrument(skip(self, content, observer), fields(chat_id = %chat_id))]
    pub async fn send_new_message_stream<O>(
        &self,
        chat_id: &ChatId,
        content: &str,
        observer: &mut O,
    ) -> Result<SessionReport>
    where
        O: StreamObserver + ?Sized,
    {
        let (target, history, guard, token) = {
            let mut state = self.lock();
            let chat = state.live_chat_mut(chat_id)?;

            let user = ChatMessage::new(Role::User, content);
            let mut history = chat.history(&chat.messages);
            history.push(user.to_completion_message());

            let reply = ChatMessage::pending_reply();
            let (guard, token) = self.claim(&reply.id)?;
            let target = reply.to_assembled();

            chat.messages.push(user);
            chat.messages.push(reply);
            chat.touch();
            (target, history, guard, token)
        };

        self.stream_into(chat_id, target, history, guard, token, observer)
            .await
    }

    /// Re-stream an existing assistant reply in place, using the valid
    /// messages before it as history.
    #[instrument(skip(self, observer), fields(chat_id = %chat_id, message_id = %message_id))]
    pub async fn regenerate_message_stream<O>(
        &self,
        chat_id: &ChatId,
        message_id: &MessageId,
        observer: &mut O,
    ) -> Result<SessionReport>
    where
        O: StreamObserver + ?Sized,
    {
        let (target, history, guard, token) = {
            let mut state = self.lock();
            let chat = state.live_chat_mut(chat_id)?;

            let index = chat
                .messages
                .iter()
                .position(|m| &m.id == message_id)
                .ok_or_else(|| StoreError::MessageNotFound(message_id.clone()))?;

            let message = &chat.messages[index];
            if message.role != Role::Assistant {
                return Err(StoreError::NotAssistantMessage { role: message.role });
            }
            if message.hidden_at.is_some() || message.deleted_at.is_some() {
                return Err(StoreError::MessageUnavailable(message_id.clone()));
            }

            let (guard, token) = self.claim(message_id)?;
            let history = chat.history(&chat.messages[..index]);

            let message = &mut chat.messages[index];
            message.content.clear();
            message.status = MessageStatus::AwaitingFirstToken;
            message.failure = None;
            message.created_at = now_timestamp();
            let target = message.to_assembled();

            chat.touch();
            (target, history, guard, token)
        };

        self.stream_into(chat_id, target, history, guard, token, observer)
            .await
    }

    async fn stream_into<O>(
        &self,
        chat_id: &ChatId,
        target: AssembledMessage,
        history: Vec<ChatCompletionMessage>,
        _guard: InFlight<'_>,
        token: CancellationToken,
        observer: &mut O,
    ) -> Result<SessionReport>
    where
        O: StreamObserver + ?Sized,
    {
        let request = ChatCompletionRequest::new(self.model.clone(), history);
        debug!(message_id = %target.id, history = request.messages.len(), "streaming reply");

        let mut forward = |snapshot: &AssembledMessage| {
            self.write_snapshot(chat_id, snapshot);
            observer.on_update(snapshot);
        };

        let report = run_session(&*self.transport, &request, target, &mut forward, &token).await?;

        // abandoned sessions skip the terminal notification
        self.write_snapshot(chat_id, &report.message);

        let SessionReport { message, end } = report;
        match end {
            SessionEnd::Failed(err) => Err(StoreError::Stream(err)),
            end => Ok(SessionReport { message, end }),
        }
    }

    fn write_snapshot(&self, chat_id: &ChatId, snapshot: &AssembledMessage) {
        let mut state = self.lock();
        let Some(chat) = state.chats.iter_mut().find(|c| &c.id == chat_id) else {
            debug!(%chat_id, "chat vanished during streaming");
            return;
        };
        match chat.message_mut(&snapshot.id) {
            Some(record) => record.apply_snapshot(snapshot),
            None => {
                debug!(message_id = %snapshot.id, "message vanished during streaming");
                return;
            }
        }
        if snapshot.status.is_terminal() {
            chat.touch();
        }
    }
}

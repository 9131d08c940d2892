//! OpenAI chat-completions wire types.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        })
    }
}

/// A single message in the request history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionMessage {
    pub role: Role,
    pub content: String,
}

impl ChatCompletionMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatCompletionMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl ChatCompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatCompletionMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: None,
        }
    }

    /// Copy of this request with `stream: true`.
    pub fn streaming(&self) -> Self {
        Self {
            stream: Some(true),
            ..self.clone()
        }
    }
}

/// Why the model stopped producing tokens.
///
/// Providers add reasons over time (`content_filter`, `tool_calls`, ...);
/// those land in `Other` instead of failing the whole event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Length,
    Stop,
    Timeout,
    #[serde(other)]
    Other,
}

/// Non-streaming completion reply.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionReply {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    pub choices: Vec<ReplyChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatCompletionReply {
    /// Content of choice 0, or "" when absent.
    pub fn content(&self) -> &str {
        self.choices
            .iter()
            .find(|c| c.index == 0)
            .map(|c| c.message.content.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplyChoice {
    #[serde(default)]
    pub index: u32,
    pub message: ChatCompletionMessage,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One streamed event payload (`data: {...}`).
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// One choice of one streamed chunk, flattened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaEvent {
    pub id: String,
    pub created: i64,
    /// Position in the chunk's choice array. Only index 0 is assembled.
    pub sequence_index: u32,
    pub content: Option<String>,
    /// Present on the first delta of a turn.
    pub role: Option<String>,
    /// Present on the final delta.
    pub finish_reason: Option<FinishReason>,
}

impl DeltaEvent {
    /// A content-only delta for choice 0.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            created: 0,
            sequence_index: 0,
            content: Some(content.into()),
            role: None,
            finish_reason: None,
        }
    }
}

impl ChatCompletionChunk {
    /// Flatten into one `DeltaEvent` per choice, in choice order.
    pub fn into_events(self) -> Vec<DeltaEvent> {
        let ChatCompletionChunk { id, created, choices } = self;
        choices
            .into_iter()
            .map(|choice| DeltaEvent {
                id: id.clone(),
                created,
                sequence_index: choice.index,
                content: choice.delta.content,
                role: choice.delta.role,
                finish_reason: choice.finish_reason,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_stream_unless_streaming() {
        let req = ChatCompletionRequest::new(
            "gpt-3.5-turbo",
            vec![ChatCompletionMessage::new(Role::User, "hi")],
        );
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"model":"gpt-3.5-turbo","messages":[{"role":"user","content":"hi"}]}"#
        );

        let json = serde_json::to_string(&req.streaming()).unwrap();
        assert!(json.ends_with(r#""stream":true}"#));
    }

    #[test]
    fn chunk_with_null_finish_reason() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"id":"1","created":0,"choices":[{"index":0,"delta":{"role":"assistant"},"finish_reason":null}]}"#,
        )
        .unwrap();
        let events = chunk.into_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].role.as_deref(), Some("assistant"));
        assert_eq!(events[0].content, None);
        assert_eq!(events[0].finish_reason, None);
    }

    #[test]
    fn unknown_finish_reason_is_other() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"id":"1","created":0,"choices":[{"index":0,"delta":{},"finish_reason":"content_filter"}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.into_events()[0].finish_reason, Some(FinishReason::Other));
    }

    #[test]
    fn multiple_choices_keep_order() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"id":"x","created":5,"choices":[
                {"index":0,"delta":{"content":"a"}},
                {"index":1,"delta":{"content":"b"},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        let events = chunk.into_events();
        assert_eq!(events[0].sequence_index, 0);
        assert_eq!(events[1].sequence_index, 1);
        assert_eq!(events[1].finish_reason, Some(FinishReason::Stop));
        assert_eq!(events[1].created, 5);
    }

    #[test]
    fn reply_content_reads_choice_zero() {
        let reply: ChatCompletionReply = serde_json::from_str(
            r#"{"id":"c","object":"chat.completion","created":1,
                "choices":[{"index":0,"message":{"role":"assistant","content":"hello"},"finish_reason":"stop"}],
                "usage":{"prompt_tokens":1,"completion_tokens":2,"total_tokens":3}}"#,
        )
        .unwrap();
        assert_eq!(reply.content(), "hello");
        assert_eq!(reply.usage.unwrap().total_tokens, 3);
    }
}

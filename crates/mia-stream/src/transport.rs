use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::error::TransportError;
use crate::wire::ChatCompletionRequest;

/// Raw response body, one item per transport read. No framing guarantee.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Issues streaming chat-completion requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name for logging and error messages.
    fn name(&self) -> &str;

    /// Start a streaming request. A non-2xx response is an error; the
    /// returned stream yields the response body as it arrives.
    async fn send(&self, request: &ChatCompletionRequest) -> Result<ChunkStream, TransportError>;
}

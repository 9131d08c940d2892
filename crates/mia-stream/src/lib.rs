//! Streaming chat-completion core: SSE decoding, incremental message
//! assembly, and the session loop that ties a transport to both.

pub mod assembler;
pub mod decoder;
pub mod error;
pub mod observer;
pub mod openai;
pub mod session;
pub mod transport;
pub mod wire;

pub use assembler::{AssembledMessage, Assembler, MessageStatus};
pub use decoder::{decode_stream, SseDecoder, StreamItem, DONE_SENTINEL};
pub use error::{StreamError, TransportError};
pub use observer::StreamObserver;
pub use openai::OpenAiClient;
pub use session::{run_session, SessionEnd, SessionReport};
pub use transport::{ChunkStream, Transport};
pub use wire::{ChatCompletionMessage, ChatCompletionRequest, DeltaEvent, FinishReason, Role};

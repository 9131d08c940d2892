// Drive the session loop with scripted transports: no network involved.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use tokio_util::sync::CancellationToken;

use mia_core::MessageId;
use mia_stream::{
    run_session, AssembledMessage, ChatCompletionMessage, ChatCompletionRequest, ChunkStream,
    MessageStatus, Role, SessionEnd, StreamError, Transport, TransportError,
};

enum Script {
    Chunks(Vec<&'static str>),
    /// Yield these chunks, then an error.
    ChunksThenError(Vec<&'static str>),
    /// Yield these chunks, then never resolve.
    ChunksThenHang(Vec<&'static str>),
    Refuse(u16),
}

struct ScriptedTransport {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }
}

fn ok_chunks(chunks: &[&'static str]) -> Vec<Result<Bytes, TransportError>> {
    chunks.iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect()
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, _request: &ChatCompletionRequest) -> Result<ChunkStream, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Chunks(c) => Ok(Box::pin(stream::iter(ok_chunks(c)))),
            Script::ChunksThenError(c) => {
                let mut items = ok_chunks(c);
                items.push(Err(TransportError::Stream("connection reset".to_string())));
                Ok(Box::pin(stream::iter(items)))
            }
            Script::ChunksThenHang(c) => {
                let items = stream::iter(ok_chunks(c));
                Ok(Box::pin(futures_util::StreamExt::chain(items, stream::pending())))
            }
            Script::Refuse(status) => Err(TransportError::Api {
                status: *status,
                message: "refused".to_string(),
            }),
        }
    }
}

const ROLE: &str = "data: {\"id\":\"1\",\"created\":0,\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n";
const HI: &str = "data: {\"id\":\"1\",\"created\":0,\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"}}]}\n\n";
const DONE: &str = "data: [DONE]\n\n";

fn request() -> ChatCompletionRequest {
    ChatCompletionRequest::new(
        "gpt-3.5-turbo",
        vec![ChatCompletionMessage::new(Role::User, "hello")],
    )
}

fn target() -> AssembledMessage {
    AssembledMessage::new(MessageId::from("reply"), Role::Assistant)
}

#[tokio::test]
async fn role_content_done_completes() {
    let transport = ScriptedTransport::new(Script::Chunks(vec![ROLE, HI, DONE]));
    let mut snapshots: Vec<AssembledMessage> = Vec::new();
    let mut observer = |m: &AssembledMessage| snapshots.push(m.clone());

    let cancel = CancellationToken::new();
    let report = run_session(&transport, &request(), target(), &mut observer, &cancel)
        .await
        .unwrap();

    assert!(report.is_completed());
    assert_eq!(report.message.text, "Hi");
    assert_eq!(report.message.status, MessageStatus::Complete);

    // one notification per chunk plus the terminal one
    assert_eq!(snapshots.len(), 4);
    assert_eq!(snapshots[0].status, MessageStatus::Streaming);
    assert_eq!(snapshots[1].text, "Hi");
    assert_eq!(snapshots[3].status, MessageStatus::Complete);
}

#[tokio::test]
async fn snapshots_are_monotonic() {
    let transport = ScriptedTransport::new(Script::Chunks(vec![ROLE, HI, HI, HI, DONE]));
    let mut snapshots: Vec<AssembledMessage> = Vec::new();
    let mut observer = |m: &AssembledMessage| snapshots.push(m.clone());

    run_session(&transport, &request(), target(), &mut observer, &CancellationToken::new())
        .await
        .unwrap();

    let rank = |s: MessageStatus| match s {
        MessageStatus::AwaitingFirstToken => 0,
        MessageStatus::Streaming => 1,
        MessageStatus::Complete | MessageStatus::Failed => 2,
    };
    for pair in snapshots.windows(2) {
        assert!(rank(pair[0].status) <= rank(pair[1].status));
        assert!(pair[1].text.starts_with(&pair[0].text));
    }
    assert_eq!(snapshots.last().unwrap().text, "HiHiHi");
}

#[tokio::test]
async fn transport_error_before_any_chunk_fails_empty() {
    let transport = ScriptedTransport::new(Script::ChunksThenError(vec![]));
    let mut observer = |_: &AssembledMessage| {};

    let cancel = CancellationToken::new();
    let report = run_session(&transport, &request(), target(), &mut observer, &cancel)
        .await
        .unwrap();

    assert_eq!(report.message.status, MessageStatus::Failed);
    assert_eq!(report.message.text, "");
    assert!(matches!(
        report.end,
        SessionEnd::Failed(StreamError::Transport(TransportError::Stream(_)))
    ));
}

#[tokio::test]
async fn refused_request_fails_session() {
    let transport = ScriptedTransport::new(Script::Refuse(503));
    let mut updates = 0;
    let mut observer = |_: &AssembledMessage| updates += 1;

    let cancel = CancellationToken::new();
    let report = run_session(&transport, &request(), target(), &mut observer, &cancel)
        .await
        .unwrap();

    assert_eq!(report.message.status, MessageStatus::Failed);
    assert!(report.message.failure.as_deref().unwrap().contains("503"));
    assert_eq!(updates, 1);
}

#[tokio::test]
async fn mid_stream_error_keeps_partial_text() {
    let transport = ScriptedTransport::new(Script::ChunksThenError(vec![ROLE, HI]));
    let mut observer = |_: &AssembledMessage| {};

    let cancel = CancellationToken::new();
    let report = run_session(&transport, &request(), target(), &mut observer, &cancel)
        .await
        .unwrap();

    assert_eq!(report.message.status, MessageStatus::Failed);
    assert_eq!(report.message.text, "Hi");
}

#[tokio::test]
async fn eof_without_sentinel_completes() {
    // trailing event has no blank line; it is flushed at end of input
    let transport = ScriptedTransport::new(Script::Chunks(vec![
        ROLE,
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"tail\"}}]}",
    ]));
    let mut observer = |_: &AssembledMessage| {};

    let cancel = CancellationToken::new();
    let report = run_session(&transport, &request(), target(), &mut observer, &cancel)
        .await
        .unwrap();

    assert!(report.is_completed());
    assert_eq!(report.message.text, "tail");
}

#[tokio::test]
async fn cancellation_abandons_without_terminal_status() {
    let transport = ScriptedTransport::new(Script::ChunksThenHang(vec![ROLE, HI]));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let mut observer = |m: &AssembledMessage| {
        if m.text == "Hi" {
            trigger.cancel();
        }
    };

    let report = run_session(&transport, &request(), target(), &mut observer, &cancel)
        .await
        .unwrap();

    assert!(matches!(report.end, SessionEnd::Abandoned));
    assert_eq!(report.message.status, MessageStatus::Streaming);
    assert_eq!(report.message.text, "Hi");
}

#[tokio::test]
async fn cancelled_before_send_never_calls_transport() {
    let transport = ScriptedTransport::new(Script::Chunks(vec![DONE]));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut observer = |_: &AssembledMessage| {};

    let report = run_session(&transport, &request(), target(), &mut observer, &cancel)
        .await
        .unwrap();

    assert!(matches!(report.end, SessionEnd::Abandoned));
    assert_eq!(report.message.status, MessageStatus::AwaitingFirstToken);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn streaming_target_is_rejected() {
    let transport = ScriptedTransport::new(Script::Chunks(vec![DONE]));
    let mut busy = target();
    busy.status = MessageStatus::Streaming;
    let mut observer = |_: &AssembledMessage| {};

    let err = run_session(&transport, &request(), busy, &mut observer, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, StreamError::InvalidState { .. }));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

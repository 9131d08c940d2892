//! Session loop: transport → decoder → assembler → observer.
//!
//! The only suspension point is awaiting the next transport read; decoding,
//! assembly and notification for a chunk run to completion before the next
//! read is requested.

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assembler::{AssembledMessage, Assembler};
use crate::decoder::{SseDecoder, StreamItem};
use crate::error::StreamError;
use crate::observer::StreamObserver;
use crate::transport::Transport;
use crate::wire::ChatCompletionRequest;

/// How a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// `[DONE]` received, or the transport closed cleanly.
    Completed,
    /// Transport-level failure. Partial text is kept.
    Failed(StreamError),
    /// Cancelled by the caller. The message keeps its last status.
    Abandoned,
}

#[derive(Debug)]
pub struct SessionReport {
    pub message: AssembledMessage,
    pub end: SessionEnd,
}

impl SessionReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.end, SessionEnd::Completed)
    }
}

/// Stream one reply into `target`.
///
/// Exactly one of complete/fail is applied unless the session is abandoned
/// via `cancel`, in which case neither is. Only a target that cannot start
/// a session (see [`Assembler::begin`]) is reported as `Err`.
pub async fn run_session<T, O>(
    transport: &T,
    request: &ChatCompletionRequest,
    target: AssembledMessage,
    observer: &mut O,
    cancel: &CancellationToken,
) -> Result<SessionReport, StreamError>
where
    T: Transport + ?Sized,
    O: StreamObserver + ?Sized,
{
    let mut assembler = Assembler::begin(target)?;
    let message_id = assembler.message().id.clone();
    info!(
        %message_id,
        transport = %transport.name(),
        model = %request.model,
        "streaming session started"
    );

    let sent = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(abandon(assembler)),
        sent = transport.send(request) => sent,
    };

    let mut chunks = match sent {
        Ok(chunks) => chunks,
        Err(e) => return Ok(fail(assembler, observer, e.into())),
    };

    let mut decoder = SseDecoder::new();
    let mut reads: usize = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(abandon(assembler)),
            next = chunks.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                reads += 1;
                let done = apply(&mut assembler, decoder.decode(&bytes));
                observer.on_update(assembler.message());
                if done {
                    return Ok(complete(assembler, observer, reads));
                }
            }
            Some(Err(e)) => return Ok(fail(assembler, observer, e.into())),
            None => {
                let done = apply(&mut assembler, decoder.finish());
                if !done {
                    warn!(%message_id, "stream closed without [DONE] sentinel");
                }
                return Ok(complete(assembler, observer, reads));
            }
        }
    }
}

/// Apply one read's worth of items. Returns true if the sentinel was seen.
fn apply(assembler: &mut Assembler, items: Vec<StreamItem>) -> bool {
    let mut done = false;
    let mut events = Vec::with_capacity(items.len());
    for item in items {
        match item {
            StreamItem::Delta(event) => events.push(event),
            StreamItem::Done => done = true,
        }
    }
    assembler.apply_events(&events);
    done
}

fn complete<O: StreamObserver + ?Sized>(
    mut assembler: Assembler,
    observer: &mut O,
    reads: usize,
) -> SessionReport {
    assembler.complete();
    observer.on_update(assembler.message());
    let message = assembler.into_message();
    info!(message_id = %message.id, reads, len = message.text.len(), "streaming session complete");
    SessionReport {
        message,
        end: SessionEnd::Completed,
    }
}

fn fail<O: StreamObserver + ?Sized>(
    mut assembler: Assembler,
    observer: &mut O,
    err: StreamError,
) -> SessionReport {
    warn!(message_id = %assembler.message().id, error = %err, "streaming session failed");
    assembler.fail(err.to_string());
    observer.on_update(assembler.message());
    SessionReport {
        message: assembler.into_message(),
        end: SessionEnd::Failed(err),
    }
}

fn abandon(assembler: Assembler) -> SessionReport {
    let message = assembler.into_message();
    debug!(message_id = %message.id, status = %message.status, "streaming session abandoned");
    SessionReport {
        message,
        end: SessionEnd::Abandoned,
    }
}

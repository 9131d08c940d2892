//! Server-sent-event decoder for chat-completion streams.
//!
//! Events are separated by a blank line. Each line of an event may carry a
//! `data:` prefix; the prefix-stripped lines are concatenated and parsed as
//! a [`ChatCompletionChunk`]. The literal `[DONE]` ends the stream.
//!
//! Bytes are buffered until an event's terminating blank line arrives, so a
//! transport read may split an event (or a multi-byte character) anywhere.
//! An event that outgrows [`MAX_EVENT_BYTES`] is dropped up to its boundary.

use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::{StreamError, TransportError};
use crate::wire::{ChatCompletionChunk, DeltaEvent};

/// Sentinel data value that closes a stream successfully.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Largest single event the decoder will buffer.
pub const MAX_EVENT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Delta(DeltaEvent),
    /// No further deltas will arrive.
    Done,
}

/// Incremental, push-based decoder. Feed it every transport read in order,
/// then call [`SseDecoder::finish`] once the transport is exhausted.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Leading bytes of `buf` already searched without finding a boundary.
    scanned: usize,
    /// Inside an oversized event; input is dropped until its boundary.
    discarding: bool,
    terminated: bool,
    skipped: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `[DONE]` has been seen. All later input is ignored.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Number of malformed units dropped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Decode every complete event in `chunk` (plus whatever was buffered
    /// from earlier reads). An incomplete trailing event stays buffered.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<StreamItem> {
        let mut items = Vec::new();
        if self.terminated {
            return items;
        }

        // CR never appears raw inside JSON, so CRLF framing reduces to LF.
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
        if self.discarding && !self.drop_oversized() {
            return items;
        }

        while let Some(end) = self.next_boundary() {
            let unit: Vec<u8> = self.buf.drain(..end + 2).take(end).collect();
            self.scanned = 0;
            self.decode_unit(&unit, &mut items);
            if self.terminated {
                self.buf.clear();
                return items;
            }
        }

        if self.buf.len() > MAX_EVENT_BYTES {
            let err = StreamError::Decode {
                reason: format!("event exceeds {MAX_EVENT_BYTES} bytes"),
                unit: String::from_utf8_lossy(&self.buf[..64]).into_owned(),
            };
            self.skip(err);
            self.discarding = true;
            self.drop_oversized();
        }

        items
    }

    /// Position of the next `\n\n` in `buf`. Bytes searched without a hit
    /// are remembered so a slowly arriving event is scanned once.
    fn next_boundary(&mut self) -> Option<usize> {
        let from = self.scanned.saturating_sub(1);
        match find_boundary(&self.buf[from..]) {
            Some(pos) => Some(from + pos),
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }

    /// Drop buffered bytes of an oversized event. Returns true once its
    /// boundary has been consumed and normal decoding can resume.
    fn drop_oversized(&mut self) -> bool {
        match self.next_boundary() {
            Some(end) => {
                self.buf.drain(..end + 2);
                self.scanned = 0;
                self.discarding = false;
                true
            }
            None => {
                // keep a trailing '\n' that may start the boundary
                let keep_from = self.buf.len().saturating_sub(1);
                self.buf.drain(..keep_from);
                self.scanned = self.buf.len();
                false
            }
        }
    }

    /// End of input: a non-empty remainder is decoded as a final unit.
    pub fn finish(&mut self) -> Vec<StreamItem> {
        let mut items = Vec::new();
        if self.terminated {
            return items;
        }
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return items;
        }
        if !rest.iter().all(u8::is_ascii_whitespace) {
            debug!(len = rest.len(), "decoding unterminated trailing event");
            self.decode_unit(&rest, &mut items);
        }
        items
    }

    fn decode_unit(&mut self, unit: &[u8], items: &mut Vec<StreamItem>) {
        let text = match std::str::from_utf8(unit) {
            Ok(t) => t,
            Err(e) => {
                self.skip(StreamError::Decode {
                    reason: format!("invalid UTF-8: {e}"),
                    unit: String::from_utf8_lossy(unit).into_owned(),
                });
                return;
            }
        };

        let content = join_data_lines(text);
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return;
        }

        if trimmed == DONE_SENTINEL {
            debug!("stream sentinel received");
            self.terminated = true;
            items.push(StreamItem::Done);
            return;
        }

        match serde_json::from_str::<ChatCompletionChunk>(trimmed) {
            Ok(chunk) => {
                if chunk.choices.is_empty() {
                    debug!(id = %chunk.id, "chunk without choices");
                }
                items.extend(chunk.into_events().into_iter().map(StreamItem::Delta));
            }
            Err(e) => self.skip(StreamError::Decode {
                reason: e.to_string(),
                unit: content,
            }),
        }
    }

    fn skip(&mut self, err: StreamError) {
        self.skipped += 1;
        if let StreamError::Decode { reason, unit } = &err {
            warn!(%reason, data = %unit, "skipping malformed stream event");
        }
    }
}

/// Index of the first `\n\n` in `buf`.
fn find_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// Strip `data:` prefixes, drop `:` comment lines, concatenate the rest.
fn join_data_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split('\n') {
        if line.starts_with(':') {
            continue;
        }
        let line = match line.strip_prefix("data:") {
            Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
            None => line,
        };
        out.push_str(line);
    }
    out
}

/// Lazily decode a transport byte stream.
///
/// Ends after `[DONE]`, after the first transport error (which is yielded),
/// or when the input is exhausted.
pub fn decode_stream<S, B>(chunks: S) -> impl Stream<Item = Result<StreamItem, TransportError>>
where
    S: Stream<Item = Result<B, TransportError>>,
    B: AsRef<[u8]>,
{
    async_stream::stream! {
        let mut decoder = SseDecoder::new();
        futures_util::pin_mut!(chunks);

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    for item in decoder.decode(bytes.as_ref()) {
                        yield Ok(item);
                    }
                    if decoder.is_terminated() {
                        return;
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        for item in decoder.finish() {
            yield Ok(item);
        }
    }
}

//! Incremental JSON framing for backend chunk streams
//!
//! The backend writes one JSON object per chunk, usually newline-delimited,
//! but a single network read may hold part of an object, one object, or
//! several objects back to back. The framer buffers bytes between reads and
//! hands out each object as soon as its closing brace arrives.

use bytes::{Bytes, BytesMut};
use futures::stream::Stream;
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

/// One complete object cut from the byte stream
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Exact bytes of the object as the backend sent them
    pub raw: Bytes,
    /// Parsed object
    pub value: Value,
}

/// Reassembles JSON objects from arbitrarily split reads
#[derive(Debug)]
pub struct ChunkFramer {
    buffer: BytesMut,
    max_frame_bytes: usize,
    /// The buffer holds the start of an unfinished object
    awaiting_close: bool,
}

/// Whitespace as JSON defines it, narrower than ASCII whitespace
fn is_json_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

impl ChunkFramer {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_bytes,
            awaiting_close: false,
        }
    }

    /// Bytes held while waiting for the rest of an object
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append one read and return every object it completed, in order
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        // An unfinished object cannot complete before its closing brace shows up
        let still_open = self.awaiting_close && !bytes.contains(&b'}');
        self.buffer.extend_from_slice(bytes);
        if still_open {
            self.enforce_limit();
            return Vec::new();
        }
        self.awaiting_close = false;

        let mut frames = Vec::new();
        let mut consumed = 0;

        while consumed < self.buffer.len() {
            let rest = &self.buffer[consumed..];
            let leading = rest.iter().take_while(|b| is_json_whitespace(**b)).count();
            let mut values = serde_json::Deserializer::from_slice(rest).into_iter::<Value>();

            match values.next() {
                None => {
                    consumed = self.buffer.len();
                }
                Some(Ok(value)) => {
                    let end = values.byte_offset();
                    if value.is_object() {
                        frames.push(Frame {
                            raw: Bytes::copy_from_slice(&rest[leading..end]),
                            value,
                        });
                    } else {
                        debug!("Skipping non-object JSON value in backend stream");
                    }
                    consumed += end;
                }
                // Truncated value: wait for more bytes
                Some(Err(e)) if e.is_eof() => {
                    self.awaiting_close = rest.get(leading) == Some(&b'{');
                    break;
                }
                Some(Err(e)) => {
                    let skip = rest[leading + 1..]
                        .iter()
                        .position(|b| *b == b'{')
                        .map(|pos| leading + 1 + pos)
                        .unwrap_or(rest.len());
                    warn!("Discarding {skip} malformed bytes from backend stream: {e}");
                    consumed += skip;
                }
            }
        }

        let _ = self.buffer.split_to(consumed);
        self.enforce_limit();

        frames
    }

    fn enforce_limit(&mut self) {
        if self.buffer.len() > self.max_frame_bytes {
            warn!(
                "Backend object exceeded {} bytes without completing, discarding",
                self.max_frame_bytes
            );
            self.buffer.clear();
            self.awaiting_close = false;
        }
    }

    /// Drop whatever is left when the stream closes
    ///
    /// Returns the number of non-whitespace bytes discarded. A truncated
    /// trailing object is not an error.
    pub fn finish(&mut self) -> usize {
        let dropped = self
            .buffer
            .iter()
            .filter(|b| !is_json_whitespace(**b))
            .count();
        if dropped > 0 {
            debug!("Dropping {dropped} bytes of incomplete trailing output");
        }
        self.buffer.clear();
        self.awaiting_close = false;
        dropped
    }
}

/// Adapts a byte stream into a stream of [`Frame`]s
///
/// Ends after the first transport error; the framer's tail is dropped then,
/// the same as on a clean close.
pub struct FramedStream<S> {
    inner: S,
    framer: ChunkFramer,
    pending: VecDeque<Frame>,
    done: bool,
}

impl<S> FramedStream<S> {
    pub fn new(inner: S, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            framer: ChunkFramer::new(max_frame_bytes),
            pending: VecDeque::new(),
            done: false,
        }
    }
}

impl<S, E> Stream for FramedStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Frame, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if let Some(frame) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }
            if this.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.pending.extend(this.framer.push(&bytes));
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    this.framer.finish();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    this.framer.finish();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

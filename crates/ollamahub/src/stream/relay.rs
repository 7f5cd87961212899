//! Live relay of framed backend chunks to a client body
//!
//! The relay runs as its own task and feeds a bounded channel whose receiver
//! becomes the HTTP response body. Order is preserved chunk by chunk. When
//! the client goes away the channel closes and the relay drops the backend
//! stream immediately, releasing the backend connection.

use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, info, warn};

use super::framer::{Frame, FramedStream};
use crate::backend::{BackendError, Mode, Usage};
use crate::config::StreamConfig;

/// What the client receives for each chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    /// Each backend object verbatim, newline-terminated
    #[default]
    Json,
    /// Only the delta text of each object
    Text,
}

impl StreamFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            StreamFormat::Json => "text/event-stream",
            StreamFormat::Text => "text/plain; charset=utf-8",
        }
    }
}

/// One unit of backend output
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseChunk {
    /// Incremental text; empty for structural chunks
    pub delta: String,
    /// Backend marked this as the last chunk (`done: true`)
    pub is_final: bool,
    /// Counters, present on the final chunk
    pub usage: Option<Usage>,
    /// Error message the backend embedded in the stream
    pub error: Option<String>,
}

impl ResponseChunk {
    pub fn from_value(mode: Mode, value: &Value) -> Self {
        let is_final = value.get("done").and_then(Value::as_bool).unwrap_or(false);
        Self {
            delta: mode.extract_text(value).unwrap_or_default().to_string(),
            is_final,
            usage: is_final.then(|| Usage::from_value(value)),
            error: value.get("error").and_then(Value::as_str).map(str::to_string),
        }
    }
}

/// How a relay ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Backend sent its final chunk and closed
    Completed,
    /// Backend closed without a final chunk
    Truncated,
    /// Backend read failed mid-stream
    BackendFailed,
    /// Client stopped reading
    ClientGone,
}

impl RelayOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayOutcome::Completed => "completed",
            RelayOutcome::Truncated => "truncated",
            RelayOutcome::BackendFailed => "backend_failed",
            RelayOutcome::ClientGone => "client_gone",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelaySummary {
    pub outcome: RelayOutcome,
    /// Objects received from the backend
    pub chunks: usize,
    /// Writes delivered to the client channel
    pub sent: usize,
    pub usage: Option<Usage>,
}

/// A running relay: the client body plus the task driving it
pub struct RelayHandle {
    pub body: ReceiverStream<Result<Bytes, Infallible>>,
    pub task: JoinHandle<RelaySummary>,
}

pub struct StreamRelay {
    mode: Mode,
    format: StreamFormat,
    channel_capacity: usize,
    max_frame_bytes: usize,
}

impl StreamRelay {
    pub fn new(mode: Mode, format: StreamFormat, config: &StreamConfig) -> Self {
        Self {
            mode,
            format,
            channel_capacity: config.channel_capacity.max(1),
            max_frame_bytes: config.max_frame_bytes,
        }
    }

    /// Spawn the relay task in the current tracing span
    pub fn spawn<S>(self, backend: S) -> RelayHandle
    where
        S: Stream<Item = Result<Bytes, BackendError>> + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let task = tokio::spawn(
            async move {
                let summary = self.run(backend, tx).await;
                info!(
                    outcome = summary.outcome.as_str(),
                    chunks = summary.chunks,
                    sent = summary.sent,
                    eval_count = summary.usage.map(|u| u.eval_count),
                    "Stream closed"
                );
                summary
            }
            .in_current_span(),
        );

        RelayHandle {
            body: ReceiverStream::new(rx),
            task,
        }
    }

    /// Drive `backend` into `tx` until either side ends
    pub async fn run<S>(
        &self,
        backend: S,
        tx: mpsc::Sender<Result<Bytes, Infallible>>,
    ) -> RelaySummary
    where
        S: Stream<Item = Result<Bytes, BackendError>> + Unpin,
    {
        let mut frames = FramedStream::new(backend, self.max_frame_bytes);
        let mut summary = RelaySummary {
            outcome: RelayOutcome::Truncated,
            chunks: 0,
            sent: 0,
            usage: None,
        };
        let mut saw_final = false;

        loop {
            let next = tokio::select! {
                biased;
                () = tx.closed() => {
                    summary.outcome = RelayOutcome::ClientGone;
                    break;
                }
                next = frames.next() => next,
            };

            match next {
                Some(Ok(frame)) => {
                    let chunk = ResponseChunk::from_value(self.mode, &frame.value);
                    summary.chunks += 1;

                    if let Some(error) = &chunk.error {
                        warn!("Backend reported an error mid-stream: {error}");
                    }
                    if chunk.is_final {
                        saw_final = true;
                        summary.usage = chunk.usage;
                    }

                    if let Some(bytes) = self.render(&frame, &chunk) {
                        if tx.send(Ok(bytes)).await.is_err() {
                            summary.outcome = RelayOutcome::ClientGone;
                            break;
                        }
                        summary.sent += 1;
                    }
                }
                Some(Err(e)) => {
                    warn!("Backend stream ended early: {e}");
                    summary.outcome = RelayOutcome::BackendFailed;
                    break;
                }
                None => {
                    summary.outcome = if saw_final {
                        RelayOutcome::Completed
                    } else {
                        RelayOutcome::Truncated
                    };
                    break;
                }
            }
        }

        drop(frames);
        debug!("Backend stream released");
        summary
    }

    fn render(&self, frame: &Frame, chunk: &ResponseChunk) -> Option<Bytes> {
        match self.format {
            StreamFormat::Json => {
                let mut buf = BytesMut::with_capacity(frame.raw.len() + 1);
                buf.put_slice(&frame.raw);
                buf.put_u8(b'\n');
                Some(buf.freeze())
            }
            StreamFormat::Text if chunk.delta.is_empty() => None,
            StreamFormat::Text => Some(Bytes::from(chunk.delta.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    type BackendTx = mpsc::Sender<Result<Bytes, BackendError>>;

    fn backend_channel() -> (BackendTx, ReceiverStream<Result<Bytes, BackendError>>) {
        let (tx, rx) = mpsc::channel(16);
        (tx, ReceiverStream::new(rx))
    }

    fn relay(mode: Mode, format: StreamFormat) -> StreamRelay {
        StreamRelay::new(mode, format, &StreamConfig::default())
    }

    async fn collect_body(body: ReceiverStream<Result<Bytes, Infallible>>) -> String {
        let parts: Vec<Bytes> = body.map(|r| r.unwrap()).collect().await;
        parts
            .iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_response_chunk_final_carries_usage() {
        let value = json!({
            "message": {"role": "assistant", "content": ""},
            "done": true,
            "eval_count": 12,
            "total_duration": 900
        });
        let chunk = ResponseChunk::from_value(Mode::Chat, &value);

        assert!(chunk.is_final);
        assert_eq!(chunk.delta, "");
        assert_eq!(chunk.usage.unwrap().eval_count, 12);
    }

    #[test]
    fn test_response_chunk_partial_has_no_usage() {
        let chunk = ResponseChunk::from_value(Mode::Generate, &json!({"response": "Hi", "done": false}));

        assert!(!chunk.is_final);
        assert_eq!(chunk.delta, "Hi");
        assert!(chunk.usage.is_none());
        assert!(chunk.error.is_none());
    }

    #[tokio::test]
    async fn test_json_relay_preserves_order_and_bytes() {
        let (backend_tx, backend) = backend_channel();
        let handle = relay(Mode::Generate, StreamFormat::Json).spawn(backend);

        backend_tx
            .send(Ok(Bytes::from_static(b"{\"response\":\"a\"}{\"response\"")))
            .await
            .unwrap();
        backend_tx
            .send(Ok(Bytes::from_static(b":\"b\"}\n{\"response\":\"\",\"done\":true}")))
            .await
            .unwrap();
        drop(backend_tx);

        let body = collect_body(handle.body).await;
        let summary = handle.task.await.unwrap();

        assert_eq!(
            body,
            "{\"response\":\"a\"}\n{\"response\":\"b\"}\n{\"response\":\"\",\"done\":true}\n"
        );
        assert_eq!(summary.outcome, RelayOutcome::Completed);
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.sent, 3);
    }

    #[tokio::test]
    async fn test_text_relay_skips_empty_and_keeps_markers() {
        let (backend_tx, backend) = backend_channel();
        let handle = relay(Mode::Chat, StreamFormat::Text).spawn(backend);

        for content in ["<think>", "", "hmm", "</think>", "Hello", " world"] {
            let chunk = json!({"message": {"role": "assistant", "content": content}, "done": false});
            backend_tx
                .send(Ok(Bytes::from(chunk.to_string())))
                .await
                .unwrap();
        }
        drop(backend_tx);

        let body = collect_body(handle.body).await;
        let summary = handle.task.await.unwrap();

        assert_eq!(body, "<think>hmm</think>Hello world");
        assert_eq!(summary.chunks, 6);
        assert_eq!(summary.sent, 5);
        assert_eq!(summary.outcome, RelayOutcome::Truncated);
    }

    #[tokio::test]
    async fn test_backend_error_ends_body_cleanly() {
        let (backend_tx, backend) = backend_channel();
        let handle = relay(Mode::Generate, StreamFormat::Text).spawn(backend);

        backend_tx
            .send(Ok(Bytes::from_static(b"{\"response\":\"partial\"}{\"resp")))
            .await
            .unwrap();
        backend_tx
            .send(Err(BackendError::Stream("connection reset".to_string())))
            .await
            .unwrap();

        let body = collect_body(handle.body).await;
        let summary = handle.task.await.unwrap();

        assert_eq!(body, "partial");
        assert_eq!(summary.outcome, RelayOutcome::BackendFailed);
    }

    #[tokio::test]
    async fn test_client_disconnect_releases_backend() {
        let (backend_tx, backend) = backend_channel();
        let handle = relay(Mode::Generate, StreamFormat::Json).spawn(backend);

        backend_tx
            .send(Ok(Bytes::from_static(b"{\"response\":\"first\"}")))
            .await
            .unwrap();

        let mut body = handle.body;
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from_static(b"{\"response\":\"first\"}\n"));

        // The backend goes quiet; dropping the body must still free it
        drop(body);

        tokio::time::timeout(Duration::from_secs(2), backend_tx.closed())
            .await
            .expect("relay kept the backend stream open after the client left");

        let summary = handle.task.await.unwrap();
        assert_eq!(summary.outcome, RelayOutcome::ClientGone);
    }

    #[tokio::test]
    async fn test_many_small_reads_arrive_in_order() {
        let (backend_tx, backend) = backend_channel();
        let handle = relay(Mode::Generate, StreamFormat::Text).spawn(backend);

        let producer = tokio::spawn(async move {
            let mut wire = String::new();
            for i in 0..50 {
                wire.push_str(&json!({"response": format!("{i},")}).to_string());
            }
            for byte in wire.into_bytes() {
                if backend_tx.send(Ok(Bytes::from(vec![byte]))).await.is_err() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        });

        let body = collect_body(handle.body).await;
        producer.await.unwrap();

        let expected: String = (0..50).map(|i| format!("{i},")).collect();
        assert_eq!(body, expected);
    }
}

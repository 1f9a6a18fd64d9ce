//! Newline-delimited JSON framing shared by the stream bindings.
//!
//! Frames are UTF-8 lines; a frame must not contain an embedded `\n` or `\r`.
//! Oversized or non-UTF-8 lines are dropped and the stream keeps going.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, trace, warn};

use crate::error::{TransportError, TransportResult};
use crate::message::{Channel, TransportMessage};
use crate::metrics::AtomicMetrics;

pub(crate) type BoxedRead = Pin<Box<dyn AsyncRead + Send + Sync + 'static>>;
pub(crate) type BoxedWrite = Pin<Box<dyn AsyncWrite + Send + Sync + 'static>>;
pub(crate) type LineWriter = FramedWrite<BoxedWrite, LinesCodec>;

pub(crate) fn line_writer(writer: BoxedWrite) -> LineWriter {
    FramedWrite::new(writer, LinesCodec::new())
}

/// Check a frame against the framing rules and return it as a line
pub(crate) fn encode_line(message: &TransportMessage, limit: usize) -> TransportResult<String> {
    if message.size() > limit {
        return Err(TransportError::MessageTooLarge {
            size: message.size(),
            limit,
        });
    }
    let text = std::str::from_utf8(&message.payload)
        .map_err(|e| TransportError::Framing(format!("payload is not UTF-8: {e}")))?;
    if text.contains(['\n', '\r']) {
        return Err(TransportError::Framing(
            "payload contains an embedded newline".to_string(),
        ));
    }
    Ok(text.to_string())
}

/// Write one line and flush it
pub(crate) async fn write_line(
    writer: &TokioMutex<Option<LineWriter>>,
    line: String,
    metrics: &AtomicMetrics,
) -> TransportResult<()> {
    let size = line.len();
    let mut guard = writer.lock().await;
    let sink = guard
        .as_mut()
        .ok_or_else(|| TransportError::NotConnected("writer closed".to_string()))?;
    sink.send(line).await.map_err(|e| match e {
        LinesCodecError::Io(io) => TransportError::SendFailed(io.to_string()),
        other => TransportError::SendFailed(other.to_string()),
    })?;
    metrics.record_sent(size);
    trace!(bytes = size, "frame sent");
    Ok(())
}

enum Frame {
    Line(String),
    Oversized,
    NotUtf8,
}

struct FrameCodec(LinesCodec);

impl FrameCodec {
    fn map(result: Result<Option<String>, LinesCodecError>) -> Result<Option<Frame>, LinesCodecError> {
        match result {
            Ok(line) => Ok(line.map(Frame::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Oversized)),
            Err(LinesCodecError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                Ok(Some(Frame::NotUtf8))
            }
            Err(e) => Err(e),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        Self::map(self.0.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        Self::map(self.0.decode_eof(buf))
    }
}

/// Inbound side of a stream binding: the queue filled by reader tasks and the
/// failure (if any) that ended them.
#[derive(Debug)]
pub(crate) struct Inbound {
    rx: TokioMutex<Option<mpsc::Receiver<TransportMessage>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl Inbound {
    pub(crate) fn new() -> Self {
        Self {
            rx: TokioMutex::new(None),
            failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Install a fresh queue and return its sender
    pub(crate) async fn open(&self, capacity: usize) -> mpsc::Sender<TransportMessage> {
        let (tx, rx) = mpsc::channel(capacity);
        *self.rx.lock().await = Some(rx);
        *self.failure.lock() = None;
        tx
    }

    pub(crate) async fn close(&self) {
        *self.rx.lock().await = None;
    }

    pub(crate) fn failure_slot(&self) -> Arc<Mutex<Option<String>>> {
        self.failure.clone()
    }

    /// Next frame; `Ok(None)` once every reader ended cleanly
    pub(crate) async fn next(&self) -> TransportResult<Option<TransportMessage>> {
        let mut guard = self.rx.lock().await;
        let rx = guard
            .as_mut()
            .ok_or_else(|| TransportError::NotConnected("receive channel closed".to_string()))?;
        match rx.recv().await {
            Some(message) => Ok(Some(message)),
            None => match self.failure.lock().clone() {
                Some(reason) => Err(TransportError::ConnectionLost(reason)),
                None => Ok(None),
            },
        }
    }
}

/// Spawn a task that reads lines from `reader` into `tx` until EOF or error
pub(crate) fn spawn_reader<R>(
    reader: R,
    max_message_size: usize,
    channel: Channel,
    tx: mpsc::Sender<TransportMessage>,
    metrics: Arc<AtomicMetrics>,
    failure: Arc<Mutex<Option<String>>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut frames = FramedRead::new(
        reader,
        FrameCodec(LinesCodec::new_with_max_length(max_message_size)),
    );
    tokio::spawn(async move {
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(Frame::Line(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    metrics.record_received(line.len());
                    let message = TransportMessage {
                        payload: Bytes::copy_from_slice(line.as_bytes()),
                        metadata: crate::message::TransportMessageMetadata {
                            channel,
                            content_type: None,
                        },
                    };
                    if tx.send(message).await.is_err() {
                        debug!("receive queue dropped, stopping reader");
                        return;
                    }
                }
                Ok(Frame::Oversized) => {
                    metrics.oversized_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(limit = max_message_size, "dropping oversized frame");
                }
                Ok(Frame::NotUtf8) => warn!("dropping frame that is not valid UTF-8"),
                Err(e) => {
                    warn!(error = %e, "reader failed");
                    *failure.lock() = Some(e.to_string());
                    return;
                }
            }
        }
        debug!("reader reached end of stream");
    })
}

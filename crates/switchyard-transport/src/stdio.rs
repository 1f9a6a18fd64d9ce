//! Stdio binding: newline-delimited JSON over a read/write pair.
//!
//! The pair is either this process's stdin/stdout, a child's stdout/stdin, or
//! any async streams (see [`duplex_pair`] for an in-memory connection).
//!
//! Locks follow one rule: `parking_lot` for state that is never held across
//! `.await`, `tokio::sync::Mutex` for the writer and the inbound queue.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::error::{TransportError, TransportResult};
use crate::framing::{self, BoxedRead, BoxedWrite, Inbound, LineWriter};
use crate::message::{Channel, TransportMessage};
use crate::metrics::{AtomicMetrics, TransportMetrics};
use crate::traits::Transport;
use crate::types::{TransportCapabilities, TransportConfig, TransportState, TransportType};

enum StreamSource {
    ProcessStdio,
    Raw {
        reader: Option<BoxedRead>,
        writer: Option<BoxedWrite>,
    },
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessStdio => write!(f, "ProcessStdio"),
            Self::Raw { reader, writer } => f
                .debug_struct("Raw")
                .field("reader", &reader.is_some())
                .field("writer", &writer.is_some())
                .finish(),
        }
    }
}

/// Newline-delimited JSON transport over a read/write pair
pub struct StdioTransport {
    state: Mutex<TransportState>,
    capabilities: TransportCapabilities,
    config: TransportConfig,
    metrics: Arc<AtomicMetrics>,
    source: Mutex<StreamSource>,
    writer: TokioMutex<Option<LineWriter>>,
    inbound: Inbound,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("state", &*self.state.lock())
            .field("source", &*self.source.lock())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioTransport {
    fn build(source: StreamSource, config: TransportConfig) -> Self {
        Self {
            state: Mutex::new(TransportState::Disconnected),
            capabilities: TransportCapabilities {
                max_message_size: config.max_message_size,
                supports_push_channel: false,
            },
            config,
            metrics: Arc::new(AtomicMetrics::default()),
            source: Mutex::new(source),
            writer: TokioMutex::new(None),
            inbound: Inbound::new(),
            reader_task: Mutex::new(None),
        }
    }

    /// Transport over this process's stdin/stdout
    pub fn new() -> Self {
        Self::build(StreamSource::ProcessStdio, TransportConfig::default())
    }

    /// Transport over arbitrary async streams.
    ///
    /// `reader` yields the peer's frames, `writer` receives ours. For a child
    /// process that means its stdout and stdin respectively.
    pub fn from_raw<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
        W: AsyncWrite + Send + Sync + 'static,
    {
        Self::from_raw_with_config(reader, writer, TransportConfig::default())
    }

    /// [`StdioTransport::from_raw`] with explicit limits
    pub fn from_raw_with_config<R, W>(reader: R, writer: W, config: TransportConfig) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
        W: AsyncWrite + Send + Sync + 'static,
    {
        Self::build(
            StreamSource::Raw {
                reader: Some(Box::pin(reader)),
                writer: Some(Box::pin(writer)),
            },
            config,
        )
    }

    /// Transport over a spawned child's piped stdout/stdin.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConfigurationError`] if either stream was not
    /// piped or was already taken.
    pub fn from_child(child: &mut Child, config: TransportConfig) -> TransportResult<Self> {
        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::ConfigurationError("child stdin was not piped".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::ConfigurationError("child stdout was not piped".to_string())
        })?;
        Ok(Self::from_raw_with_config(stdout, stdin, config))
    }

    fn set_state(&self, new_state: TransportState) {
        let mut state = self.state.lock();
        if *state != new_state {
            trace!("stdio transport state: {} -> {}", *state, new_state);
            *state = new_state;
        }
    }

    fn take_streams(&self) -> TransportResult<(BoxedRead, BoxedWrite)> {
        let mut source = self.source.lock();
        match &mut *source {
            StreamSource::ProcessStdio => {
                Ok((Box::pin(tokio::io::stdin()), Box::pin(tokio::io::stdout())))
            }
            StreamSource::Raw { reader, writer } => match (reader.take(), writer.take()) {
                (Some(r), Some(w)) => Ok((r, w)),
                _ => Err(TransportError::ConfigurationError(
                    "raw streams already consumed".to_string(),
                )),
            },
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Stdio
    }

    fn capabilities(&self) -> &TransportCapabilities {
        &self.capabilities
    }

    async fn state(&self) -> TransportState {
        self.state.lock().clone()
    }

    async fn connect(&self) -> TransportResult<()> {
        if matches!(self.state().await, TransportState::Connected) {
            return Ok(());
        }
        self.set_state(TransportState::Connecting);

        let (reader, writer) = match self.take_streams() {
            Ok(streams) => streams,
            Err(e) => {
                self.metrics.failed_connections.fetch_add(1, Ordering::Relaxed);
                self.set_state(TransportState::Failed {
                    reason: e.to_string(),
                });
                error!("failed to connect stdio transport: {}", e);
                return Err(e);
            }
        };

        *self.writer.lock().await = Some(framing::line_writer(writer));
        let tx = self.inbound.open(self.config.channel_capacity).await;
        let task = framing::spawn_reader(
            reader,
            self.config.max_message_size,
            Channel::Reply,
            tx,
            self.metrics.clone(),
            self.inbound.failure_slot(),
        );
        *self.reader_task.lock() = Some(task);

        self.metrics.connections.fetch_add(1, Ordering::Relaxed);
        self.set_state(TransportState::Connected);
        debug!("stdio transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if matches!(self.state().await, TransportState::Disconnected) {
            return Ok(());
        }
        self.set_state(TransportState::Disconnecting);

        // Dropping the writer closes our half so the peer observes EOF.
        *self.writer.lock().await = None;
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
        self.inbound.close().await;

        self.set_state(TransportState::Disconnected);
        debug!("stdio transport disconnected");
        Ok(())
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        let state = self.state().await;
        if !matches!(state, TransportState::Connected) {
            return Err(TransportError::NotConnected(state.to_string()));
        }
        let line = framing::encode_line(&message, self.config.max_message_size)?;
        if let Err(e) = framing::write_line(&self.writer, line, &self.metrics).await {
            error!("failed to send frame: {}", e);
            self.set_state(TransportState::Failed {
                reason: e.to_string(),
            });
            return Err(e);
        }
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        let result = self.inbound.next().await;
        if let Err(TransportError::ConnectionLost(reason)) = &result {
            self.set_state(TransportState::Failed {
                reason: reason.clone(),
            });
        }
        result
    }

    async fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }

    fn endpoint(&self) -> Option<String> {
        Some("stdio://".to_string())
    }
}

/// Two stdio transports wired to each other through in-memory pipes.
///
/// Frames sent on one are received by the other; disconnecting either end
/// makes the other's `receive` return `Ok(None)`.
pub fn duplex_pair() -> (StdioTransport, StdioTransport) {
    duplex_pair_with_config(TransportConfig::default())
}

/// [`duplex_pair`] with explicit limits
pub fn duplex_pair_with_config(config: TransportConfig) -> (StdioTransport, StdioTransport) {
    const PIPE_CAPACITY: usize = 64 * 1024;
    let (a_out, b_in) = tokio::io::duplex(PIPE_CAPACITY);
    let (b_out, a_in) = tokio::io::duplex(PIPE_CAPACITY);
    (
        StdioTransport::from_raw_with_config(a_in, a_out, config.clone()),
        StdioTransport::from_raw_with_config(b_in, b_out, config),
    )
}

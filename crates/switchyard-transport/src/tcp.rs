//! TCP binding with an independent push channel.
//!
//! A client opens two connections to the server and introduces each with a
//! hello line naming the channel and a shared connection id:
//!
//! ```text
//! {"channel":"rpc","session":"<uuid>"}
//! {"channel":"push","session":"<uuid>"}
//! ```
//!
//! The rpc connection carries every client frame and the server's responses.
//! Server-originated requests and notifications travel on the push connection;
//! until it attaches they are queued. The client merges both inbound streams.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex as TokioMutex, mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};
use crate::framing::{self, Inbound, LineWriter};
use crate::message::{Channel, TransportMessage};
use crate::metrics::{AtomicMetrics, TransportMetrics};
use crate::traits::Transport;
use crate::types::{TransportCapabilities, TransportConfig, TransportState, TransportType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum HelloChannel {
    Rpc,
    Push,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Hello {
    channel: HelloChannel,
    session: String,
}

async fn write_hello(stream: &mut TcpStream, hello: &Hello) -> TransportResult<()> {
    let mut line = serde_json::to_vec(hello).map_err(|e| TransportError::Framing(e.to_string()))?;
    line.push(b'\n');
    stream.write_all(&line).await?;
    stream.flush().await?;
    Ok(())
}

fn capabilities(config: &TransportConfig) -> TransportCapabilities {
    TransportCapabilities {
        max_message_size: config.max_message_size,
        supports_push_channel: true,
    }
}

/// Client end of a TCP connection
pub struct TcpTransport {
    addr: String,
    config: TransportConfig,
    capabilities: TransportCapabilities,
    state: Mutex<TransportState>,
    metrics: Arc<AtomicMetrics>,
    writer: TokioMutex<Option<LineWriter>>,
    push_keepalive: TokioMutex<Option<OwnedWriteHalf>>,
    inbound: Inbound,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("addr", &self.addr)
            .field("state", &*self.state.lock())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TcpTransport {
    /// Transport that connects to `addr` (host:port) on `connect`
    pub fn new(addr: impl Into<String>) -> Self {
        Self::with_config(addr, TransportConfig::default())
    }

    /// [`TcpTransport::new`] with explicit limits
    pub fn with_config(addr: impl Into<String>, config: TransportConfig) -> Self {
        Self {
            addr: addr.into(),
            capabilities: capabilities(&config),
            config,
            state: Mutex::new(TransportState::Disconnected),
            metrics: Arc::new(AtomicMetrics::default()),
            writer: TokioMutex::new(None),
            push_keepalive: TokioMutex::new(None),
            inbound: Inbound::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    async fn open_channels(&self) -> TransportResult<()> {
        let session = Uuid::new_v4().to_string();
        let mut rpc = TcpStream::connect(&self.addr).await?;
        write_hello(
            &mut rpc,
            &Hello {
                channel: HelloChannel::Rpc,
                session: session.clone(),
            },
        )
        .await?;
        let mut push = TcpStream::connect(&self.addr).await?;
        write_hello(
            &mut push,
            &Hello {
                channel: HelloChannel::Push,
                session,
            },
        )
        .await?;

        let (rpc_read, rpc_write) = rpc.into_split();
        let (push_read, push_write) = push.into_split();
        *self.writer.lock().await = Some(framing::line_writer(Box::pin(rpc_write)));
        *self.push_keepalive.lock().await = Some(push_write);

        let tx = self.inbound.open(self.config.channel_capacity).await;
        let push_task = framing::spawn_reader(
            push_read,
            self.config.max_message_size,
            Channel::Push,
            tx.clone(),
            self.metrics.clone(),
            self.inbound.failure_slot(),
        );
        let rpc_task = framing::spawn_reader(
            rpc_read,
            self.config.max_message_size,
            Channel::Reply,
            tx,
            self.metrics.clone(),
            self.inbound.failure_slot(),
        );
        // The rpc connection defines the session's lifetime.
        let push_abort = push_task.abort_handle();
        let watcher = tokio::spawn(async move {
            let _ = rpc_task.await;
            push_abort.abort();
        });
        let mut tasks = self.tasks.lock();
        tasks.push(push_task.abort_handle());
        tasks.push(watcher.abort_handle());
        Ok(())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Tcp
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
        *self.state.lock() = TransportState::Connecting;
        let result = match timeout(self.config.connect_timeout, self.open_channels()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(format!("connect to {}", self.addr))),
        };
        match result {
            Ok(()) => {
                self.metrics.connections.fetch_add(1, Ordering::Relaxed);
                *self.state.lock() = TransportState::Connected;
                info!(addr = %self.addr, "tcp transport connected");
                Ok(())
            }
            Err(e) => {
                self.metrics.failed_connections.fetch_add(1, Ordering::Relaxed);
                *self.state.lock() = TransportState::Failed {
                    reason: e.to_string(),
                };
                error!(addr = %self.addr, "tcp connect failed: {}", e);
                Err(match e {
                    TransportError::Io(msg) => TransportError::ConnectionFailed(msg),
                    other => other,
                })
            }
        }
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if matches!(self.state().await, TransportState::Disconnected) {
            return Ok(());
        }
        *self.state.lock() = TransportState::Disconnecting;
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.get_mut().shutdown().await;
        }
        *self.push_keepalive.lock().await = None;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.inbound.close().await;
        *self.state.lock() = TransportState::Disconnected;
        debug!(addr = %self.addr, "tcp transport disconnected");
        Ok(())
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        let state = self.state().await;
        if !matches!(state, TransportState::Connected) {
            return Err(TransportError::NotConnected(state.to_string()));
        }
        let line = framing::encode_line(&message, self.config.max_message_size)?;
        framing::write_line(&self.writer, line, &self.metrics).await
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        self.inbound.next().await
    }

    async fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }

    fn endpoint(&self) -> Option<String> {
        Some(format!("tcp://{}", self.addr))
    }
}

enum PairSlot {
    AwaitingPush(oneshot::Sender<OwnedWriteHalf>),
    ParkedPush(OwnedWriteHalf),
}

type PairTable = Arc<Mutex<HashMap<String, PairSlot>>>;

/// Listening side: accepts client connection pairs as session transports
#[derive(Debug)]
pub struct TcpServer {
    local_addr: SocketAddr,
    accepted: TokioMutex<mpsc::Receiver<TcpServerTransport>>,
    accept_task: JoinHandle<()>,
}

impl TcpServer {
    /// Bind `addr` and start accepting
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if the address cannot be bound.
    pub async fn bind(addr: &str, config: TransportConfig) -> TransportResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("bind {addr}: {e}")))?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(64);
        let pairs: PairTable = Arc::new(Mutex::new(HashMap::new()));
        let accept_task = tokio::spawn(accept_loop(listener, config, pairs, tx));
        info!(%local_addr, "tcp server listening");
        Ok(Self {
            local_addr,
            accepted: TokioMutex::new(rx),
            accept_task,
        })
    }

    /// Bound address (useful after binding port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next client; `None` once the listener stopped
    pub async fn accept(&self) -> Option<TcpServerTransport> {
        self.accepted.lock().await.recv().await
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: TransportConfig,
    pairs: PairTable,
    accepted: mpsc::Sender<TcpServerTransport>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };
        let config = config.clone();
        let pairs = pairs.clone();
        let accepted = accepted.clone();
        tokio::spawn(async move {
            if let Err(e) = introduce(stream, peer, config, pairs, accepted).await {
                warn!(%peer, "rejected tcp connection: {}", e);
            }
        });
    }
}

async fn introduce(
    stream: TcpStream,
    peer: SocketAddr,
    config: TransportConfig,
    pairs: PairTable,
    accepted: mpsc::Sender<TcpServerTransport>,
) -> TransportResult<()> {
    let (read, write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = String::new();
    match timeout(config.connect_timeout, reader.read_line(&mut line)).await {
        Ok(Ok(0)) => return Err(TransportError::Framing("closed before hello".to_string())),
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(TransportError::Timeout("hello".to_string())),
    }
    let hello: Hello = serde_json::from_str(line.trim())
        .map_err(|e| TransportError::Framing(format!("invalid hello: {e}")))?;

    match hello.channel {
        HelloChannel::Push => {
            let mut table = pairs.lock();
            match table.remove(&hello.session) {
                Some(PairSlot::AwaitingPush(waiter)) => {
                    let _ = waiter.send(write);
                }
                Some(PairSlot::ParkedPush(_)) | None => {
                    table.insert(hello.session, PairSlot::ParkedPush(write));
                }
            }
            Ok(())
        }
        HelloChannel::Rpc => {
            let (push_tx, push_rx) = oneshot::channel();
            {
                let mut table = pairs.lock();
                match table.remove(&hello.session) {
                    Some(PairSlot::ParkedPush(push)) => {
                        let _ = push_tx.send(push);
                    }
                    _ => {
                        table.insert(hello.session.clone(), PairSlot::AwaitingPush(push_tx));
                    }
                }
            }
            debug!(%peer, session = %hello.session, "accepted tcp session");
            let transport = TcpServerTransport::start(
                hello.session,
                peer,
                reader,
                write,
                push_rx,
                config,
                pairs,
            )
            .await;
            accepted
                .send(transport)
                .await
                .map_err(|_| TransportError::ConnectionFailed("server stopped".to_string()))
        }
    }
}

/// Server end of one client's connection pair
pub struct TcpServerTransport {
    session: String,
    peer: SocketAddr,
    config: TransportConfig,
    capabilities: TransportCapabilities,
    state: Mutex<TransportState>,
    metrics: Arc<AtomicMetrics>,
    writer: TokioMutex<Option<LineWriter>>,
    push: Mutex<Option<mpsc::Sender<String>>>,
    inbound: Inbound,
    tasks: Mutex<Vec<AbortHandle>>,
    pairs: PairTable,
}

impl std::fmt::Debug for TcpServerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServerTransport")
            .field("session", &self.session)
            .field("peer", &self.peer)
            .field("state", &*self.state.lock())
            .field("push_paired", &self.push.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl TcpServerTransport {
    async fn start(
        session: String,
        peer: SocketAddr,
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
        push_writer: oneshot::Receiver<OwnedWriteHalf>,
        config: TransportConfig,
        pairs: PairTable,
    ) -> Self {
        let metrics = Arc::new(AtomicMetrics::default());
        let inbound = Inbound::new();
        let tx = inbound.open(config.channel_capacity).await;
        let reader_task = framing::spawn_reader(
            reader,
            config.max_message_size,
            Channel::Reply,
            tx,
            metrics.clone(),
            inbound.failure_slot(),
        );

        let (push_tx, mut push_rx) = mpsc::channel::<String>(config.channel_capacity);
        let push_metrics = metrics.clone();
        let push_task = tokio::spawn(async move {
            let Ok(push) = push_writer.await else {
                debug!("push channel never attached");
                return;
            };
            let writer = TokioMutex::new(Some(framing::line_writer(Box::pin(push))));
            while let Some(line) = push_rx.recv().await {
                if let Err(e) = framing::write_line(&writer, line, &push_metrics).await {
                    warn!("push channel write failed: {}", e);
                    return;
                }
            }
        });

        metrics.connections.fetch_add(1, Ordering::Relaxed);
        Self {
            session,
            peer,
            capabilities: capabilities(&config),
            config,
            state: Mutex::new(TransportState::Connected),
            metrics,
            writer: TokioMutex::new(Some(framing::line_writer(Box::pin(writer)))),
            push: Mutex::new(Some(push_tx)),
            inbound,
            tasks: Mutex::new(vec![reader_task.abort_handle(), push_task.abort_handle()]),
            pairs,
        }
    }

    /// Address of the client's rpc connection
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl Transport for TcpServerTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Tcp
    }

    fn capabilities(&self) -> &TransportCapabilities {
        &self.capabilities
    }

    async fn state(&self) -> TransportState {
        self.state.lock().clone()
    }

    async fn connect(&self) -> TransportResult<()> {
        match self.state().await {
            TransportState::Connected => Ok(()),
            other => Err(TransportError::ConnectionFailed(format!(
                "accepted connection cannot be reopened ({other})"
            ))),
        }
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if matches!(self.state().await, TransportState::Disconnected) {
            return Ok(());
        }
        *self.state.lock() = TransportState::Disconnecting;
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.get_mut().shutdown().await;
        }
        self.push.lock().take();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.pairs.lock().remove(&self.session);
        self.inbound.close().await;
        *self.state.lock() = TransportState::Disconnected;
        debug!(peer = %self.peer, "tcp session closed");
        Ok(())
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        let state = self.state().await;
        if !matches!(state, TransportState::Connected) {
            return Err(TransportError::NotConnected(state.to_string()));
        }
        let line = framing::encode_line(&message, self.config.max_message_size)?;
        match message.metadata.channel {
            Channel::Reply => framing::write_line(&self.writer, line, &self.metrics).await,
            Channel::Push => {
                let push = self
                    .push
                    .lock()
                    .clone()
                    .ok_or_else(|| TransportError::NotConnected("push channel closed".to_string()))?;
                push.send(line)
                    .await
                    .map_err(|_| TransportError::SendFailed("push channel closed".to_string()))
            }
        }
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        self.inbound.next().await
    }

    async fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }

    fn endpoint(&self) -> Option<String> {
        Some(format!("tcp://{}", self.peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hello_wire_shape() {
        let hello = Hello {
            channel: HelloChannel::Push,
            session: "abc".into(),
        };
        assert_eq!(
            serde_json::to_string(&hello).unwrap(),
            r#"{"channel":"push","session":"abc"}"#
        );
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let transport = TcpTransport::new("127.0.0.1:1");
        assert!(transport.connect().await.is_err());
        assert!(matches!(transport.state().await, TransportState::Failed { .. }));
    }

    #[test]
    fn test_debug_shows_address_and_state() {
        let shown = format!("{:?}", TcpTransport::new("127.0.0.1:9"));
        assert!(shown.starts_with("TcpTransport"));
        assert!(shown.contains("127.0.0.1:9"));
        assert!(shown.contains("Disconnected"));
    }
}

//! One negotiated conversation over one transport.
//!
//! A single reader task owns `Transport::receive`. It routes responses to
//! the pending-call table, answers lifecycle methods inline and spawns a task
//! per handled request, so a slow handler never stalls the stream.
//!
//! ```text
//!  receive() ──► decode ──► Response      ──► PendingCalls::resolve
//!                      ├──► Request       ──► inline (initialize, ping, ...)
//!                      │                  └─► DispatchTable handler task
//!                      └──► Notification  ──► SessionEvent / handler task
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use switchyard_protocol::capabilities::names;
use switchyard_protocol::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use switchyard_protocol::types::{
    self, CancelledParams, Implementation, InitializeParams, InitializeResult, LogLevel,
    LoggingMessageParams, ProgressParams, ProgressToken, ResourceUriParams, SetLevelParams,
};
use switchyard_protocol::{
    CapabilitySet, ErrorKind, JsonRpcMessage, McpError, McpResult, MessageId, Role,
    SUPPORTED_VERSIONS, codec, methods, version,
};
use switchyard_transport::{Channel, Transport, TransportError, TransportMessage};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::bridge::Bridge;
use crate::config::SessionConfig;
use crate::context::RequestContext;
use crate::events::{ListKind, SessionEvent};
use crate::handler::{DispatchTable, parse_params};
use crate::lifecycle::{Lifecycle, LifecyclePhase};
use crate::pending::PendingCalls;
use crate::registry::{CapabilityRegistry, Direction, MessageKind};
use crate::subscriptions::SubscriptionSet;

type ShutdownHook = Box<dyn FnOnce(&Session) + Send>;

/// Result of a completed handshake
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiated {
    /// Agreed protocol version
    pub protocol_version: String,
    /// The peer's implementation info
    pub peer_info: Implementation,
    /// Server instructions, as seen by the client
    pub instructions: Option<String>,
}

/// Per-call overrides for an outbound request
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    timeout: Option<Option<Duration>>,
    cancel: Option<CancellationToken>,
    progress_token: Option<ProgressToken>,
}

impl RequestOptions {
    /// Session defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `Timeout` after `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(Some(timeout));
        self
    }

    /// Wait for the response indefinitely
    pub fn no_timeout(mut self) -> Self {
        self.timeout = Some(None);
        self
    }

    /// Fail with `Cancelled` when `token` fires
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Ask the peer for progress notifications under `token`
    pub fn progress_token(mut self, token: impl Into<ProgressToken>) -> Self {
        self.progress_token = Some(token.into());
        self
    }
}

/// Builder for [`Session`]
pub struct SessionBuilder {
    role: Role,
    transport: Arc<dyn Transport>,
    id: Option<String>,
    capabilities: CapabilitySet,
    implementation: Implementation,
    handlers: DispatchTable,
    config: SessionConfig,
    supported_versions: Vec<String>,
    instructions: Option<String>,
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("role", &self.role)
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .field("implementation", &self.implementation)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionBuilder {
    /// Stable session id; defaults to a random UUID
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Capabilities this side offers
    pub fn capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Name and version announced in the handshake
    pub fn implementation(mut self, implementation: Implementation) -> Self {
        self.implementation = implementation;
        self
    }

    /// Handlers for inbound requests and notifications
    pub fn handlers(mut self, handlers: DispatchTable) -> Self {
        self.handlers = handlers;
        self
    }

    /// Timeouts and limits
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Protocol versions this side accepts
    pub fn supported_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_versions = versions.into_iter().map(Into::into).collect();
        self
    }

    /// Instructions returned to clients in the handshake (server side)
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Connect the transport and start reading
    pub async fn start(self) -> McpResult<Session> {
        if self.supported_versions.is_empty()
            || !self.supported_versions.iter().all(|v| version::is_well_formed(v))
        {
            return Err(McpError::invalid_params(
                "supported versions must be non-empty YYYY-MM-DD strings",
            ));
        }

        let id = self.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let registry = CapabilityRegistry::new(self.role);
        registry.declare(self.capabilities)?;

        self.transport.connect().await.map_err(McpError::from)?;

        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));
        let inner = Inner {
            id,
            role: self.role,
            transport: self.transport,
            config: self.config,
            lifecycle: Lifecycle::new(),
            registry,
            pending: PendingCalls::new(),
            subscriptions: SubscriptionSet::new(),
            handlers: self.handlers,
            implementation: self.implementation,
            supported_versions: self.supported_versions,
            instructions: self.instructions,
            negotiated: OnceLock::new(),
            next_id: AtomicI64::new(1),
            inflight: Mutex::new(HashMap::new()),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            events,
            hooks: Mutex::new(Vec::new()),
            log_level: Mutex::new(LogLevel::Info),
            close_reason: Mutex::new(None),
        };
        let session = Session {
            inner: Arc::new(inner),
        };
        info!(
            session = %session.id(),
            role = %session.role(),
            endpoint = ?session.inner.transport.endpoint(),
            "session started"
        );
        tokio::spawn(session.clone().run());
        Ok(session)
    }
}

struct Inner {
    id: String,
    role: Role,
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    lifecycle: Lifecycle,
    registry: CapabilityRegistry,
    pending: PendingCalls,
    subscriptions: SubscriptionSet,
    handlers: DispatchTable,
    implementation: Implementation,
    supported_versions: Vec<String>,
    instructions: Option<String>,
    negotiated: OnceLock<Negotiated>,
    next_id: AtomicI64,
    inflight: Mutex<HashMap<MessageId, CancellationToken>>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
    events: broadcast::Sender<SessionEvent>,
    hooks: Mutex<Vec<ShutdownHook>>,
    log_level: Mutex<LogLevel>,
    close_reason: Mutex<Option<String>>,
}

/// Handle to a running session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("phase", &self.phase())
            .field("pending", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Start building a session for `role` over `transport`
    pub fn builder(role: Role, transport: impl Transport + 'static) -> SessionBuilder {
        Self::builder_shared(role, Arc::new(transport))
    }

    /// [`Session::builder`] for an already shared transport
    pub fn builder_shared(role: Role, transport: Arc<dyn Transport>) -> SessionBuilder {
        SessionBuilder {
            role,
            transport,
            id: None,
            capabilities: CapabilitySet::new(),
            implementation: Implementation::new("switchyard", env!("CARGO_PKG_VERSION")),
            handlers: DispatchTable::new(),
            config: SessionConfig::default(),
            supported_versions: SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
            instructions: None,
        }
    }

    /// Session id
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Which side this is
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> LifecyclePhase {
        self.inner.lifecycle.phase()
    }

    /// Whether the handshake completed and the session is not closing
    pub fn is_operational(&self) -> bool {
        self.phase() == LifecyclePhase::Operational
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Declared and negotiated capabilities
    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.inner.registry
    }

    /// This side's capabilities
    pub fn local_capabilities(&self) -> CapabilitySet {
        self.inner.registry.local().cloned().unwrap_or_default()
    }

    /// The peer's capabilities, once negotiated
    pub fn remote_capabilities(&self) -> Option<CapabilitySet> {
        self.inner.registry.remote().cloned()
    }

    /// Handshake outcome, once complete
    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.inner.negotiated.get()
    }

    /// Agreed protocol version
    pub fn protocol_version(&self) -> Option<&str> {
        self.negotiated().map(|n| n.protocol_version.as_str())
    }

    /// Resource subscriptions held by this session
    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.inner.subscriptions
    }

    /// Number of outbound requests awaiting a response
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Number of inbound requests being handled
    pub fn inflight_count(&self) -> usize {
        self.inner.inflight.lock().len()
    }

    /// Minimum level of log notifications sent to the client
    pub fn log_level(&self) -> LogLevel {
        *self.inner.log_level.lock()
    }

    /// Why the session closed, once it has
    pub fn close_reason(&self) -> Option<String> {
        self.inner.close_reason.lock().clone()
    }

    /// Stream of notifications and lifecycle events.
    ///
    /// Only events sent after this call are observed.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Server-originated calls back to the client
    pub fn bridge(&self) -> Bridge {
        Bridge::new(self.clone())
    }

    /// Run `hook` when the session enters `ShuttingDown`, or now if it
    /// already has. Each hook runs once.
    pub fn on_shutdown<F>(&self, hook: F)
    where
        F: FnOnce(&Session) + Send + 'static,
    {
        let mut hooks = self.inner.hooks.lock();
        if self.phase().is_closing() {
            drop(hooks);
            hook(self);
        } else {
            hooks.push(Box::new(hook));
        }
    }

    /// Perform the client side of the handshake
    pub async fn initialize(&self) -> McpResult<InitializeResult> {
        if self.inner.role != Role::Client {
            return Err(McpError::protocol_violation(
                "only a client initiates the handshake",
            ));
        }
        if !self
            .inner
            .lifecycle
            .advance(&[LifecyclePhase::Uninitialized], LifecyclePhase::Initializing)
        {
            return Err(McpError::protocol_violation("handshake already started"));
        }

        let requested = version::latest(&self.inner.supported_versions)
            .unwrap_or(version::LATEST_PROTOCOL_VERSION)
            .to_string();
        let params = InitializeParams {
            protocol_version: requested.clone(),
            capabilities: self.local_capabilities(),
            client_info: self.inner.implementation.clone(),
        };
        let value = self
            .call(
                methods::INITIALIZE,
                Some(serde_json::to_value(params)?),
                RequestOptions::new(),
            )
            .await?;
        let result: InitializeResult = serde_json::from_value(value).map_err(|e| {
            McpError::protocol_violation(format!("malformed initialize result: {e}"))
        })?;

        if !self
            .inner
            .supported_versions
            .iter()
            .any(|v| *v == result.protocol_version)
        {
            warn!(
                session = %self.id(),
                offered = %result.protocol_version,
                "server chose a version this client does not speak"
            );
            return Err(McpError::incompatible_version(
                &result.protocol_version,
                &self.supported_versions(),
            ));
        }

        self.inner.registry.negotiate(result.capabilities.clone())?;
        let _ = self.inner.negotiated.set(Negotiated {
            protocol_version: result.protocol_version.clone(),
            peer_info: result.server_info.clone(),
            instructions: result.instructions.clone(),
        });
        // Operational before `initialized` goes out: the server may send
        // requests as soon as it sees it.
        self.inner
            .lifecycle
            .advance(&[LifecyclePhase::Initializing], LifecyclePhase::Operational);
        self.send(JsonRpcNotification::new(methods::INITIALIZED, None).into())
            .await?;

        info!(
            session = %self.id(),
            server = %result.server_info.name,
            version = %result.protocol_version,
            "session operational"
        );
        Ok(result)
    }

    /// Send a request with the session's default timeout
    pub async fn request(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        self.request_with(method, params, RequestOptions::new()).await
    }

    /// Send a request with typed params and result
    pub async fn request_typed<P, R>(&self, method: &str, params: &P) -> McpResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let value = self
            .request(method, Some(serde_json::to_value(params)?))
            .await?;
        serde_json::from_value(value)
            .map_err(|e| McpError::protocol_violation(format!("malformed '{method}' result: {e}")))
    }

    /// Send a request with per-call options.
    ///
    /// Fails locally, without transmitting, when the phase or the declared
    /// capabilities do not allow `method`.
    pub async fn request_with(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> McpResult<Value> {
        self.admit_outbound_request(method)?;
        self.call(method, params, options).await
    }

    /// Send a notification
    pub async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        self.admit_outbound_notification(method)?;
        self.send(JsonRpcNotification::new(method, params).into()).await
    }

    /// Abandon an outbound request. The caller sees `Cancelled` and the peer
    /// is told to stop; `false` if the request had already resolved.
    pub async fn cancel(&self, id: &MessageId, reason: impl Into<String>) -> bool {
        self.abandon(id, McpError::cancelled(reason)).await
    }

    /// Subscribe to updates of `uri` (client side). Idempotent.
    pub async fn subscribe(&self, uri: &str) -> McpResult<()> {
        self.admit_outbound_request(methods::RESOURCES_SUBSCRIBE)?;
        if !self
            .inner
            .registry
            .remote()
            .is_some_and(|caps| caps.supports_subscribe(names::RESOURCES))
        {
            return Err(McpError::capability_not_declared("resources.subscribe", "peer"));
        }
        if self.inner.subscriptions.contains(uri) {
            return Ok(());
        }
        self.call(
            methods::RESOURCES_SUBSCRIBE,
            Some(json!({ "uri": uri })),
            RequestOptions::new(),
        )
        .await?;
        self.inner.subscriptions.subscribe(uri);
        Ok(())
    }

    /// Drop interest in `uri` (client side). Unknown URIs are a no-op.
    pub async fn unsubscribe(&self, uri: &str) -> McpResult<()> {
        self.admit_outbound_request(methods::RESOURCES_UNSUBSCRIBE)?;
        if !self.inner.subscriptions.unsubscribe(uri) {
            return Ok(());
        }
        self.call(
            methods::RESOURCES_UNSUBSCRIBE,
            Some(json!({ "uri": uri })),
            RequestOptions::new(),
        )
        .await?;
        Ok(())
    }

    /// Tell the client `uri` changed, if it subscribed (server side).
    /// Returns whether a notification was sent.
    pub async fn notify_resource_updated(&self, uri: &str) -> McpResult<bool> {
        if !self.inner.subscriptions.contains(uri) {
            return Ok(false);
        }
        self.notify(methods::RESOURCES_UPDATED, Some(json!({ "uri": uri })))
            .await?;
        Ok(true)
    }

    /// Announce that a catalog changed
    pub async fn notify_list_changed(&self, kind: ListKind) -> McpResult<()> {
        let (method, capability) = match kind {
            ListKind::Tools => (methods::TOOLS_LIST_CHANGED, names::TOOLS),
            ListKind::Resources => (methods::RESOURCES_LIST_CHANGED, names::RESOURCES),
            ListKind::Prompts => (methods::PROMPTS_LIST_CHANGED, names::PROMPTS),
            ListKind::Roots => (methods::ROOTS_LIST_CHANGED, names::ROOTS),
        };
        if !self
            .inner
            .registry
            .local()
            .is_some_and(|caps| caps.supports_list_changed(capability))
        {
            return Err(McpError::capability_not_declared(
                &format!("{capability}.listChanged"),
                "local side",
            ));
        }
        self.notify(method, None).await
    }

    /// Send a log record to the client if it passes the client's level
    pub async fn log(&self, level: LogLevel, logger: Option<String>, data: Value) -> McpResult<()> {
        if level < self.log_level() {
            return Ok(());
        }
        let params = LoggingMessageParams {
            level,
            logger,
            data,
        };
        self.notify(methods::MESSAGE, Some(serde_json::to_value(params)?))
            .await
    }

    /// Shut down and wait until `Closed`
    pub async fn close(&self) {
        self.shut_down("closed locally".to_string()).await;
        self.wait_closed().await;
    }

    /// Wait until the session is `Closed`
    pub async fn wait_closed(&self) {
        self.inner.lifecycle.wait_for(LifecyclePhase::Closed).await;
    }

    fn supported_versions(&self) -> Vec<&str> {
        self.inner
            .supported_versions
            .iter()
            .map(String::as_str)
            .collect()
    }

    fn admit_outbound_request(&self, method: &str) -> McpResult<()> {
        if method == methods::INITIALIZE {
            return Err(McpError::protocol_violation(
                "the handshake is sent by Session::initialize",
            ));
        }
        match self.phase() {
            LifecyclePhase::Initializing if method == methods::PING => Ok(()),
            LifecyclePhase::Uninitialized | LifecyclePhase::Initializing => {
                Err(McpError::not_initialized(method))
            }
            LifecyclePhase::Operational if method == methods::PING => Ok(()),
            LifecyclePhase::Operational => {
                self.inner
                    .registry
                    .permits(method, MessageKind::Request, Direction::Outbound)
            }
            LifecyclePhase::ShuttingDown | LifecyclePhase::Closed => {
                Err(McpError::session_closing())
            }
        }
    }

    fn admit_outbound_notification(&self, method: &str) -> McpResult<()> {
        if method == methods::INITIALIZED {
            return Err(McpError::protocol_violation(
                "'initialized' is sent by Session::initialize",
            ));
        }
        match self.phase() {
            LifecyclePhase::Initializing
                if method == methods::CANCELLED || method == methods::PROGRESS =>
            {
                Ok(())
            }
            LifecyclePhase::Uninitialized | LifecyclePhase::Initializing => {
                Err(McpError::not_initialized(method))
            }
            LifecyclePhase::Operational => {
                self.inner
                    .registry
                    .permits(method, MessageKind::Notification, Direction::Outbound)
            }
            LifecyclePhase::ShuttingDown | LifecyclePhase::Closed => {
                Err(McpError::session_closing())
            }
        }
    }

    fn admit_inbound_request(&self, method: &str) -> McpResult<()> {
        match self.phase() {
            LifecyclePhase::Uninitialized
                if method == methods::INITIALIZE && self.inner.role == Role::Server =>
            {
                Ok(())
            }
            LifecyclePhase::Uninitialized => Err(McpError::protocol_violation(format!(
                "'{method}' received before initialize"
            ))),
            _ if method == methods::INITIALIZE => Err(McpError::protocol_violation(
                "session is already initialized",
            )),
            LifecyclePhase::Initializing if method == methods::PING => Ok(()),
            LifecyclePhase::Initializing => Err(McpError::not_initialized(method)),
            LifecyclePhase::Operational if method == methods::PING => Ok(()),
            LifecyclePhase::Operational => {
                self.inner
                    .registry
                    .permits(method, MessageKind::Request, Direction::Inbound)
            }
            LifecyclePhase::ShuttingDown | LifecyclePhase::Closed => {
                Err(McpError::session_closing())
            }
        }
    }

    fn admit_inbound_notification(&self, method: &str) -> McpResult<()> {
        match self.phase() {
            LifecyclePhase::Uninitialized => Err(McpError::protocol_violation(format!(
                "'{method}' received before initialize"
            ))),
            LifecyclePhase::Initializing
                if matches!(method, methods::INITIALIZED | methods::CANCELLED | methods::PROGRESS) =>
            {
                Ok(())
            }
            LifecyclePhase::Initializing => Err(McpError::not_initialized(method)),
            LifecyclePhase::Operational if method == methods::INITIALIZED => Err(
                McpError::protocol_violation("duplicate 'initialized' notification"),
            ),
            LifecyclePhase::Operational => {
                self.inner
                    .registry
                    .permits(method, MessageKind::Notification, Direction::Inbound)
            }
            LifecyclePhase::ShuttingDown | LifecyclePhase::Closed => {
                Err(McpError::session_closing())
            }
        }
    }

    async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> McpResult<Value> {
        let id = MessageId::from(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let params = match options.progress_token {
            Some(token) => Some(attach_progress_token(params, token)),
            None => params,
        };

        let mut rx = self.inner.pending.register(id.clone(), method);
        let request = JsonRpcRequest::new(id.clone(), method, params);
        if let Err(e) = self.send(request.into()).await {
            self.inner.pending.resolve(&id, Err(e.clone()));
            return Err(e);
        }
        trace!(session = %self.id(), %id, method, "request sent");

        let timeout = options.timeout.unwrap_or(self.inner.config.request_timeout);
        let deadline = async move {
            match timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        let cancel = options.cancel.unwrap_or_default();

        tokio::select! {
            biased;
            outcome = &mut rx => return settle(outcome),
            () = deadline => {
                let err = McpError::timeout(format!("'{method}' got no response in time"));
                self.abandon(&id, err).await;
            }
            () = cancel.cancelled() => {
                self.abandon(&id, McpError::cancelled(format!("'{method}' cancelled by caller"))).await;
            }
        }
        // Whoever removed the entry resolved it; the receiver yields that.
        settle(rx.await)
    }

    async fn abandon(&self, id: &MessageId, error: McpError) -> bool {
        let reason = error.message.clone();
        if !self.inner.pending.resolve(id, Err(error)) {
            return false;
        }
        if !self.phase().is_closing() {
            let params = CancelledParams {
                request_id: id.clone(),
                reason: Some(reason),
            };
            if let Ok(params) = serde_json::to_value(params) {
                let note = JsonRpcNotification::new(methods::CANCELLED, Some(params));
                if let Err(e) = self.send(note.into()).await {
                    debug!(session = %self.id(), error = %e, "could not send cancellation");
                }
            }
        }
        true
    }

    async fn send(&self, message: JsonRpcMessage) -> McpResult<()> {
        let channel = match message {
            JsonRpcMessage::Response(_) => Channel::Reply,
            _ => Channel::Push,
        };
        let payload = codec::encode(&message)?;
        match self
            .inner
            .transport
            .send(TransportMessage::on_channel(payload, channel))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                let fatal = !matches!(
                    e,
                    TransportError::MessageTooLarge { .. } | TransportError::Framing(_)
                );
                if fatal {
                    warn!(session = %self.id(), error = %e, "transport send failed");
                    self.spawn_shutdown(format!("transport send failed: {e}"));
                }
                Err(e.into())
            }
        }
    }

    async fn respond(&self, id: MessageId, result: McpResult<Value>) {
        let response = match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(err) => JsonRpcResponse::error(id, err.into()),
        };
        if let Err(e) = self.send(response.into()).await {
            debug!(session = %self.id(), error = %e, "failed to send response");
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn spawn_shutdown(&self, reason: String) {
        let session = self.clone();
        tokio::spawn(async move { session.shut_down(reason).await });
    }

    async fn run(self) {
        let reason = loop {
            tokio::select! {
                () = self.inner.shutdown.cancelled() => break "closed locally".to_string(),
                received = self.inner.transport.receive() => match received {
                    Ok(Some(message)) => self.handle_frame(message).await,
                    Ok(None) => break "peer closed the connection".to_string(),
                    Err(e) => {
                        warn!(session = %self.id(), error = %e, "transport failed");
                        break format!("transport failed: {e}");
                    }
                },
            }
        };
        self.shut_down(reason).await;
    }

    async fn shut_down(&self, reason: String) {
        if !self.inner.lifecycle.begin_shutdown() {
            return;
        }
        info!(session = %self.id(), %reason, "session shutting down");
        *self.inner.close_reason.lock() = Some(reason.clone());

        let hooks = std::mem::take(&mut *self.inner.hooks.lock());
        for hook in hooks {
            hook(self);
        }

        // Handler tokens are children of this one.
        self.inner.shutdown.cancel();
        let failed = self.inner.pending.fail_all(&McpError::session_closing());
        if failed > 0 {
            debug!(session = %self.id(), failed, "failed pending calls");
        }

        self.inner.tasks.close();
        if tokio::time::timeout(self.inner.config.shutdown_grace, self.inner.tasks.wait())
            .await
            .is_err()
        {
            warn!(session = %self.id(), "handlers still running after shutdown grace period");
        }
        if let Err(e) = self.inner.transport.disconnect().await {
            debug!(session = %self.id(), error = %e, "transport disconnect failed");
        }

        self.inner
            .lifecycle
            .advance(&[LifecyclePhase::ShuttingDown], LifecyclePhase::Closed);
        self.emit(SessionEvent::Closed { reason });
        info!(session = %self.id(), "session closed");
    }

    async fn handle_frame(&self, message: TransportMessage) {
        let decoded = match codec::decode(&message.payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(session = %self.id(), error = %err, "rejecting undecodable frame");
                match codec::salvage_request_id(&message.payload) {
                    Some(id) => self.respond(id, Err(err)).await,
                    None if err.kind == ErrorKind::ParseError => {
                        let response = JsonRpcResponse::parse_error(err.into());
                        if let Err(e) = self.send(response.into()).await {
                            debug!(session = %self.id(), error = %e, "failed to report parse error");
                        }
                    }
                    None => {}
                }
                return;
            }
        };
        match decoded {
            JsonRpcMessage::Request(request) => self.on_request(request).await,
            JsonRpcMessage::Response(response) => self.on_response(response),
            JsonRpcMessage::Notification(notification) => self.on_notification(notification),
        }
    }

    async fn on_request(&self, request: JsonRpcRequest) {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        trace!(session = %self.id(), %id, %method, "request received");

        if let Err(err) = self.admit_inbound_request(&method) {
            debug!(session = %self.id(), %method, error = %err, "refusing request");
            self.respond(id, Err(err)).await;
            return;
        }

        match method.as_str() {
            methods::INITIALIZE => {
                let result = self.accept_initialize(params);
                self.respond(id, result).await;
            }
            methods::PING => self.respond(id, Ok(json!({}))).await,
            methods::RESOURCES_SUBSCRIBE => {
                let result = self.accept_subscription(params, true);
                self.respond(id, result).await;
            }
            methods::RESOURCES_UNSUBSCRIBE => {
                let result = self.accept_subscription(params, false);
                self.respond(id, result).await;
            }
            methods::LOGGING_SET_LEVEL => {
                let result = parse_params::<SetLevelParams>(params).map(|p| {
                    *self.inner.log_level.lock() = p.level;
                    json!({})
                });
                self.respond(id, result).await;
            }
            _ => self.spawn_handler(id, method, params).await,
        }
    }

    fn accept_initialize(&self, params: Option<Value>) -> McpResult<Value> {
        let params: InitializeParams = parse_params(params)?;
        if !self
            .inner
            .lifecycle
            .advance(&[LifecyclePhase::Uninitialized], LifecyclePhase::Initializing)
        {
            return Err(McpError::protocol_violation("session is already initialized"));
        }

        let Some(agreed) = version::negotiate(&params.protocol_version, &self.inner.supported_versions)
        else {
            warn!(
                session = %self.id(),
                requested = %params.protocol_version,
                "no common protocol version"
            );
            return Err(McpError::incompatible_version(
                &params.protocol_version,
                &self.supported_versions(),
            ));
        };
        let agreed = agreed.to_string();

        self.inner.registry.negotiate(params.capabilities)?;
        let _ = self.inner.negotiated.set(Negotiated {
            protocol_version: agreed.clone(),
            peer_info: params.client_info.clone(),
            instructions: None,
        });
        info!(
            session = %self.id(),
            client = %params.client_info.name,
            version = %agreed,
            "handshake accepted"
        );

        let result = InitializeResult {
            protocol_version: agreed,
            capabilities: self.local_capabilities(),
            server_info: self.inner.implementation.clone(),
            instructions: self.inner.instructions.clone(),
        };
        Ok(serde_json::to_value(result)?)
    }

    fn accept_subscription(&self, params: Option<Value>, subscribe: bool) -> McpResult<Value> {
        if subscribe
            && !self
                .inner
                .registry
                .local()
                .is_some_and(|caps| caps.supports_subscribe(names::RESOURCES))
        {
            return Err(McpError::capability_not_declared("resources.subscribe", "server"));
        }
        let ResourceUriParams { uri } = parse_params(params)?;
        if subscribe {
            if self.inner.subscriptions.subscribe(uri.clone()) {
                debug!(session = %self.id(), %uri, "subscribed");
            }
        } else if self.inner.subscriptions.unsubscribe(&uri) {
            debug!(session = %self.id(), %uri, "unsubscribed");
        }
        Ok(json!({}))
    }

    async fn spawn_handler(&self, id: MessageId, method: String, params: Option<Value>) {
        let Some(handler) = self.inner.handlers.request_handler(&method) else {
            self.respond(id, Err(McpError::method_not_found(&method))).await;
            return;
        };

        let token = self.inner.shutdown.child_token();
        let duplicate = {
            let mut inflight = self.inner.inflight.lock();
            if inflight.contains_key(&id) {
                true
            } else {
                inflight.insert(id.clone(), token.clone());
                false
            }
        };
        if duplicate {
            let err = McpError::protocol_violation(format!("request id {id} is already in flight"));
            self.respond(id, Err(err)).await;
            return;
        }

        let progress = types::progress_token(params.as_ref());
        let ctx = RequestContext::new(self.clone(), id.clone(), method.clone(), token.clone(), progress);
        let session = self.clone();
        self.inner.tasks.spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => None,
                result = handler(ctx, params) => Some(result),
            };
            session.inner.inflight.lock().remove(&id);
            match outcome {
                Some(result) => {
                    if let Err(err) = &result {
                        debug!(session = %session.id(), %method, error = %err, "handler failed");
                    }
                    session.respond(id, result).await;
                }
                None => debug!(session = %session.id(), %id, %method, "request cancelled, no response sent"),
            }
        });
    }

    fn on_response(&self, response: JsonRpcResponse) {
        let Some(id) = response.id.clone() else {
            warn!(
                session = %self.id(),
                error = ?response.into_result().err(),
                "peer reported an error it could not attribute to a request"
            );
            return;
        };
        let outcome = response.into_result().map_err(McpError::from);
        if !self.inner.pending.resolve(&id, outcome) {
            warn!(session = %self.id(), %id, "discarding response to unknown or completed request");
        }
    }

    fn on_notification(&self, notification: JsonRpcNotification) {
        let JsonRpcNotification { method, params, .. } = notification;
        trace!(session = %self.id(), %method, "notification received");

        if let Err(error) = self.admit_inbound_notification(&method) {
            warn!(session = %self.id(), %method, %error, "refusing notification");
            self.emit(SessionEvent::NotificationRejected { method, error });
            return;
        }

        match method.as_str() {
            methods::INITIALIZED => {
                if self.inner.role == Role::Server
                    && self.inner.registry.is_negotiated()
                    && self
                        .inner
                        .lifecycle
                        .advance(&[LifecyclePhase::Initializing], LifecyclePhase::Operational)
                {
                    info!(session = %self.id(), "session operational");
                } else {
                    warn!(session = %self.id(), "ignoring unexpected 'initialized'");
                }
            }
            methods::CANCELLED => match parse_params::<CancelledParams>(params.clone()) {
                Ok(p) => self.cancel_inbound(&p.request_id, p.reason.as_deref()),
                Err(e) => warn!(session = %self.id(), error = %e, "malformed cancellation"),
            },
            methods::PROGRESS => match parse_params::<ProgressParams>(params.clone()) {
                Ok(p) => self.emit(SessionEvent::Progress(p)),
                Err(e) => warn!(session = %self.id(), error = %e, "malformed progress"),
            },
            methods::TOOLS_LIST_CHANGED => self.emit(SessionEvent::ListChanged(ListKind::Tools)),
            methods::RESOURCES_LIST_CHANGED => {
                self.emit(SessionEvent::ListChanged(ListKind::Resources))
            }
            methods::PROMPTS_LIST_CHANGED => self.emit(SessionEvent::ListChanged(ListKind::Prompts)),
            methods::ROOTS_LIST_CHANGED => self.emit(SessionEvent::ListChanged(ListKind::Roots)),
            methods::RESOURCES_UPDATED => match parse_params::<ResourceUriParams>(params.clone()) {
                Ok(ResourceUriParams { uri }) if self.inner.subscriptions.contains(&uri) => {
                    self.emit(SessionEvent::ResourceUpdated { uri })
                }
                Ok(ResourceUriParams { uri }) => {
                    debug!(session = %self.id(), %uri, "update for unsubscribed resource dropped");
                }
                Err(e) => warn!(session = %self.id(), error = %e, "malformed resource update"),
            },
            methods::MESSAGE => match parse_params::<LoggingMessageParams>(params.clone()) {
                Ok(p) => {
                    debug!(
                        target: "switchyard::peer_log",
                        session = %self.id(),
                        level = ?p.level,
                        logger = ?p.logger,
                        data = %p.data,
                        "peer log"
                    );
                    self.emit(SessionEvent::Log(p));
                }
                Err(e) => warn!(session = %self.id(), error = %e, "malformed log message"),
            },
            _ => {}
        }

        if let Some(handler) = self.inner.handlers.notification_handler(&method) {
            let session = self.clone();
            self.inner.tasks.spawn(async move {
                if let Err(e) = handler(session.clone(), params).await {
                    warn!(session = %session.id(), %method, error = %e, "notification handler failed");
                }
            });
        }
    }

    fn cancel_inbound(&self, id: &MessageId, reason: Option<&str>) {
        match self.inner.inflight.lock().get(id) {
            Some(token) => {
                debug!(session = %self.id(), %id, ?reason, "peer cancelled request");
                token.cancel();
            }
            None => trace!(session = %self.id(), %id, "cancellation for finished request"),
        }
    }
}

fn settle(outcome: Result<McpResult<Value>, oneshot::error::RecvError>) -> McpResult<Value> {
    outcome.unwrap_or_else(|_| Err(McpError::session_closing()))
}

fn attach_progress_token(params: Option<Value>, token: ProgressToken) -> Value {
    let mut params = match params {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    let meta = params
        .entry("_meta")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if let Value::Object(meta) = meta {
        meta.insert("progressToken".to_string(), json!(token));
    }
    Value::Object(params)
}

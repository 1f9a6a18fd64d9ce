//! Client construction.

use std::sync::Arc;

use switchyard_protocol::types::Implementation;
use switchyard_protocol::{CapabilitySet, McpResult, Role, SUPPORTED_VERSIONS};
use switchyard_session::{
    BridgeInterceptor, BridgeResponder, DispatchTable, ElicitationHandler, RootsProvider,
    SamplingHandler, Session, SessionConfig,
};
use switchyard_transport::Transport;
use tracing::{info, warn};

use crate::client::Client;

/// Builder for [`Client`]
#[derive(Debug)]
pub struct ClientBuilder {
    id: Option<String>,
    implementation: Implementation,
    responder: BridgeResponder,
    handlers: DispatchTable,
    config: SessionConfig,
    supported_versions: Vec<String>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            id: None,
            implementation: Implementation::new("switchyard-client", env!("CARGO_PKG_VERSION")),
            responder: BridgeResponder::new(),
            handlers: DispatchTable::new(),
            config: SessionConfig::default(),
            supported_versions: SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
        }
    }
}

impl ClientBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Session id, used in logs and as the router key
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Client name announced in the handshake
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.implementation.name = name.into();
        self
    }

    /// Client version announced in the handshake
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.implementation.version = version.into();
        self
    }

    /// Timeouts and limits
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Protocol versions to offer, newest is requested
    pub fn supported_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_versions = versions.into_iter().map(Into::into).collect();
        self
    }

    /// Answer the server's sampling requests
    pub fn sampling(mut self, handler: Arc<dyn SamplingHandler>) -> Self {
        self.responder = self.responder.sampling(handler);
        self
    }

    /// Answer the server's elicitation requests
    pub fn elicitation(mut self, handler: Arc<dyn ElicitationHandler>) -> Self {
        self.responder = self.responder.elicitation(handler);
        self
    }

    /// Expose roots to the server
    pub fn roots(mut self, provider: Arc<dyn RootsProvider>, list_changed: bool) -> Self {
        self.responder = self.responder.roots(provider, list_changed);
        self
    }

    /// Policy applied to every bridged request before and after it is answered
    pub fn interceptor(mut self, interceptor: Arc<dyn BridgeInterceptor>) -> Self {
        self.responder = self.responder.interceptor(interceptor);
        self
    }

    /// Extra handlers for server-originated requests and notifications
    pub fn handlers(mut self, handlers: DispatchTable) -> Self {
        self.handlers = self.handlers.merge(handlers);
        self
    }

    /// Connect over `transport` and complete the handshake
    pub async fn connect(self, transport: impl Transport + 'static) -> McpResult<Client> {
        self.connect_shared(Arc::new(transport)).await
    }

    /// [`ClientBuilder::connect`] for a shared transport
    pub async fn connect_shared(self, transport: Arc<dyn Transport>) -> McpResult<Client> {
        let capabilities = self.responder.declare(CapabilitySet::new());
        let handlers = self.responder.install(self.handlers);
        let mut builder = Session::builder_shared(Role::Client, transport)
            .capabilities(capabilities)
            .implementation(self.implementation)
            .handlers(handlers)
            .config(self.config)
            .supported_versions(self.supported_versions);
        if let Some(id) = self.id {
            builder = builder.id(id);
        }
        let session = builder.start().await?;

        match session.initialize().await {
            Ok(result) => {
                info!(
                    session = %session.id(),
                    server = %result.server_info.name,
                    version = %result.protocol_version,
                    "client connected"
                );
                Ok(Client::new(session))
            }
            Err(e) => {
                warn!(session = %session.id(), error = %e, "handshake failed");
                session.close().await;
                Err(e)
            }
        }
    }
}

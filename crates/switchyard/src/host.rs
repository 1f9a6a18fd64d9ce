//! A host process: launches configured servers and routes across them.

use std::fmt;

use futures::future::join_all;
use switchyard_client::{Client, ClientBuilder, Router};
use switchyard_protocol::McpError;
use switchyard_transport::ChildProcessTransport;
use tracing::{error, info};

use crate::config::{HostConfig, ServerSpec};

/// Running host.
///
/// Servers that fail to start are reported in [`Host::failures`] and do not
/// prevent the others from being routed.
pub struct Host {
    config: HostConfig,
    router: Router,
    failures: Vec<(String, McpError)>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("servers", &self.config.servers.len())
            .field("router", &self.router)
            .field("failures", &self.failures)
            .finish()
    }
}

impl Host {
    /// Launch every configured server with default client settings
    pub async fn start(config: HostConfig) -> Self {
        Self::start_with(config, |builder| builder).await
    }

    /// Launch every configured server; `configure` adds bridge handlers or
    /// other per-client settings before each connection
    pub async fn start_with<F>(config: HostConfig, configure: F) -> Self
    where
        F: Fn(ClientBuilder) -> ClientBuilder,
    {
        let router = Router::new(config.router.clone());
        let launches = config.servers.iter().map(|server| {
            let builder = configure(
                Client::builder()
                    .id(server.id.clone())
                    .config(config.session.clone()),
            );
            launch(server, builder)
        });
        let clients = join_all(launches).await;

        let mut failures = Vec::new();
        for (server, outcome) in config.servers.iter().zip(clients) {
            let joined = match outcome {
                Ok(client) => {
                    let joined = router.add_session(client.clone()).await;
                    if joined.is_err() {
                        client.close().await;
                    }
                    joined
                }
                Err(e) => Err(e),
            };
            if let Err(e) = joined {
                error!(server = %server.id, command = %server.command, error = %e, "server unavailable");
                failures.push((server.id.clone(), e));
            }
        }
        info!(
            routed = router.session_ids().len(),
            failed = failures.len(),
            "host started"
        );
        Self {
            config,
            router,
            failures,
        }
    }

    /// The router over every running server
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Configuration the host was started with
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Servers that could not be started, with the reason
    pub fn failures(&self) -> &[(String, McpError)] {
        &self.failures
    }

    /// Close every session and stop the child processes
    pub async fn shutdown(self) {
        self.router.close_all().await;
        info!("host stopped");
    }
}

async fn launch(server: &ServerSpec, builder: ClientBuilder) -> Result<Client, McpError> {
    info!(server = %server.id, command = %server.command, "launching server");
    builder
        .connect(ChildProcessTransport::new(server.process_config()))
        .await
}

//! Child-process binding.
//!
//! Spawns a server process and speaks newline-delimited JSON over its
//! stdin/stdout. The child's stderr is a diagnostic side channel: every line is
//! re-emitted as a `tracing` event and never reaches the protocol stream.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex as TokioMutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{TransportError, TransportResult};
use crate::message::TransportMessage;
use crate::metrics::TransportMetrics;
use crate::stdio::StdioTransport;
use crate::traits::Transport;
use crate::types::{
    DEFAULT_MAX_MESSAGE_SIZE, TransportCapabilities, TransportConfig, TransportState, TransportType,
    duration_ms,
};

/// How to launch the child
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChildProcessConfig {
    /// Program to execute
    pub command: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory
    pub working_directory: Option<PathBuf>,
    /// Extra environment variables
    pub environment: BTreeMap<String, String>,
    /// Grace period between closing stdin and killing the process
    #[serde(with = "duration_ms")]
    pub shutdown_timeout: Duration,
    /// Largest frame accepted in either direction
    pub max_message_size: usize,
    /// Kill the process if the transport is dropped while it still runs
    pub kill_on_drop: bool,
}

impl Default for ChildProcessConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            working_directory: None,
            environment: BTreeMap::new(),
            shutdown_timeout: Duration::from_secs(5),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            kill_on_drop: true,
        }
    }
}

impl ChildProcessConfig {
    /// Config for `command` with default limits
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Append arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Transport to a spawned child process
#[derive(Debug)]
pub struct ChildProcessTransport {
    config: ChildProcessConfig,
    capabilities: TransportCapabilities,
    inner: Mutex<Option<Arc<StdioTransport>>>,
    child: TokioMutex<Option<Child>>,
    state: Mutex<TransportState>,
}

impl ChildProcessTransport {
    /// Transport that will spawn the process on `connect`
    pub fn new(config: ChildProcessConfig) -> Self {
        Self {
            capabilities: TransportCapabilities {
                max_message_size: config.max_message_size,
                supports_push_channel: false,
            },
            config,
            inner: Mutex::new(None),
            child: TokioMutex::new(None),
            state: Mutex::new(TransportState::Disconnected),
        }
    }

    fn inner(&self) -> TransportResult<Arc<StdioTransport>> {
        self.inner
            .lock()
            .clone()
            .ok_or_else(|| TransportError::NotConnected("child process not started".to_string()))
    }

    /// OS process id, while running
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }

    /// Whether the process is still running
    pub async fn is_process_alive(&self) -> bool {
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn spawn(&self) -> TransportResult<Child> {
        if self.config.command.is_empty() {
            return Err(TransportError::ConfigurationError(
                "command cannot be empty".to_string(),
            ));
        }
        info!(command = %self.config.command, args = ?self.config.args, "starting child process");

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.environment)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(self.config.kill_on_drop);
        if let Some(dir) = &self.config.working_directory {
            cmd.current_dir(dir);
        }

        cmd.spawn().map_err(|e| {
            error!("failed to spawn child process: {}", e);
            TransportError::ConnectionFailed(format!("failed to spawn '{}': {e}", self.config.command))
        })
    }

    async fn stop_process(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        match timeout(self.config.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => info!(%status, "child process exited"),
            Ok(Err(e)) => error!("failed to wait for child process: {}", e),
            Err(_) => {
                warn!("child process did not exit in time, killing it");
                if let Err(e) = child.kill().await {
                    error!("failed to kill child process: {}", e);
                }
            }
        }
    }
}

fn forward_stderr(stderr: tokio::process::ChildStderr, command: String) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::info!(target: "switchyard::child_stderr", command = %command, "{}", line);
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("stderr read ended: {}", e);
                    break;
                }
            }
        }
    });
}

#[async_trait]
impl Transport for ChildProcessTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::ChildProcess
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

        let mut child = match self.spawn() {
            Ok(child) => child,
            Err(e) => {
                *self.state.lock() = TransportState::Failed {
                    reason: e.to_string(),
                };
                return Err(e);
            }
        };
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(stderr, self.config.command.clone());
        }
        let config = TransportConfig {
            max_message_size: self.config.max_message_size,
            ..TransportConfig::default()
        };
        let stdio = Arc::new(StdioTransport::from_child(&mut child, config)?);
        stdio.connect().await?;

        *self.child.lock().await = Some(child);
        *self.inner.lock() = Some(stdio);
        *self.state.lock() = TransportState::Connected;
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if matches!(self.state().await, TransportState::Disconnected) {
            return Ok(());
        }
        *self.state.lock() = TransportState::Disconnecting;
        // Closing stdin asks a well-behaved server to exit on its own.
        let inner = self.inner.lock().take();
        if let Some(stdio) = inner {
            stdio.disconnect().await?;
        }
        self.stop_process().await;
        *self.state.lock() = TransportState::Disconnected;
        Ok(())
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        self.inner()?.send(message).await
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        let result = self.inner()?.receive().await;
        if let Err(e) = &result {
            *self.state.lock() = TransportState::Failed {
                reason: e.to_string(),
            };
        }
        result
    }

    async fn metrics(&self) -> TransportMetrics {
        match self.inner() {
            Ok(stdio) => stdio.metrics().await,
            Err(_) => TransportMetrics::default(),
        }
    }

    fn endpoint(&self) -> Option<String> {
        Some(format!("process://{}", self.config.command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_defaults() {
        let config = ChildProcessConfig::new("server").args(["--stdio"]);
        assert_eq!(config.args, vec!["--stdio".to_string()]);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert!(config.kill_on_drop);
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let transport = ChildProcessTransport::new(ChildProcessConfig::default());
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::ConfigurationError(_))
        ));
        assert!(matches!(transport.state().await, TransportState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_connect() {
        let transport = ChildProcessTransport::new(ChildProcessConfig::new(
            "/nonexistent/switchyard-test-binary",
        ));
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::ConnectionFailed(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cat_echoes_frames() {
        let transport = ChildProcessTransport::new(ChildProcessConfig::new("cat"));
        transport.connect().await.unwrap();
        assert!(transport.is_process_alive().await);

        transport
            .send(TransportMessage::new(r#"{"jsonrpc":"2.0","method":"x"}"#))
            .await
            .unwrap();
        let echoed = transport.receive().await.unwrap().unwrap();
        assert_eq!(&echoed.payload[..], br#"{"jsonrpc":"2.0","method":"x"}"#);

        transport.disconnect().await.unwrap();
        assert!(!transport.is_process_alive().await);
    }
}

//! Fan-out to every session a server is serving.
//!
//! Each notification goes to all target sessions at once, and each send has
//! its own deadline: a peer that stops reading is closed instead of holding
//! up delivery to the others.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use switchyard_protocol::McpResult;
use switchyard_protocol::types::LogLevel;
use switchyard_session::{ListKind, Session};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::builder::DEFAULT_SEND_TIMEOUT;

/// Live sessions of one server, keyed by session id.
///
/// Sessions leave the hub when they start shutting down.
#[derive(Debug, Clone)]
pub struct ServerHub {
    sessions: Arc<DashMap<String, Session>>,
    send_timeout: Duration,
}

impl Default for ServerHub {
    fn default() -> Self {
        Self::with_send_timeout(DEFAULT_SEND_TIMEOUT)
    }
}

impl ServerHub {
    /// Empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty hub that closes sessions whose sends take longer than `send_timeout`
    pub fn with_send_timeout(send_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            send_timeout,
        }
    }

    /// Track `session` until it shuts down
    pub fn register(&self, session: &Session) {
        self.sessions.insert(session.id().to_string(), session.clone());
        let sessions = Arc::downgrade(&self.sessions);
        session.on_shutdown(move |closing| {
            if let Some(sessions) = sessions.upgrade() {
                sessions.remove(closing.id());
            }
        });
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Session by id
    pub fn session(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    /// Snapshot of the live sessions
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }

    /// Run `send` against every target concurrently and count deliveries.
    /// A send that misses the deadline closes its session.
    async fn fan_out<F, Fut>(&self, what: &str, targets: Vec<Session>, send: F) -> usize
    where
        F: Fn(Session) -> Fut,
        Fut: Future<Output = McpResult<bool>>,
    {
        let deadline = self.send_timeout;
        let sends = targets.into_iter().map(|session| {
            let delivery = send(session.clone());
            async move {
                match timeout(deadline, delivery).await {
                    Ok(Ok(delivered)) => delivered,
                    Ok(Err(e)) => {
                        debug!(session = %session.id(), error = %e, "{what} not delivered");
                        false
                    }
                    Err(_) => {
                        warn!(
                            session = %session.id(),
                            timeout_ms = deadline.as_millis() as u64,
                            "peer stopped reading, closing session"
                        );
                        tokio::spawn(async move { session.close().await });
                        false
                    }
                }
            }
        });
        join_all(sends).await.into_iter().filter(|delivered| *delivered).count()
    }

    /// Send `notifications/resources/updated` to every session subscribed
    /// to `uri`. Returns how many sessions were notified.
    pub async fn notify_resource_changed(&self, uri: &str) -> usize {
        self.fan_out("resource update", self.sessions(), |session| async move {
            session.notify_resource_updated(uri).await
        })
        .await
    }

    /// Announce a catalog change to every operational session
    pub async fn notify_list_changed(&self, kind: ListKind) -> usize {
        let targets = self.sessions().into_iter().filter(Session::is_operational).collect();
        self.fan_out("list change", targets, |session| async move {
            session.notify_list_changed(kind).await.map(|()| true)
        })
        .await
    }

    /// Send a log record to every operational session whose level admits it
    pub async fn log(&self, level: LogLevel, logger: Option<&str>, data: Value) -> usize {
        let targets = self
            .sessions()
            .into_iter()
            .filter(|s| s.is_operational() && level >= s.log_level())
            .collect();
        self.fan_out("log record", targets, |session| {
            let logger = logger.map(str::to_string);
            let data = data.clone();
            async move { session.log(level, logger, data).await.map(|()| true) }
        })
        .await
    }

    /// Close every session
    pub async fn close_all(&self) {
        join_all(self.sessions().into_iter().map(|session| async move { session.close().await }))
            .await;
    }
}

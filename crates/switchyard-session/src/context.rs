//! Per-request context handed to handlers.

use serde_json::Value;
use switchyard_protocol::types::{ProgressParams, ProgressToken};
use switchyard_protocol::{McpResult, MessageId, methods};
use tokio_util::sync::CancellationToken;

use crate::bridge::Bridge;
use crate::session::Session;

/// What a handler knows about the request it is serving.
///
/// The cancellation token fires when the peer sends
/// `notifications/cancelled` for this request or the session shuts down.
/// A cancelled handler's result is discarded and no response is sent.
#[derive(Debug, Clone)]
pub struct RequestContext {
    session: Session,
    request_id: MessageId,
    method: String,
    cancel: CancellationToken,
    progress_token: Option<ProgressToken>,
}

impl RequestContext {
    pub(crate) fn new(
        session: Session,
        request_id: MessageId,
        method: String,
        cancel: CancellationToken,
        progress_token: Option<ProgressToken>,
    ) -> Self {
        Self {
            session,
            request_id,
            method,
            cancel,
            progress_token,
        }
    }

    /// Session the request arrived on
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Calls back into the peer (sampling, elicitation, roots)
    pub fn peer(&self) -> Bridge {
        self.session.bridge()
    }

    /// Id of the request being served
    pub fn request_id(&self) -> &MessageId {
        &self.request_id
    }

    /// Method being served
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Token that fires when the request is cancelled
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the request was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Progress token supplied by the caller, if any
    pub fn progress_token(&self) -> Option<&ProgressToken> {
        self.progress_token.as_ref()
    }

    /// Send `notifications/progress`; a no-op when the caller gave no token
    pub async fn report_progress(
        &self,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> McpResult<()> {
        let Some(token) = self.progress_token.clone() else {
            return Ok(());
        };
        let params = ProgressParams {
            progress_token: token,
            progress,
            total,
            message,
        };
        let value = serde_json::to_value(params)?;
        self.session.notify(methods::PROGRESS, Some(value)).await
    }

    /// Shorthand for a JSON-valued log record on the session
    pub async fn log(&self, level: switchyard_protocol::types::LogLevel, data: Value) -> McpResult<()> {
        self.session.log(level, None, data).await
    }
}

//! Notification payloads and small utility params.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jsonrpc::MessageId;

/// Progress token (string or number, like a request id)
pub type ProgressToken = MessageId;

/// `notifications/progress` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    /// Token from the request's `_meta.progressToken`
    pub progress_token: ProgressToken,
    /// Monotonically increasing progress value
    pub progress: f64,
    /// Total, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Status message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `notifications/cancelled` parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledParams {
    /// Id of the request being cancelled
    pub request_id: MessageId,
    /// Reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Syslog severity levels, least severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug
    Debug,
    /// Info
    Info,
    /// Notice
    Notice,
    /// Warning
    Warning,
    /// Error
    Error,
    /// Critical
    Critical,
    /// Alert
    Alert,
    /// Emergency
    Emergency,
}

/// `notifications/message` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingMessageParams {
    /// Severity
    pub level: LogLevel,
    /// Logger name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    /// Payload
    pub data: Value,
}

/// `logging/setLevel` parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetLevelParams {
    /// Minimum level to emit
    pub level: LogLevel,
}

/// Parameters of a paginated list request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedParams {
    /// Opaque cursor from the previous page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Result with no fields (`ping`, `subscribe`, `setLevel`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyResult {}

/// Progress token carried in `params._meta.progressToken`, if any
pub fn progress_token(params: Option<&Value>) -> Option<ProgressToken> {
    let token = params?.get("_meta")?.get("progressToken")?;
    serde_json::from_value(token.clone()).ok()
}

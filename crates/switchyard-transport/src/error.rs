//! Transport error types.

use switchyard_protocol::McpError;
use thiserror::Error;

/// Result alias for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Failures raised by a transport binding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// Could not establish the channel
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An established channel broke
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Operation attempted on a transport that is not connected
    #[error("transport not connected: {0}")]
    NotConnected(String),

    /// Writing a frame failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Reading a frame failed
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Frame violates the framing rules
    #[error("framing error: {0}")]
    Framing(String),

    /// Frame exceeds the configured size limit
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge {
        /// Actual size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Operation did not finish in time
    #[error("{0} timed out")]
    Timeout(String),

    /// Invalid construction parameters
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<TransportError> for McpError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(what) => McpError::timeout(format!("{what} timed out")),
            other => McpError::transport(other.to_string()),
        }
    }
}

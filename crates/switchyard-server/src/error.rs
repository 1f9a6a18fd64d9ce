//! Server error types.
//!
//! Protocol failures use the unified [`McpError`]. Tools additionally
//! distinguish a domain failure, which is reported to the caller as a
//! successful `tools/call` result with `isError: true`.

pub use switchyard_protocol::{ErrorKind, McpError, McpResult};

/// Result alias for server operations
pub type ServerResult<T> = McpResult<T>;

/// Failure returned by a tool handler
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    /// The tool ran and failed; the caller gets an `isError` result
    #[error("{0}")]
    Failed(String),
    /// The call itself is broken; the caller gets a JSON-RPC error
    #[error(transparent)]
    Protocol(#[from] McpError),
}

impl ToolError {
    /// Domain failure with a message for the caller
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_display() {
        assert_eq!(ToolError::failed("disk full").to_string(), "disk full");
        let protocol: ToolError = McpError::invalid_params("x").into();
        assert!(matches!(protocol, ToolError::Protocol(e) if e.kind == ErrorKind::InvalidParams));
    }
}

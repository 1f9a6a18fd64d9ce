//! Error taxonomy shared by every switchyard crate.
//!
//! [`McpError`] is the failure channel for protocol and transport faults. It
//! maps onto JSON-RPC error objects in both directions so a kind survives a
//! round trip across the wire. Domain failures raised by tools never use this
//! type; they travel inside a successful result flagged `isError`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jsonrpc::{JsonRpcError, codes};

/// Result type alias for protocol operations
pub type McpResult<T> = Result<T, McpError>;

/// Error classification for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    /// Malformed message, or a method that is illegal in the current phase
    ProtocolViolation,
    /// Capability-gated traffic attempted before the session is operational
    NotInitialized,
    /// No protocol version both peers speak
    IncompatibleVersion,
    /// The side that must provide a feature did not declare its capability
    CapabilityNotDeclared,
    /// No owner for the named tool, resource or prompt
    UnknownTarget,
    /// Method name not bound to any handler
    MethodNotFound,
    /// Parameters failed to deserialize or validate
    InvalidParams,
    /// Bytes were not valid JSON
    ParseError,
    /// Deadline elapsed before a response arrived
    Timeout,
    /// Call cancelled locally
    Cancelled,
    /// Session is shutting down; no further traffic is possible
    SessionClosing,
    /// The underlying channel broke
    Transport,
    /// A bridged request was declined by the user or a policy
    UserRejected,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// JSON-RPC code for this kind
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => codes::PARSE_ERROR,
            Self::ProtocolViolation => codes::INVALID_REQUEST,
            Self::MethodNotFound => codes::METHOD_NOT_FOUND,
            Self::InvalidParams => codes::INVALID_PARAMS,
            Self::Internal => codes::INTERNAL_ERROR,
            Self::UserRejected => -1,
            Self::UnknownTarget => -32001,
            Self::NotInitialized => -32002,
            Self::CapabilityNotDeclared => -32006,
            Self::IncompatibleVersion => -32007,
            Self::Timeout => -32012,
            Self::Transport => -32014,
            Self::Cancelled => -32017,
            Self::SessionClosing => -32019,
        }
    }

    /// Kind for a JSON-RPC code; unknown codes become [`ErrorKind::Internal`]
    pub fn from_code(code: i32) -> Self {
        match code {
            codes::PARSE_ERROR => Self::ParseError,
            codes::INVALID_REQUEST => Self::ProtocolViolation,
            codes::METHOD_NOT_FOUND => Self::MethodNotFound,
            codes::INVALID_PARAMS => Self::InvalidParams,
            -1 => Self::UserRejected,
            -32001 => Self::UnknownTarget,
            -32002 => Self::NotInitialized,
            -32006 => Self::CapabilityNotDeclared,
            -32007 => Self::IncompatibleVersion,
            -32012 => Self::Timeout,
            -32014 => Self::Transport,
            -32017 => Self::Cancelled,
            -32019 => Self::SessionClosing,
            _ => Self::Internal,
        }
    }

    /// Short description used in display output
    pub const fn description(self) -> &'static str {
        match self {
            Self::ProtocolViolation => "protocol violation",
            Self::NotInitialized => "session not initialized",
            Self::IncompatibleVersion => "incompatible protocol version",
            Self::CapabilityNotDeclared => "capability not declared",
            Self::UnknownTarget => "unknown target",
            Self::MethodNotFound => "method not found",
            Self::InvalidParams => "invalid params",
            Self::ParseError => "parse error",
            Self::Timeout => "timed out",
            Self::Cancelled => "cancelled",
            Self::SessionClosing => "session closing",
            Self::Transport => "transport failure",
            Self::UserRejected => "rejected by user",
            Self::Internal => "internal error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Protocol-level failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct McpError {
    /// Classification
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional structured data carried on the wire
    pub data: Option<Value>,
}

impl McpError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured data
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Protocol violation
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolViolation, message)
    }

    /// Traffic before the session is operational
    pub fn not_initialized(method: &str) -> Self {
        Self::new(
            ErrorKind::NotInitialized,
            format!("'{method}' is not permitted before initialization completes"),
        )
    }

    /// No overlapping version
    pub fn incompatible_version(requested: &str, supported: &[&str]) -> Self {
        Self::new(
            ErrorKind::IncompatibleVersion,
            format!("unsupported protocol version '{requested}'"),
        )
        .with_data(serde_json::json!({
            "requested": requested,
            "supported": supported,
        }))
    }

    /// Missing capability on the providing side
    pub fn capability_not_declared(capability: &str, side: &str) -> Self {
        Self::new(
            ErrorKind::CapabilityNotDeclared,
            format!("{side} did not declare the '{capability}' capability"),
        )
    }

    /// Unknown tool, resource or prompt
    pub fn unknown_target(name: impl fmt::Display) -> Self {
        Self::new(ErrorKind::UnknownTarget, format!("no owner for '{name}'"))
    }

    /// Method not bound
    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorKind::MethodNotFound, format!("method '{method}' not found"))
    }

    /// Invalid parameters
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    /// Invalid JSON
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, message)
    }

    /// Deadline elapsed
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Cancelled locally
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Session shutting down
    pub fn session_closing() -> Self {
        Self::new(ErrorKind::SessionClosing, "session is closing")
    }

    /// Transport failure
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// Declined by a user or interception policy
    pub fn user_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UserRejected, message)
    }

    /// Internal failure
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Whether the call failed to reach or complete, as opposed to being
    /// refused; callers may retry these.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Timeout | ErrorKind::Cancelled | ErrorKind::SessionClosing | ErrorKind::Transport
        )
    }

    /// JSON-RPC code for this error
    pub const fn code(&self) -> i32 {
        self.kind.code()
    }
}

impl From<McpError> for JsonRpcError {
    fn from(err: McpError) -> Self {
        Self {
            code: err.kind.code(),
            message: err.message,
            data: err.data,
        }
    }
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        Self {
            kind: ErrorKind::from_code(err.code),
            message: err.message,
            data: err.data,
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_eof() {
            Self::parse_error(err.to_string())
        } else {
            Self::invalid_params(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_survives_wire_round_trip() {
        for kind in [
            ErrorKind::ProtocolViolation,
            ErrorKind::NotInitialized,
            ErrorKind::IncompatibleVersion,
            ErrorKind::CapabilityNotDeclared,
            ErrorKind::UnknownTarget,
            ErrorKind::MethodNotFound,
            ErrorKind::InvalidParams,
            ErrorKind::ParseError,
            ErrorKind::Timeout,
            ErrorKind::Cancelled,
            ErrorKind::SessionClosing,
            ErrorKind::Transport,
            ErrorKind::UserRejected,
            ErrorKind::Internal,
        ] {
            let wire: JsonRpcError = McpError::new(kind, "x").into();
            assert_eq!(McpError::from(wire).kind, kind);
        }
    }

    #[test]
    fn test_unknown_code_is_internal() {
        let err = McpError::from(JsonRpcError::new(-32099, "custom"));
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.message, "custom");
    }

    #[test]
    fn test_retryable() {
        assert!(McpError::timeout("t").is_retryable());
        assert!(McpError::session_closing().is_retryable());
        assert!(!McpError::unknown_target("x").is_retryable());
        assert!(!McpError::protocol_violation("x").is_retryable());
    }

    #[test]
    fn test_display() {
        let err = McpError::method_not_found("foo/bar");
        assert_eq!(err.to_string(), "method not found: method 'foo/bar' not found");
    }
}

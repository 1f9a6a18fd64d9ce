//! # switchyard-protocol
//!
//! Wire-level vocabulary for the switchyard session runtime: JSON-RPC 2.0
//! envelopes, the message codec, the protocol error taxonomy, capability sets,
//! version negotiation and typed parameters/results for every method.
//!
//! Nothing in this crate performs I/O. Transports move bytes; sessions give
//! those bytes meaning using the types defined here.
//!
//! ```rust
//! use switchyard_protocol::{codec, jsonrpc::JsonRpcMessage};
//!
//! let msg = codec::decode(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)?;
//! assert!(matches!(msg, JsonRpcMessage::Request(_)));
//! # Ok::<(), switchyard_protocol::McpError>(())
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod capabilities;
pub mod codec;
pub mod error;
pub mod jsonrpc;
pub mod methods;
pub mod types;
pub mod version;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use capabilities::{CapabilityDescriptor, CapabilitySet};
pub use error::{ErrorKind, McpError, McpResult};
pub use jsonrpc::{JsonRpcMessage, MessageId};
pub use version::{LATEST_PROTOCOL_VERSION, SUPPORTED_VERSIONS, negotiate as negotiate_version};

/// Side of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Initiates the handshake and consumes catalogs
    Client,
    /// Answers the handshake and provides catalogs
    Server,
}

impl Role {
    /// The other side
    pub const fn peer(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Server => f.write_str("server"),
        }
    }
}

//! # switchyard-transport
//!
//! Frame-oriented duplex channels for switchyard sessions. Every binding moves
//! newline-delimited JSON frames and implements [`Transport`]:
//!
//! - [`StdioTransport`]: this process's stdin/stdout or any async read/write
//!   pair, including the in-memory [`duplex_pair`]
//! - [`ChildProcessTransport`]: spawns a server and talks over its pipes, with
//!   stderr forwarded to `tracing`
//! - [`TcpTransport`] / [`TcpServer`]: a request/response connection plus an
//!   independent server-to-client push connection
//!
//! Transports know nothing about message semantics beyond framing.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod child_process;
pub mod error;
mod framing;
pub mod message;
pub mod metrics;
pub mod stdio;
pub mod tcp;
pub mod traits;
pub mod types;

pub use child_process::{ChildProcessConfig, ChildProcessTransport};
pub use error::{TransportError, TransportResult};
pub use message::{Channel, TransportMessage, TransportMessageMetadata};
pub use metrics::{AtomicMetrics, TransportMetrics};
pub use stdio::{StdioTransport, duplex_pair, duplex_pair_with_config};
pub use tcp::{TcpServer, TcpServerTransport, TcpTransport};
pub use traits::Transport;
pub use types::{TransportCapabilities, TransportConfig, TransportState, TransportType};

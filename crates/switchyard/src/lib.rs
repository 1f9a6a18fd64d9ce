//! # switchyard
//!
//! Capability-negotiated, bidirectional JSON-RPC sessions between a host and
//! the tool servers it orchestrates.
//!
//! This crate re-exports the workspace and adds what a host process needs
//! around it: `tracing` setup ([`LoggingConfig`]), file and environment
//! configuration ([`HostConfig`]) and a [`Host`] that launches child-process
//! servers and routes calls across them.
//!
//! | Crate | Role |
//! |-------|------|
//! | [`protocol`] | message shapes, codec, errors, capabilities |
//! | [`transport`] | stdio, child-process and TCP bindings |
//! | [`session`] | lifecycle, correlation, capability gating, bridge |
//! | [`server`] | tool/resource/prompt catalogs and notification fan-out |
//! | [`client`] | typed client and multi-session router |
//!
//! ```rust,no_run
//! use switchyard::prelude::*;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HostConfig::from_file("switchyard.toml")?;
//! config.logging.init()?;
//! let host = Host::start(config).await;
//! for tool in host.router().list_tools() {
//!     println!("{}", tool.name);
//! }
//! host.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod config;
pub mod host;
pub mod logging;
pub mod prelude;

pub use switchyard_client as client;
pub use switchyard_protocol as protocol;
pub use switchyard_server as server;
pub use switchyard_session as session;
pub use switchyard_transport as transport;

pub use config::{ConfigError, HostConfig, ServerSpec};
pub use host::Host;
pub use logging::{LogOutput, LoggingConfig};

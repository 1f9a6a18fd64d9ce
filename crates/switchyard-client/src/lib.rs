//! # switchyard-client
//!
//! The client side of switchyard.
//!
//! [`Client`] wraps one session with typed catalog operations and answers
//! the server's bridged requests (sampling, elicitation, roots) through
//! handlers given to the [`ClientBuilder`]. [`Router`] merges the catalogs
//! of many clients into one and dispatches each call to the session that
//! owns the name.
//!
//! ```rust,no_run
//! use switchyard_client::{Client, CollisionPolicy, Router, RouterConfig};
//! use switchyard_transport::{ChildProcessConfig, ChildProcessTransport};
//!
//! # async fn demo() -> switchyard_protocol::McpResult<()> {
//! let files = Client::builder()
//!     .id("files")
//!     .connect(ChildProcessTransport::new(ChildProcessConfig::new("files-server")))
//!     .await?;
//! let router = Router::new(RouterConfig {
//!     collision_policy: CollisionPolicy::Priority,
//!     ..RouterConfig::default()
//! });
//! router.add_session(files).await?;
//! for tool in router.list_tools() {
//!     println!("{}", tool.name);
//! }
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

pub mod builder;
pub mod client;
pub mod router;
pub mod unified;

pub use builder::ClientBuilder;
pub use client::Client;
pub use router::{Router, RouterConfig};
pub use unified::{CollisionPolicy, Route, UnifiedCatalog};

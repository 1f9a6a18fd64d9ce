//! # switchyard-server
//!
//! Serve a catalog of tools, resources and prompts over switchyard sessions.
//!
//! A [`McpServer`] is built once and can serve many connections. Each
//! connection gets its own [`Session`](switchyard_session::Session); the
//! [`ServerHub`] tracks them so catalog changes and resource updates reach
//! every interested client.
//!
//! ```rust,no_run
//! use serde_json::json;
//! use switchyard_protocol::types::{CallToolResult, Tool};
//! use switchyard_server::McpServer;
//!
//! # async fn demo() -> switchyard_protocol::McpResult<()> {
//! let server = McpServer::builder()
//!     .name("calculator")
//!     .tool(
//!         Tool::new("add", json!({
//!             "type": "object",
//!             "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
//!             "required": ["a", "b"]
//!         })),
//!         |_ctx, args| async move {
//!             let sum = args["a"].as_f64().unwrap_or(0.0) + args["b"].as_f64().unwrap_or(0.0);
//!             Ok(CallToolResult::text(sum.to_string()))
//!         },
//!     )
//!     .build()?;
//! server.serve_stdio().await
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
pub mod catalog;
pub mod error;
pub mod hub;
mod pagination;
pub mod server;

pub use builder::ServerBuilder;
pub use catalog::{PromptFn, ResourceFn, ToolFn};
pub use error::{ServerResult, ToolError};
pub use hub::ServerHub;
pub use server::McpServer;

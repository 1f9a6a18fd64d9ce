//! Common imports.
//!
//! ```rust
//! use switchyard::prelude::*;
//! ```

pub use switchyard_client::{Client, ClientBuilder, CollisionPolicy, Router, RouterConfig};
pub use switchyard_protocol::types::{
    CallToolResult, Content, GetPromptResult, LogLevel, Prompt, PromptMessage, ReadResourceResult,
    Resource, ResourceContents, ResourceTemplate, Tool,
};
pub use switchyard_protocol::{CapabilitySet, ErrorKind, McpError, McpResult, Role};
pub use switchyard_server::{McpServer, ServerBuilder, ToolError};
pub use switchyard_session::{
    BridgeInterceptor, BridgeRequest, BridgeResponse, ElicitationHandler, Interception, ListKind,
    RequestContext, RootsProvider, SamplingHandler, Session, SessionConfig, SessionEvent,
};
pub use switchyard_transport::{
    ChildProcessConfig, ChildProcessTransport, StdioTransport, TcpServer, TcpTransport, Transport,
};

pub use crate::{Host, HostConfig, LoggingConfig, ServerSpec};

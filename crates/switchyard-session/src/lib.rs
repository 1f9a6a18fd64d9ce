//! # switchyard-session
//!
//! The session runtime: one negotiated, bidirectional conversation over one
//! [`Transport`](switchyard_transport::Transport).
//!
//! A [`Session`] owns the lifecycle state machine, the capability registry,
//! the table of outbound calls awaiting responses and the set of resource
//! subscriptions. Either side may send requests once the handshake is done;
//! capabilities declared at handshake decide which methods flow which way.
//!
//! ```rust,no_run
//! use switchyard_protocol::{CapabilitySet, Role};
//! use switchyard_session::{DispatchTable, Session};
//! use switchyard_transport::duplex_pair;
//!
//! # async fn demo() -> switchyard_protocol::McpResult<()> {
//! let (client_end, server_end) = duplex_pair();
//! let server = Session::builder(Role::Server, server_end)
//!     .capabilities(CapabilitySet::new().with_tools(false))
//!     .handlers(DispatchTable::new())
//!     .start()
//!     .await?;
//! let client = Session::builder(Role::Client, client_end).start().await?;
//! client.initialize().await?;
//! client.close().await;
//! server.wait_closed().await;
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

pub mod bridge;
pub mod config;
pub mod context;
pub mod events;
pub mod handler;
pub mod lifecycle;
pub mod pending;
pub mod registry;
pub mod session;
pub mod subscriptions;

pub use bridge::{
    Bridge, BridgeInterceptor, BridgeRequest, BridgeResponder, BridgeResponse, ElicitationHandler,
    Interception, PassThrough, RootsProvider, SamplingHandler,
};
pub use config::{RetryPolicy, SessionConfig};
pub use context::RequestContext;
pub use events::{ListKind, SessionEvent};
pub use handler::{DispatchTable, NotificationHandler, RequestHandler, parse_params};
pub use lifecycle::LifecyclePhase;
pub use pending::PendingCalls;
pub use registry::{CapabilityRegistry, Direction, MessageKind};
pub use session::{Negotiated, RequestOptions, Session, SessionBuilder};
pub use subscriptions::SubscriptionSet;

//! Notifications surfaced to the embedding application.

use switchyard_protocol::McpError;
use switchyard_protocol::types::{LoggingMessageParams, ProgressParams};

/// Which catalog a list-changed notification refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    /// Tools
    Tools,
    /// Resources
    Resources,
    /// Prompts
    Prompts,
    /// Client roots
    Roots,
}

/// Something the peer told us, or something that happened to the session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The peer's catalog changed
    ListChanged(ListKind),
    /// A subscribed resource changed
    ResourceUpdated {
        /// Resource URI
        uri: String,
    },
    /// Progress for one of our requests
    Progress(ProgressParams),
    /// Log record from the server
    Log(LoggingMessageParams),
    /// An inbound notification was refused
    NotificationRejected {
        /// Notification method
        method: String,
        /// Why it was refused
        error: McpError,
    },
    /// The session reached `Closed`
    Closed {
        /// Why it closed
        reason: String,
    },
}

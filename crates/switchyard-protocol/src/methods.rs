//! Method names and the capability that gates each one.
//!
//! Every gated method is *provided* by one side: requests are answered by the
//! provider, notifications are emitted by it. Traffic is legal only when the
//! provider's declared capability set contains the gating capability.

use crate::Role;
use crate::capabilities::names;

/// Handshake request
pub const INITIALIZE: &str = "initialize";
/// Handshake acknowledgment
pub const INITIALIZED: &str = "notifications/initialized";
/// Liveness check
pub const PING: &str = "ping";

/// List tools
pub const TOOLS_LIST: &str = "tools/list";
/// Invoke a tool
pub const TOOLS_CALL: &str = "tools/call";
/// List resources
pub const RESOURCES_LIST: &str = "resources/list";
/// List resource templates
pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
/// Read a resource
pub const RESOURCES_READ: &str = "resources/read";
/// Subscribe to a resource
pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
/// Unsubscribe from a resource
pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";
/// List prompts
pub const PROMPTS_LIST: &str = "prompts/list";
/// Render a prompt
pub const PROMPTS_GET: &str = "prompts/get";
/// Set the server's minimum log level
pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";

/// Server asks the client for an LLM completion
pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";
/// Server asks the client for user input
pub const ELICITATION_CREATE: &str = "elicitation/create";
/// Server asks the client for its roots
pub const ROOTS_LIST: &str = "roots/list";

/// Tool catalog changed
pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
/// Resource catalog changed
pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
/// One resource's content changed
pub const RESOURCES_UPDATED: &str = "notifications/resources/updated";
/// Prompt catalog changed
pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
/// Root list changed
pub const ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";
/// Log message
pub const MESSAGE: &str = "notifications/message";
/// Progress on a long-running request
pub const PROGRESS: &str = "notifications/progress";
/// Cancel an in-flight request
pub const CANCELLED: &str = "notifications/cancelled";

/// Which side provides a method and under which capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gate {
    /// Side that answers the request or emits the notification
    pub provider: Role,
    /// Capability the provider must have declared
    pub capability: &'static str,
}

const fn server(capability: &'static str) -> Option<Gate> {
    Some(Gate {
        provider: Role::Server,
        capability,
    })
}

const fn client(capability: &'static str) -> Option<Gate> {
    Some(Gate {
        provider: Role::Client,
        capability,
    })
}

/// Capability gate for `method`; `None` for lifecycle and utility methods
/// (and for methods this table does not know).
pub fn gate(method: &str) -> Option<Gate> {
    match method {
        TOOLS_LIST | TOOLS_CALL | TOOLS_LIST_CHANGED => server(names::TOOLS),
        RESOURCES_LIST
        | RESOURCES_TEMPLATES_LIST
        | RESOURCES_READ
        | RESOURCES_SUBSCRIBE
        | RESOURCES_UNSUBSCRIBE
        | RESOURCES_LIST_CHANGED
        | RESOURCES_UPDATED => server(names::RESOURCES),
        PROMPTS_LIST | PROMPTS_GET | PROMPTS_LIST_CHANGED => server(names::PROMPTS),
        LOGGING_SET_LEVEL | MESSAGE => server(names::LOGGING),
        SAMPLING_CREATE_MESSAGE => client(names::SAMPLING),
        ELICITATION_CREATE => client(names::ELICITATION),
        ROOTS_LIST | ROOTS_LIST_CHANGED => client(names::ROOTS),
        _ => None,
    }
}

/// Methods legal regardless of capabilities once the handshake allows them
pub fn is_ungated(method: &str) -> bool {
    matches!(method, INITIALIZE | INITIALIZED | PING | PROGRESS | CANCELLED)
}

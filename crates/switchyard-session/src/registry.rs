//! Declared and negotiated capabilities for one session.
//!
//! The local set is written once when the session starts; the remote set is
//! written once when the handshake completes. After that the registry is
//! read-only and every gated method is checked against it.

use std::sync::OnceLock;

use switchyard_protocol::methods::{self, Gate};
use switchyard_protocol::{CapabilitySet, McpError, McpResult, Role};

/// Which way a message travels relative to this session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by this side
    Outbound,
    /// Received from the peer
    Inbound,
}

/// Whether a message is a request or a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Expects a response
    Request,
    /// One-way
    Notification,
}

/// Capability sets for both sides of a session
#[derive(Debug)]
pub struct CapabilityRegistry {
    role: Role,
    local: OnceLock<CapabilitySet>,
    remote: OnceLock<CapabilitySet>,
}

impl CapabilityRegistry {
    /// Empty registry for a session playing `role`
    pub fn new(role: Role) -> Self {
        Self {
            role,
            local: OnceLock::new(),
            remote: OnceLock::new(),
        }
    }

    /// Record what this side offers. Allowed once.
    pub fn declare(&self, local: CapabilitySet) -> McpResult<()> {
        self.local
            .set(local)
            .map_err(|_| McpError::protocol_violation("local capabilities already declared"))
    }

    /// Record what the peer offers. Allowed once, at handshake.
    pub fn negotiate(&self, remote: CapabilitySet) -> McpResult<()> {
        self.remote
            .set(remote)
            .map_err(|_| McpError::protocol_violation("capabilities already negotiated"))
    }

    /// This side's capabilities
    pub fn local(&self) -> Option<&CapabilitySet> {
        self.local.get()
    }

    /// The peer's capabilities, once negotiated
    pub fn remote(&self) -> Option<&CapabilitySet> {
        self.remote.get()
    }

    /// Whether negotiation happened
    pub fn is_negotiated(&self) -> bool {
        self.remote.get().is_some()
    }

    /// Whether this side declared `capability`
    pub fn permits_local(&self, capability: &str) -> bool {
        self.local().is_some_and(|set| set.contains(capability))
    }

    /// Whether the peer declared `capability`
    pub fn permits_remote(&self, capability: &str) -> bool {
        self.remote().is_some_and(|set| set.contains(capability))
    }

    /// Check a gated method against the declared sets.
    ///
    /// The provider of a request is its receiver; the provider of a
    /// notification is its sender. A request flowing towards a side that
    /// does not provide it is refused as `MethodNotFound` inbound and as a
    /// protocol violation outbound. Ungated methods always pass.
    pub fn permits(&self, method: &str, kind: MessageKind, direction: Direction) -> McpResult<()> {
        let Some(Gate {
            provider,
            capability,
        }) = methods::gate(method)
        else {
            return Ok(());
        };

        let provider_is_local = match (kind, direction) {
            (MessageKind::Request, Direction::Inbound) => true,
            (MessageKind::Request, Direction::Outbound) => false,
            (MessageKind::Notification, Direction::Outbound) => true,
            (MessageKind::Notification, Direction::Inbound) => false,
        };
        let expected = if provider_is_local { self.role } else { self.role.peer() };

        if provider != expected {
            return Err(match direction {
                Direction::Inbound => McpError::method_not_found(method),
                Direction::Outbound => McpError::protocol_violation(format!(
                    "a {} may not send '{method}'",
                    self.role
                )),
            });
        }

        if provider_is_local {
            if !self.permits_local(capability) {
                return Err(McpError::capability_not_declared(capability, "local side"));
            }
        } else if !self.permits_remote(capability) {
            return Err(McpError::capability_not_declared(capability, "peer"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_protocol::ErrorKind;
    use switchyard_protocol::methods::*;

    fn client_registry(remote: CapabilitySet) -> CapabilityRegistry {
        let reg = CapabilityRegistry::new(Role::Client);
        reg.declare(CapabilitySet::new().with_roots(false)).unwrap();
        reg.negotiate(remote).unwrap();
        reg
    }

    #[test]
    fn test_declare_and_negotiate_once() {
        let reg = CapabilityRegistry::new(Role::Server);
        reg.declare(CapabilitySet::new()).unwrap();
        assert!(reg.declare(CapabilitySet::new()).is_err());
        reg.negotiate(CapabilitySet::new()).unwrap();
        let err = reg.negotiate(CapabilitySet::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProtocolViolation);
    }

    #[test]
    fn test_outbound_tool_call_needs_remote_tools() {
        let reg = client_registry(CapabilitySet::new().with_prompts(false));
        let err = reg
            .permits(TOOLS_CALL, MessageKind::Request, Direction::Outbound)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CapabilityNotDeclared);
        assert!(reg
            .permits(PROMPTS_GET, MessageKind::Request, Direction::Outbound)
            .is_ok());
    }

    #[test]
    fn test_server_sampling_needs_client_declaration() {
        let reg = CapabilityRegistry::new(Role::Server);
        reg.declare(CapabilitySet::new().with_tools(false)).unwrap();
        reg.negotiate(CapabilitySet::new().with_roots(false)).unwrap();
        let err = reg
            .permits(SAMPLING_CREATE_MESSAGE, MessageKind::Request, Direction::Outbound)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CapabilityNotDeclared);
        assert!(reg
            .permits(ROOTS_LIST, MessageKind::Request, Direction::Outbound)
            .is_ok());
    }

    #[test]
    fn test_wrong_direction() {
        let reg = client_registry(CapabilitySet::new().with_tools(false));
        let inbound = reg
            .permits(TOOLS_CALL, MessageKind::Request, Direction::Inbound)
            .unwrap_err();
        assert_eq!(inbound.kind, ErrorKind::MethodNotFound);
        let outbound = reg
            .permits(TOOLS_LIST_CHANGED, MessageKind::Notification, Direction::Outbound)
            .unwrap_err();
        assert_eq!(outbound.kind, ErrorKind::ProtocolViolation);
    }

    #[test]
    fn test_notifications_gate_on_sender() {
        let reg = client_registry(CapabilitySet::new().with_tools(true));
        assert!(reg
            .permits(TOOLS_LIST_CHANGED, MessageKind::Notification, Direction::Inbound)
            .is_ok());
        assert!(reg
            .permits(RESOURCES_UPDATED, MessageKind::Notification, Direction::Inbound)
            .is_err());
        assert!(reg
            .permits(ROOTS_LIST_CHANGED, MessageKind::Notification, Direction::Outbound)
            .is_ok());
    }

    #[test]
    fn test_ungated_methods_pass() {
        let reg = CapabilityRegistry::new(Role::Client);
        assert!(reg.permits(PING, MessageKind::Request, Direction::Outbound).is_ok());
        assert!(reg.permits("custom/thing", MessageKind::Request, Direction::Inbound).is_ok());
    }
}

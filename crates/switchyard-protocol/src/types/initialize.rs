//! Handshake messages.

use serde::{Deserialize, Serialize};

use crate::capabilities::CapabilitySet;

/// Identity metadata of a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Programmatic name
    pub name: String,
    /// Version string
    pub version: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Implementation {
    /// Name and version
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            title: None,
        }
    }
}

/// `initialize` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Newest version the initiator speaks
    pub protocol_version: String,
    /// Initiator's declared capabilities
    pub capabilities: CapabilitySet,
    /// Initiator identity
    pub client_info: Implementation,
}

/// `initialize` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Selected version
    pub protocol_version: String,
    /// Responder's declared capabilities
    pub capabilities: CapabilitySet,
    /// Responder identity
    pub server_info: Implementation,
    /// Usage hints for the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

//! Capability sets exchanged during the initialization handshake.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known capability names
pub mod names {
    /// Server exposes tools
    pub const TOOLS: &str = "tools";
    /// Server exposes resources
    pub const RESOURCES: &str = "resources";
    /// Server exposes prompts
    pub const PROMPTS: &str = "prompts";
    /// Server emits log messages and accepts a minimum level
    pub const LOGGING: &str = "logging";
    /// Client answers completion (sampling) requests
    pub const SAMPLING: &str = "sampling";
    /// Client answers user-input (elicitation) requests
    pub const ELICITATION: &str = "elicitation";
    /// Client exposes filesystem roots
    pub const ROOTS: &str = "roots";
}

/// Sub-features of one capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    /// Peer emits list-changed notifications for this primitive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
    /// Peer supports per-item subscriptions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    /// Any other sub-feature flags
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CapabilityDescriptor {
    /// Descriptor with `listChanged` set
    pub fn list_changed() -> Self {
        Self {
            list_changed: Some(true),
            ..Self::default()
        }
    }
}

/// Mapping from capability name to its descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeMap<String, CapabilityDescriptor>);

impl CapabilitySet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a capability
    pub fn with(mut self, name: impl Into<String>, descriptor: CapabilityDescriptor) -> Self {
        self.0.insert(name.into(), descriptor);
        self
    }

    /// Declare `tools`
    pub fn with_tools(self, list_changed: bool) -> Self {
        self.with(
            names::TOOLS,
            CapabilityDescriptor {
                list_changed: Some(list_changed),
                ..Default::default()
            },
        )
    }

    /// Declare `resources`
    pub fn with_resources(self, subscribe: bool, list_changed: bool) -> Self {
        self.with(
            names::RESOURCES,
            CapabilityDescriptor {
                list_changed: Some(list_changed),
                subscribe: Some(subscribe),
                ..Default::default()
            },
        )
    }

    /// Declare `prompts`
    pub fn with_prompts(self, list_changed: bool) -> Self {
        self.with(
            names::PROMPTS,
            CapabilityDescriptor {
                list_changed: Some(list_changed),
                ..Default::default()
            },
        )
    }

    /// Declare `logging`
    pub fn with_logging(self) -> Self {
        self.with(names::LOGGING, CapabilityDescriptor::default())
    }

    /// Declare `sampling`
    pub fn with_sampling(self) -> Self {
        self.with(names::SAMPLING, CapabilityDescriptor::default())
    }

    /// Declare `elicitation`
    pub fn with_elicitation(self) -> Self {
        self.with(names::ELICITATION, CapabilityDescriptor::default())
    }

    /// Declare `roots`
    pub fn with_roots(self, list_changed: bool) -> Self {
        self.with(
            names::ROOTS,
            CapabilityDescriptor {
                list_changed: Some(list_changed),
                ..Default::default()
            },
        )
    }

    /// Whether `name` is declared
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Descriptor for `name`
    pub fn get(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.0.get(name)
    }

    /// Whether `name` is declared with `subscribe: true`
    pub fn supports_subscribe(&self, name: &str) -> bool {
        self.get(name).and_then(|d| d.subscribe).unwrap_or(false)
    }

    /// Whether `name` is declared with `listChanged: true`
    pub fn supports_list_changed(&self, name: &str) -> bool {
        self.get(name).and_then(|d| d.list_changed).unwrap_or(false)
    }

    /// Declared capability names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Whether nothing is declared
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let caps = CapabilitySet::new().with_tools(true).with_sampling();
        assert_eq!(
            serde_json::to_value(&caps).unwrap(),
            json!({"sampling": {}, "tools": {"listChanged": true}})
        );
    }

    #[test]
    fn test_preserves_unknown_sub_features() {
        let caps: CapabilitySet = serde_json::from_value(json!({
            "resources": {"subscribe": true, "listChanged": false, "templates": true}
        }))
        .unwrap();
        assert!(caps.supports_subscribe(names::RESOURCES));
        assert!(!caps.supports_list_changed(names::RESOURCES));
        let desc = caps.get(names::RESOURCES).unwrap();
        assert_eq!(desc.extra.get("templates"), Some(&json!(true)));
    }

    #[test]
    fn test_missing_capability() {
        let caps = CapabilitySet::new().with_prompts(false);
        assert!(caps.contains(names::PROMPTS));
        assert!(!caps.contains(names::SAMPLING));
        assert!(!caps.supports_subscribe(names::RESOURCES));
    }
}

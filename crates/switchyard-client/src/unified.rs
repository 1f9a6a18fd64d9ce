//! The merged catalog a [`Router`](crate::Router) publishes.
//!
//! A catalog is immutable once built. Every change to a member session
//! produces a fresh one which replaces the old in a single swap.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use switchyard_protocol::types::{Prompt, Resource, Tool};
use switchyard_protocol::{McpError, McpResult};
use tracing::debug;

use crate::client::Client;

/// What to do when two sessions expose the same name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Expose every colliding entry as `<session><separator><name>`
    #[default]
    Namespace,
    /// The earliest connected session keeps the bare name
    Priority,
    /// Expose none of the colliding entries under the bare name
    RejectAmbiguous,
}

/// Destination of an exposed name
#[derive(Debug, Clone)]
pub struct Route {
    session_id: String,
    target: String,
    client: Client,
}

impl Route {
    /// Owning session
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Name (or URI) as the owning session knows it
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Client for the owning session
    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// One member's catalog as last fetched
#[derive(Debug, Clone)]
pub(crate) struct MemberCatalog {
    pub(crate) id: String,
    pub(crate) client: Client,
    pub(crate) tools: Vec<Tool>,
    pub(crate) prompts: Vec<Prompt>,
    pub(crate) resources: Vec<Resource>,
}

impl MemberCatalog {
    pub(crate) fn empty(client: Client) -> Self {
        Self {
            id: client.id().to_string(),
            client,
            tools: Vec::new(),
            prompts: Vec::new(),
            resources: Vec::new(),
        }
    }
}

trait Routable: Clone {
    const KIND: &'static str;
    fn key(&self) -> &str;
    fn renamed(&self, exposed: String) -> Self;
}

impl Routable for Tool {
    const KIND: &'static str = "tool";
    fn key(&self) -> &str {
        &self.name
    }
    fn renamed(&self, exposed: String) -> Self {
        Self {
            name: exposed,
            ..self.clone()
        }
    }
}

impl Routable for Prompt {
    const KIND: &'static str = "prompt";
    fn key(&self) -> &str {
        &self.name
    }
    fn renamed(&self, exposed: String) -> Self {
        Self {
            name: exposed,
            ..self.clone()
        }
    }
}

impl Routable for Resource {
    const KIND: &'static str = "resource";
    fn key(&self) -> &str {
        &self.uri
    }
    fn renamed(&self, exposed: String) -> Self {
        Self {
            uri: exposed,
            ..self.clone()
        }
    }
}

struct Table<T> {
    listed: Vec<T>,
    routes: HashMap<String, Route>,
    ambiguous: HashMap<String, Vec<String>>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            listed: Vec::new(),
            routes: HashMap::new(),
            ambiguous: HashMap::new(),
        }
    }
}

impl<T: Routable> Table<T> {
    fn build<'a>(
        policy: CollisionPolicy,
        separator: &str,
        entries: impl Iterator<Item = (&'a MemberCatalog, &'a [T])>,
    ) -> Self
    where
        T: 'a,
    {
        let mut unique: Vec<(&MemberCatalog, &T)> = Vec::new();
        let mut seen = HashSet::new();
        for (member, items) in entries {
            for item in items {
                if seen.insert((member.id.as_str(), item.key())) {
                    unique.push((member, item));
                }
            }
        }
        let mut owners: HashMap<&str, usize> = HashMap::new();
        for (_, item) in &unique {
            *owners.entry(item.key()).or_default() += 1;
        }

        let route = |member: &MemberCatalog, item: &T| Route {
            session_id: member.id.clone(),
            target: item.key().to_string(),
            client: member.client.clone(),
        };

        let namespaced = |member: &MemberCatalog, item: &T| {
            format!("{}{separator}{}", member.id, item.key())
        };

        // Namespaced names are reserved; a bare name equal to one of them is
        // exposed under its own namespaced name instead.
        let mut table = Self::default();
        for (member, item) in &unique {
            table.routes.insert(namespaced(*member, *item), route(*member, *item));
        }
        let reserved: HashSet<String> = table.routes.keys().cloned().collect();
        let mut bound = HashSet::new();
        for (member, item) in &unique {
            let key = item.key();
            if reserved.contains(key) {
                debug!(kind = T::KIND, name = %key, session = %member.id, "name clashes with a namespaced route");
                table.listed.push(item.renamed(namespaced(*member, *item)));
                continue;
            }
            if owners[key] == 1 {
                table.listed.push((*item).clone());
                table.routes.insert(key.to_string(), route(*member, *item));
                continue;
            }
            match policy {
                CollisionPolicy::Namespace => {
                    table.listed.push(item.renamed(namespaced(*member, *item)));
                }
                CollisionPolicy::Priority => {
                    if bound.insert(key) {
                        table.listed.push((*item).clone());
                        table.routes.insert(key.to_string(), route(*member, *item));
                    } else {
                        debug!(kind = T::KIND, name = %key, session = %member.id, "shadowed by an earlier session");
                    }
                }
                CollisionPolicy::RejectAmbiguous => {
                    table
                        .ambiguous
                        .entry(key.to_string())
                        .or_default()
                        .push(member.id.clone());
                }
            }
        }
        table
    }

    fn route(&self, name: &str) -> McpResult<&Route> {
        if let Some(route) = self.routes.get(name) {
            return Ok(route);
        }
        match self.ambiguous.get(name) {
            Some(owners) => Err(McpError::unknown_target(format!(
                "{} '{name}' is ambiguous between sessions {}",
                T::KIND,
                owners.join(", ")
            ))),
            None => Err(McpError::unknown_target(format!("{} '{name}'", T::KIND))),
        }
    }
}

/// Immutable merged view of every member's tools, prompts and resources
#[derive(Default)]
pub struct UnifiedCatalog {
    separator: String,
    sessions: Vec<(String, Client)>,
    tools: Table<Tool>,
    prompts: Table<Prompt>,
    resources: Table<Resource>,
}

impl fmt::Debug for UnifiedCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnifiedCatalog")
            .field("sessions", &self.sessions.iter().map(|(id, _)| id).collect::<Vec<_>>())
            .field("tools", &self.tools.listed.len())
            .field("prompts", &self.prompts.listed.len())
            .field("resources", &self.resources.listed.len())
            .finish()
    }
}

impl UnifiedCatalog {
    /// Merge `members`, given in connection order
    pub(crate) fn build(policy: CollisionPolicy, separator: &str, members: &[MemberCatalog]) -> Self {
        Self {
            separator: separator.to_string(),
            sessions: members.iter().map(|m| (m.id.clone(), m.client.clone())).collect(),
            tools: Table::build(policy, separator, members.iter().map(|m| (m, m.tools.as_slice()))),
            prompts: Table::build(policy, separator, members.iter().map(|m| (m, m.prompts.as_slice()))),
            resources: Table::build(
                policy,
                separator,
                members.iter().map(|m| (m, m.resources.as_slice())),
            ),
        }
    }

    /// Member session ids in connection order
    pub fn session_ids(&self) -> impl Iterator<Item = &str> {
        self.sessions.iter().map(|(id, _)| id.as_str())
    }

    /// Tools under their exposed names
    pub fn tools(&self) -> &[Tool] {
        &self.tools.listed
    }

    /// Prompts under their exposed names
    pub fn prompts(&self) -> &[Prompt] {
        &self.prompts.listed
    }

    /// Resources under their exposed URIs
    pub fn resources(&self) -> &[Resource] {
        &self.resources.listed
    }

    /// Where a tool name leads
    pub fn tool_route(&self, name: &str) -> McpResult<&Route> {
        self.tools.route(name)
    }

    /// Where a prompt name leads
    pub fn prompt_route(&self, name: &str) -> McpResult<&Route> {
        self.prompts.route(name)
    }

    /// Where a resource URI leads.
    ///
    /// URIs not in any listing, such as ones produced from a template, can
    /// still be addressed as `<session><separator><uri>`.
    pub fn resource_route(&self, uri: &str) -> McpResult<Route> {
        match self.resources.route(uri) {
            Ok(route) => Ok(route.clone()),
            Err(e) => self.namespaced(uri).ok_or(e),
        }
    }

    fn namespaced(&self, uri: &str) -> Option<Route> {
        self.sessions.iter().find_map(|(id, client)| {
            let target = uri.strip_prefix(id.as_str())?.strip_prefix(self.separator.as_str())?;
            (!target.is_empty()).then(|| Route {
                session_id: id.clone(),
                target: target.to_string(),
                client: client.clone(),
            })
        })
    }

    /// Whether nothing is exposed
    pub fn is_empty(&self) -> bool {
        self.tools.listed.is_empty() && self.prompts.listed.is_empty() && self.resources.listed.is_empty()
    }
}

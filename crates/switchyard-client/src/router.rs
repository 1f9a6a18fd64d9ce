//! One merged catalog over many client sessions.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use switchyard_protocol::capabilities::names;
use switchyard_protocol::types::{
    CallToolResult, GetPromptResult, Prompt, ReadResourceResult, Resource, Tool,
};
use switchyard_protocol::{McpError, McpResult};
use switchyard_session::{ListKind, SessionEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::unified::{CollisionPolicy, MemberCatalog, UnifiedCatalog};

/// How a [`Router`] exposes its members' catalogs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Rule for names offered by more than one session
    pub collision_policy: CollisionPolicy,
    /// Joins a session id and a name in namespaced form
    pub separator: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            collision_policy: CollisionPolicy::Namespace,
            separator: ".".to_string(),
        }
    }
}

#[derive(Debug)]
struct RouterInner {
    config: RouterConfig,
    members: Mutex<Vec<MemberCatalog>>,
    catalog: ArcSwap<UnifiedCatalog>,
}

impl RouterInner {
    fn publish(&self, members: &[MemberCatalog]) {
        let catalog = UnifiedCatalog::build(
            self.config.collision_policy,
            &self.config.separator,
            members,
        );
        self.catalog.store(Arc::new(catalog));
    }

    fn client(&self, id: &str) -> Option<Client> {
        self.members
            .lock()
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.client.clone())
    }

    fn detach(&self, id: &str) -> Option<Client> {
        let mut members = self.members.lock();
        let pos = members.iter().position(|m| m.id == id)?;
        let member = members.remove(pos);
        self.publish(&members);
        info!(session = %id, "session left the router");
        Some(member.client)
    }
}

/// Routes tool, prompt and resource calls to the session that owns them.
///
/// Members are kept in connection order, which decides precedence under
/// [`CollisionPolicy::Priority`]. A member that starts shutting down is
/// removed before its pending calls fail, so no new call can reach it.
#[derive(Debug, Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

impl Router {
    /// Empty router
    pub fn new(config: RouterConfig) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                config,
                members: Mutex::new(Vec::new()),
                catalog: ArcSwap::from_pointee(UnifiedCatalog::default()),
            }),
        }
    }

    /// Routing configuration
    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// Add a connected client and load its catalog.
    ///
    /// # Errors
    ///
    /// `InvalidParams` for an empty id, an id containing the separator or one
    /// that is already routed, or whatever the initial catalog fetch failed
    /// with; the client is not kept then.
    pub async fn add_session(&self, client: Client) -> McpResult<()> {
        let id = client.id().to_string();
        if id.is_empty() || id.contains(&self.inner.config.separator) {
            return Err(McpError::invalid_params(format!(
                "session id '{id}' must be non-empty and must not contain '{}'",
                self.inner.config.separator
            )));
        }
        {
            let mut members = self.inner.members.lock();
            if members.iter().any(|m| m.id == id) {
                return Err(McpError::invalid_params(format!("session '{id}' is already routed")));
            }
            members.push(MemberCatalog::empty(client.clone()));
        }
        let events = client.events();
        let weak = Arc::downgrade(&self.inner);
        client.session().on_shutdown(move |session| {
            if let Some(inner) = weak.upgrade() {
                inner.detach(session.id());
            }
        });

        if let Err(e) = self.refresh(&id).await {
            self.inner.detach(&id);
            return Err(e);
        }
        spawn_watcher(Arc::downgrade(&self.inner), id.clone(), events);
        info!(session = %id, "session joined the router");
        Ok(())
    }

    /// Stop routing to `id`. The session itself stays open.
    pub fn remove_session(&self, id: &str) -> Option<Client> {
        self.inner.detach(id)
    }

    /// Re-fetch one member's catalog and publish a new merged catalog
    pub async fn refresh(&self, id: &str) -> McpResult<()> {
        let client = self
            .inner
            .client(id)
            .ok_or_else(|| McpError::unknown_target(format!("session '{id}'")))?;
        let caps = client.server_capabilities();
        let tools = if caps.contains(names::TOOLS) {
            client.list_tools().await?
        } else {
            Vec::new()
        };
        let prompts = if caps.contains(names::PROMPTS) {
            client.list_prompts().await?
        } else {
            Vec::new()
        };
        let resources = if caps.contains(names::RESOURCES) {
            client.list_resources().await?
        } else {
            Vec::new()
        };

        let mut members = self.inner.members.lock();
        let Some(member) = members.iter_mut().find(|m| m.id == id) else {
            debug!(session = %id, "session left during refresh");
            return Ok(());
        };
        debug!(session = %id, tools = tools.len(), prompts = prompts.len(), resources = resources.len(), "catalog refreshed");
        member.tools = tools;
        member.prompts = prompts;
        member.resources = resources;
        self.inner.publish(&members);
        Ok(())
    }

    /// The current merged catalog
    pub fn snapshot(&self) -> Arc<UnifiedCatalog> {
        self.inner.catalog.load_full()
    }

    /// Ids of the routed sessions in connection order
    pub fn session_ids(&self) -> Vec<String> {
        self.inner.members.lock().iter().map(|m| m.id.clone()).collect()
    }

    /// Client of a routed session
    pub fn client(&self, id: &str) -> Option<Client> {
        self.inner.client(id)
    }

    /// Tools under their exposed names
    pub fn list_tools(&self) -> Vec<Tool> {
        self.snapshot().tools().to_vec()
    }

    /// Prompts under their exposed names
    pub fn list_prompts(&self) -> Vec<Prompt> {
        self.snapshot().prompts().to_vec()
    }

    /// Resources under their exposed URIs
    pub fn list_resources(&self) -> Vec<Resource> {
        self.snapshot().resources().to_vec()
    }

    /// Call a tool by its exposed name; the result is passed through as is
    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> McpResult<CallToolResult> {
        let route = self.snapshot().tool_route(name)?.clone();
        route.client().call_tool(route.target(), arguments).await
    }

    /// Render a prompt by its exposed name
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> McpResult<GetPromptResult> {
        let route = self.snapshot().prompt_route(name)?.clone();
        route.client().get_prompt(route.target(), arguments).await
    }

    /// Read a resource by its exposed URI
    pub async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        let route = self.snapshot().resource_route(uri)?;
        route.client().read_resource(route.target()).await
    }

    /// Close every member session
    pub async fn close_all(&self) {
        let clients: Vec<Client> = self.inner.members.lock().iter().map(|m| m.client.clone()).collect();
        for client in clients {
            client.close().await;
        }
    }
}

fn spawn_watcher(
    inner: Weak<RouterInner>,
    id: String,
    mut events: tokio::sync::broadcast::Receiver<SessionEvent>,
) {
    tokio::spawn(async move {
        loop {
            let stale = match events.recv().await {
                Ok(SessionEvent::ListChanged(kind)) => kind != ListKind::Roots,
                Ok(SessionEvent::Closed { .. }) | Err(RecvError::Closed) => break,
                Ok(_) => false,
                Err(RecvError::Lagged(missed)) => {
                    debug!(session = %id, missed, "router watcher lagged");
                    true
                }
            };
            if !stale {
                continue;
            }
            let Some(inner) = inner.upgrade() else { break };
            let router = Router { inner };
            if router.client(&id).is_none() {
                break;
            }
            if let Err(e) = router.refresh(&id).await {
                warn!(session = %id, error = %e, "catalog refresh failed");
            }
        }
    });
}

//! Typed client operations over one session.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use switchyard_protocol::types::{
    CallToolParams, CallToolResult, GetPromptParams, GetPromptResult, Implementation, LogLevel,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    PaginatedParams, Prompt, ReadResourceResult, Resource, ResourceTemplate, ResourceUriParams,
    SetLevelParams, Tool,
};
use switchyard_protocol::{CapabilitySet, McpError, McpResult, methods};
use switchyard_session::{Session, SessionEvent};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::builder::ClientBuilder;

/// One page of a list result
trait Page: DeserializeOwned {
    type Item;
    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

impl Page for ListToolsResult {
    type Item = Tool;
    fn into_parts(self) -> (Vec<Tool>, Option<String>) {
        (self.tools, self.next_cursor)
    }
}

impl Page for ListResourcesResult {
    type Item = Resource;
    fn into_parts(self) -> (Vec<Resource>, Option<String>) {
        (self.resources, self.next_cursor)
    }
}

impl Page for ListResourceTemplatesResult {
    type Item = ResourceTemplate;
    fn into_parts(self) -> (Vec<ResourceTemplate>, Option<String>) {
        (self.resource_templates, self.next_cursor)
    }
}

impl Page for ListPromptsResult {
    type Item = Prompt;
    fn into_parts(self) -> (Vec<Prompt>, Option<String>) {
        (self.prompts, self.next_cursor)
    }
}

/// Client half of a session with typed catalog operations.
///
/// Cloning is cheap and clones share the session.
#[derive(Debug, Clone)]
pub struct Client {
    session: Session,
}

impl Client {
    /// Start building a client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    /// The underlying session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Session id
    pub fn id(&self) -> &str {
        self.session.id()
    }

    /// Whether the session can still carry traffic
    pub fn is_operational(&self) -> bool {
        self.session.is_operational()
    }

    /// The server's name and version
    pub fn server_info(&self) -> Option<&Implementation> {
        self.session.negotiated().map(|n| &n.peer_info)
    }

    /// The server's usage instructions
    pub fn instructions(&self) -> Option<&str> {
        self.session.negotiated()?.instructions.as_deref()
    }

    /// Capabilities the server declared
    pub fn server_capabilities(&self) -> CapabilitySet {
        self.session.remote_capabilities().unwrap_or_default()
    }

    /// Notifications from the server
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.events()
    }

    async fn request<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: &P) -> McpResult<R> {
        self.session.request_typed(method, params).await
    }

    /// Follow `nextCursor` until the listing is exhausted
    async fn collect<P: Page>(&self, method: &str) -> McpResult<Vec<P::Item>> {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut params = PaginatedParams::default();
        loop {
            let page: P = self.request(method, &params).await?;
            let (mut batch, next) = page.into_parts();
            items.append(&mut batch);
            match next {
                Some(cursor) if !seen.insert(cursor.clone()) => {
                    return Err(McpError::protocol_violation(format!(
                        "{method} repeated cursor '{cursor}'"
                    )));
                }
                Some(cursor) => params.cursor = Some(cursor),
                None => return Ok(items),
            }
        }
    }

    /// Every tool the server offers
    pub async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        self.collect::<ListToolsResult>(methods::TOOLS_LIST).await
    }

    /// Invoke a tool.
    ///
    /// A tool that ran and failed yields `Ok` with
    /// [`CallToolResult::is_error`] set; `Err` means the call never reached it.
    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> McpResult<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        self.request(methods::TOOLS_CALL, &params).await
    }

    /// Every concrete resource the server offers
    pub async fn list_resources(&self) -> McpResult<Vec<Resource>> {
        self.collect::<ListResourcesResult>(methods::RESOURCES_LIST).await
    }

    /// Every resource template the server offers
    pub async fn list_resource_templates(&self) -> McpResult<Vec<ResourceTemplate>> {
        self.collect::<ListResourceTemplatesResult>(methods::RESOURCES_TEMPLATES_LIST)
            .await
    }

    /// Read a resource by URI
    pub async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        let params = ResourceUriParams { uri: uri.to_string() };
        self.request(methods::RESOURCES_READ, &params).await
    }

    /// Every prompt the server offers
    pub async fn list_prompts(&self) -> McpResult<Vec<Prompt>> {
        self.collect::<ListPromptsResult>(methods::PROMPTS_LIST).await
    }

    /// Render a prompt
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> McpResult<GetPromptResult> {
        let params = GetPromptParams {
            name: name.to_string(),
            arguments,
        };
        self.request(methods::PROMPTS_GET, &params).await
    }

    /// Receive `notifications/resources/updated` for `uri`
    pub async fn subscribe(&self, uri: &str) -> McpResult<()> {
        self.session.subscribe(uri).await
    }

    /// Stop receiving updates for `uri`
    pub async fn unsubscribe(&self, uri: &str) -> McpResult<()> {
        self.session.unsubscribe(uri).await
    }

    /// URIs this client is subscribed to
    pub fn subscriptions(&self) -> Vec<String> {
        self.session.subscriptions().snapshot()
    }

    /// Replay subscriptions held by a previous connection.
    ///
    /// Every URI is attempted; the first failure is returned after the rest
    /// have been tried. Returns how many subscriptions were restored.
    pub async fn resubscribe_all<I>(&self, uris: I) -> McpResult<usize>
    where
        I: IntoIterator<Item = String>,
    {
        let mut restored = 0;
        let mut first_error = None;
        for uri in uris {
            match self.subscribe(&uri).await {
                Ok(()) => restored += 1,
                Err(e) => {
                    warn!(session = %self.id(), %uri, error = %e, "failed to restore subscription");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(session = %self.id(), restored, "subscriptions restored");
                Ok(restored)
            }
        }
    }

    /// Round-trip a `ping`
    pub async fn ping(&self) -> McpResult<()> {
        let _: Value = self.request(methods::PING, &json!({})).await?;
        Ok(())
    }

    /// Ask the server to emit log records at `level` and above
    pub async fn set_log_level(&self, level: LogLevel) -> McpResult<()> {
        let _: Value = self.request(methods::LOGGING_SET_LEVEL, &SetLevelParams { level }).await?;
        Ok(())
    }

    /// Shut the session down and wait until it is closed
    pub async fn close(&self) {
        self.session.close().await;
    }
}

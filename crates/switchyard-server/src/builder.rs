//! Fluent construction of an [`McpServer`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use switchyard_protocol::types::{
    CallToolResult, GetPromptResult, Implementation, Prompt, ReadResourceResult, Resource,
    ResourceTemplate, Tool,
};
use switchyard_protocol::{CapabilitySet, McpError, McpResult, SUPPORTED_VERSIONS};
use switchyard_session::{RequestContext, SessionConfig};

use crate::catalog::{
    Catalog, PromptEntry, ResourceEntry, TemplateEntry, ToolEntry, boxed_prompt, boxed_reader,
    boxed_tool,
};
use crate::error::ToolError;
use crate::hub::ServerHub;
use crate::server::{McpServer, ServerInner};

/// How long a notification may wait on one peer before the hub gives up on it
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for [`McpServer`].
///
/// Registration problems (bad schemas, duplicate names) are collected and
/// reported by [`ServerBuilder::build`].
#[derive(Debug)]
pub struct ServerBuilder {
    implementation: Implementation,
    instructions: Option<String>,
    catalog: Catalog,
    errors: Vec<McpError>,
    page_size: Option<usize>,
    session_config: SessionConfig,
    supported_versions: Vec<String>,
    list_changed: bool,
    resource_subscriptions: bool,
    logging: bool,
    send_timeout: Duration,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            implementation: Implementation::new("switchyard-server", env!("CARGO_PKG_VERSION")),
            instructions: None,
            catalog: Catalog::default(),
            errors: Vec::new(),
            page_size: None,
            session_config: SessionConfig::default(),
            supported_versions: SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
            list_changed: false,
            resource_subscriptions: true,
            logging: true,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

impl ServerBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Server name announced in the handshake
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.implementation.name = name.into();
        self
    }

    /// Server version announced in the handshake
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.implementation.version = version.into();
        self
    }

    /// Usage instructions for clients
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Split listings into pages of `size` entries
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Timeouts and limits for every session
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Protocol versions to accept
    pub fn supported_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_versions = versions.into_iter().map(Into::into).collect();
        self
    }

    /// Allow the catalog to change after [`ServerBuilder::build`].
    ///
    /// Tools, resources and prompts are then all declared with
    /// `listChanged`, even when empty, and the `add_*`/`remove_*` methods of
    /// [`McpServer`] announce each change to every session.
    pub fn list_changed(mut self, enabled: bool) -> Self {
        self.list_changed = enabled;
        self
    }

    /// Deadline for delivering one hub notification to one session. A
    /// session that misses it is closed.
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Advertise resource subscriptions
    pub fn resource_subscriptions(mut self, enabled: bool) -> Self {
        self.resource_subscriptions = enabled;
        self
    }

    /// Advertise the logging capability
    pub fn logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    /// Register a tool taking raw JSON arguments
    pub fn tool<F, Fut>(mut self, tool: Tool, handler: F) -> Self
    where
        F: Fn(RequestContext, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult, ToolError>> + Send + 'static,
    {
        match ToolEntry::new(tool, boxed_tool(handler)) {
            Ok(entry) => self.catalog.tools.push(Arc::new(entry)),
            Err(e) => self.errors.push(e),
        }
        self
    }

    /// Register a tool whose arguments deserialize into `A`.
    ///
    /// Arguments that pass the schema but not deserialization are reported
    /// as a tool failure.
    pub fn tool_typed<A, F, Fut>(self, tool: Tool, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(RequestContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult, ToolError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.tool(tool, move |ctx, args| {
            let handler = handler.clone();
            async move {
                let args: A = serde_json::from_value(Value::Object(args))
                    .map_err(|e| ToolError::failed(format!("invalid arguments: {e}")))?;
                handler(ctx, args).await
            }
        })
    }

    /// Register a resource with a fixed URI
    pub fn resource<F, Fut>(mut self, resource: Resource, reader: F) -> Self
    where
        F: Fn(RequestContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<ReadResourceResult>> + Send + 'static,
    {
        self.catalog.resources.push(ResourceEntry {
            resource,
            reader: boxed_reader(reader),
        });
        self
    }

    /// Register a family of resources matched by a URI template
    pub fn resource_template<F, Fut>(mut self, template: ResourceTemplate, reader: F) -> Self
    where
        F: Fn(RequestContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<ReadResourceResult>> + Send + 'static,
    {
        self.catalog.templates.push(TemplateEntry {
            template,
            reader: boxed_reader(reader),
        });
        self
    }

    /// Register a prompt
    pub fn prompt<F, Fut>(mut self, prompt: Prompt, renderer: F) -> Self
    where
        F: Fn(RequestContext, HashMap<String, String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<GetPromptResult>> + Send + 'static,
    {
        self.catalog.prompts.push(PromptEntry {
            prompt,
            renderer: boxed_prompt(renderer),
        });
        self
    }

    fn capabilities(&self) -> CapabilitySet {
        let mut caps = CapabilitySet::new();
        if self.list_changed || !self.catalog.tools.is_empty() {
            caps = caps.with_tools(self.list_changed);
        }
        if self.list_changed
            || !self.catalog.resources.is_empty()
            || !self.catalog.templates.is_empty()
        {
            caps = caps.with_resources(self.resource_subscriptions, self.list_changed);
        }
        if self.list_changed || !self.catalog.prompts.is_empty() {
            caps = caps.with_prompts(self.list_changed);
        }
        if self.logging {
            caps = caps.with_logging();
        }
        caps
    }

    /// Validate the registrations and produce the server
    pub fn build(mut self) -> McpResult<McpServer> {
        if let Some(first) = self.errors.drain(..).next() {
            return Err(first);
        }
        self.catalog.check_unique()?;
        let capabilities = self.capabilities();
        Ok(McpServer::from_parts(
            ServerInner {
                implementation: self.implementation,
                instructions: self.instructions,
                capabilities,
                catalog: ArcSwap::from_pointee(self.catalog),
                dynamic: self.list_changed,
                edits: Mutex::new(()),
                page_size: self.page_size,
                session_config: self.session_config,
                supported_versions: self.supported_versions,
            },
            ServerHub::with_send_timeout(self.send_timeout),
        ))
    }
}

//! The server: a catalog plus the dispatch table that serves it to every
//! session.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use switchyard_protocol::types::{
    CallToolParams, CallToolResult, GetPromptParams, GetPromptResult, Implementation,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    PaginatedParams, Prompt, ReadResourceResult, Resource, ResourceUriParams, Tool,
};
use switchyard_protocol::capabilities::names;
use switchyard_protocol::{CapabilitySet, McpError, McpResult, Role, methods};
use switchyard_session::{DispatchTable, ListKind, RequestContext, Session, SessionConfig};
use switchyard_transport::{StdioTransport, TcpServer, Transport};
use tracing::{debug, info, warn};

use crate::builder::ServerBuilder;
use crate::catalog::{
    Catalog, PromptEntry, ResourceEntry, ToolEntry, boxed_prompt, boxed_reader, boxed_tool,
};
use crate::error::ToolError;
use crate::hub::ServerHub;
use crate::pagination::paginate;

pub(crate) struct ServerInner {
    pub(crate) implementation: Implementation,
    pub(crate) instructions: Option<String>,
    pub(crate) capabilities: CapabilitySet,
    pub(crate) catalog: ArcSwap<Catalog>,
    pub(crate) dynamic: bool,
    pub(crate) edits: Mutex<()>,
    pub(crate) page_size: Option<usize>,
    pub(crate) session_config: SessionConfig,
    pub(crate) supported_versions: Vec<String>,
}

/// A server ready to serve any number of sessions.
///
/// Cloning is cheap; clones share the catalog and the [`ServerHub`].
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
    hub: ServerHub,
}

impl fmt::Debug for McpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpServer")
            .field("implementation", &self.inner.implementation)
            .field("catalog", &*self.inner.catalog.load())
            .field("sessions", &self.hub.session_count())
            .finish_non_exhaustive()
    }
}

impl McpServer {
    /// Start building a server
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub(crate) fn from_parts(inner: ServerInner, hub: ServerHub) -> Self {
        Self {
            inner: Arc::new(inner),
            hub,
        }
    }

    /// Name and version announced in the handshake
    pub fn implementation(&self) -> &Implementation {
        &self.inner.implementation
    }

    /// Capabilities derived from the catalog
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.inner.capabilities
    }

    /// Registered tools
    pub fn tools(&self) -> Vec<Tool> {
        self.inner.catalog.load().tools.iter().map(|t| t.tool.clone()).collect()
    }

    /// Register a tool on the running server and tell every session.
    ///
    /// # Errors
    ///
    /// `CapabilityNotDeclared` unless built with
    /// [`ServerBuilder::list_changed`], `InvalidParams` for a bad schema or a
    /// name already in use.
    pub async fn add_tool<F, Fut>(&self, tool: Tool, handler: F) -> McpResult<()>
    where
        F: Fn(RequestContext, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult, ToolError>> + Send + 'static,
    {
        let entry = Arc::new(ToolEntry::new(tool, boxed_tool(handler))?);
        self.edit(ListKind::Tools, |catalog| {
            if catalog.tool(&entry.tool.name).is_some() {
                return Err(McpError::invalid_params(format!(
                    "duplicate tool '{}'",
                    entry.tool.name
                )));
            }
            catalog.tools.push(entry);
            Ok(true)
        })
        .await
        .map(drop)
    }

    /// Unregister a tool. Returns whether it existed.
    pub async fn remove_tool(&self, name: &str) -> McpResult<bool> {
        self.edit(ListKind::Tools, |catalog| {
            let before = catalog.tools.len();
            catalog.tools.retain(|t| t.tool.name != name);
            Ok(catalog.tools.len() != before)
        })
        .await
    }

    /// Register a fixed-URI resource on the running server
    pub async fn add_resource<F, Fut>(&self, resource: Resource, reader: F) -> McpResult<()>
    where
        F: Fn(RequestContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<ReadResourceResult>> + Send + 'static,
    {
        let entry = ResourceEntry {
            resource,
            reader: boxed_reader(reader),
        };
        self.edit(ListKind::Resources, |catalog| {
            if catalog.resources.iter().any(|r| r.resource.uri == entry.resource.uri) {
                return Err(McpError::invalid_params(format!(
                    "duplicate resource '{}'",
                    entry.resource.uri
                )));
            }
            catalog.resources.push(entry);
            Ok(true)
        })
        .await
        .map(drop)
    }

    /// Unregister a resource by URI. Returns whether it existed.
    pub async fn remove_resource(&self, uri: &str) -> McpResult<bool> {
        self.edit(ListKind::Resources, |catalog| {
            let before = catalog.resources.len();
            catalog.resources.retain(|r| r.resource.uri != uri);
            Ok(catalog.resources.len() != before)
        })
        .await
    }

    /// Register a prompt on the running server
    pub async fn add_prompt<F, Fut>(&self, prompt: Prompt, renderer: F) -> McpResult<()>
    where
        F: Fn(RequestContext, HashMap<String, String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<GetPromptResult>> + Send + 'static,
    {
        let entry = PromptEntry {
            prompt,
            renderer: boxed_prompt(renderer),
        };
        self.edit(ListKind::Prompts, |catalog| {
            if catalog.prompt(&entry.prompt.name).is_some() {
                return Err(McpError::invalid_params(format!(
                    "duplicate prompt '{}'",
                    entry.prompt.name
                )));
            }
            catalog.prompts.push(entry);
            Ok(true)
        })
        .await
        .map(drop)
    }

    /// Unregister a prompt. Returns whether it existed.
    pub async fn remove_prompt(&self, name: &str) -> McpResult<bool> {
        self.edit(ListKind::Prompts, |catalog| {
            let before = catalog.prompts.len();
            catalog.prompts.retain(|p| p.prompt.name != name);
            Ok(catalog.prompts.len() != before)
        })
        .await
    }

    /// Apply `change` to a copy of the catalog, publish it, and announce it
    /// when `change` reports a difference.
    async fn edit<F>(&self, kind: ListKind, change: F) -> McpResult<bool>
    where
        F: FnOnce(&mut Catalog) -> McpResult<bool>,
    {
        if !self.inner.dynamic {
            let capability = match kind {
                ListKind::Tools => names::TOOLS,
                ListKind::Resources => names::RESOURCES,
                ListKind::Prompts => names::PROMPTS,
                ListKind::Roots => names::ROOTS,
            };
            return Err(McpError::capability_not_declared(
                &format!("{capability}.listChanged"),
                "server",
            ));
        }
        let changed = {
            let _serialized = self.inner.edits.lock();
            let mut next = Catalog::clone(&self.inner.catalog.load());
            let changed = change(&mut next)?;
            if changed {
                self.inner.catalog.store(Arc::new(next));
            }
            changed
        };
        if changed {
            let notified = self.hub.notify_list_changed(kind).await;
            debug!(?kind, notified, "catalog changed");
        }
        Ok(changed)
    }

    /// Sessions currently being served
    pub fn hub(&self) -> &ServerHub {
        &self.hub
    }

    /// Request handlers for every catalog method
    pub fn dispatch_table(&self) -> DispatchTable {
        let server = self.inner.clone();
        let table = DispatchTable::new();

        let s = server.clone();
        let table = table.on_typed(methods::TOOLS_LIST, move |_ctx, params: PaginatedParams| {
            let s = s.clone();
            async move {
                let tools: Vec<Tool> =
                    s.catalog.load().tools.iter().map(|t| t.tool.clone()).collect();
                let (tools, next_cursor) = paginate(&tools, params.cursor.as_deref(), s.page_size)?;
                Ok(ListToolsResult { tools, next_cursor })
            }
        });

        let s = server.clone();
        let table = table.on_typed(methods::TOOLS_CALL, move |ctx, params: CallToolParams| {
            let s = s.clone();
            async move { call_tool(&s, ctx, params).await }
        });

        let s = server.clone();
        let table = table.on_typed(methods::RESOURCES_LIST, move |_ctx, params: PaginatedParams| {
            let s = s.clone();
            async move {
                let resources: Vec<_> =
                    s.catalog.load().resources.iter().map(|r| r.resource.clone()).collect();
                let (resources, next_cursor) =
                    paginate(&resources, params.cursor.as_deref(), s.page_size)?;
                Ok(ListResourcesResult {
                    resources,
                    next_cursor,
                })
            }
        });

        let s = server.clone();
        let table = table.on_typed(
            methods::RESOURCES_TEMPLATES_LIST,
            move |_ctx, params: PaginatedParams| {
                let s = s.clone();
                async move {
                    let templates: Vec<_> =
                        s.catalog.load().templates.iter().map(|t| t.template.clone()).collect();
                    let (resource_templates, next_cursor) =
                        paginate(&templates, params.cursor.as_deref(), s.page_size)?;
                    Ok(ListResourceTemplatesResult {
                        resource_templates,
                        next_cursor,
                    })
                }
            },
        );

        let s = server.clone();
        let table = table.on_typed(methods::RESOURCES_READ, move |ctx, params: ResourceUriParams| {
            let s = s.clone();
            async move { read_resource(&s, ctx, params.uri).await }
        });

        let s = server.clone();
        let table = table.on_typed(methods::PROMPTS_LIST, move |_ctx, params: PaginatedParams| {
            let s = s.clone();
            async move {
                let prompts: Vec<_> =
                    s.catalog.load().prompts.iter().map(|p| p.prompt.clone()).collect();
                let (prompts, next_cursor) =
                    paginate(&prompts, params.cursor.as_deref(), s.page_size)?;
                Ok(ListPromptsResult {
                    prompts,
                    next_cursor,
                })
            }
        });

        let s = server;
        table.on_typed(methods::PROMPTS_GET, move |ctx, params: GetPromptParams| {
            let s = s.clone();
            async move { get_prompt(&s, ctx, params).await }
        })
    }

    /// Serve one connection until the peer or the server closes it.
    ///
    /// The returned session is already registered with the hub and waits
    /// for the client's `initialize`.
    pub async fn serve(&self, transport: impl Transport + 'static) -> McpResult<Session> {
        self.serve_shared(Arc::new(transport)).await
    }

    /// [`McpServer::serve`] for a shared transport
    pub async fn serve_shared(&self, transport: Arc<dyn Transport>) -> McpResult<Session> {
        let mut builder = Session::builder_shared(Role::Server, transport)
            .capabilities(self.inner.capabilities.clone())
            .implementation(self.inner.implementation.clone())
            .handlers(self.dispatch_table())
            .config(self.inner.session_config.clone())
            .supported_versions(self.inner.supported_versions.iter().cloned());
        if let Some(instructions) = &self.inner.instructions {
            builder = builder.instructions(instructions.clone());
        }
        let session = builder.start().await?;
        self.hub.register(&session);
        Ok(session)
    }

    /// Serve this process's stdin/stdout until the client goes away
    pub async fn serve_stdio(&self) -> McpResult<()> {
        info!(server = %self.inner.implementation.name, "serving on stdio");
        let session = self.serve(StdioTransport::new()).await?;
        session.wait_closed().await;
        info!(reason = ?session.close_reason(), "stdio session ended");
        Ok(())
    }

    /// Accept TCP connections until the listener stops, one session each
    pub async fn serve_tcp(&self, listener: TcpServer) -> McpResult<()> {
        info!(addr = %listener.local_addr(), "serving on tcp");
        while let Some(transport) = listener.accept().await {
            let peer = transport.peer_addr();
            match self.serve(transport).await {
                Ok(session) => debug!(%peer, session = %session.id(), "accepted connection"),
                Err(e) => warn!(%peer, error = %e, "failed to start session"),
            }
        }
        Ok(())
    }
}

async fn call_tool(
    server: &ServerInner,
    ctx: RequestContext,
    params: CallToolParams,
) -> McpResult<CallToolResult> {
    let entry = server
        .catalog
        .load()
        .tool(&params.name)
        .cloned()
        .ok_or_else(|| McpError::unknown_target(format!("tool '{}'", params.name)))?;
    let arguments = params.arguments.unwrap_or_default();

    let violations = entry.violations(&arguments);
    if !violations.is_empty() {
        debug!(tool = %params.name, ?violations, "tool arguments rejected");
        return Ok(CallToolResult::error(format!(
            "invalid arguments for tool '{}': {}",
            params.name,
            violations.join("; ")
        )));
    }

    match (entry.handler)(ctx, arguments).await {
        Ok(result) => Ok(result),
        Err(ToolError::Failed(message)) => Ok(CallToolResult::error(message)),
        Err(ToolError::Protocol(e)) => Err(e),
    }
}

async fn read_resource(
    server: &ServerInner,
    ctx: RequestContext,
    uri: String,
) -> McpResult<ReadResourceResult> {
    let reader = server
        .catalog
        .load()
        .reader_for(&uri)
        .ok_or_else(|| McpError::unknown_target(format!("resource '{uri}'")))?;
    reader(ctx, uri).await
}

async fn get_prompt(
    server: &ServerInner,
    ctx: RequestContext,
    params: GetPromptParams,
) -> McpResult<GetPromptResult> {
    let entry = server
        .catalog
        .load()
        .prompt(&params.name)
        .cloned()
        .ok_or_else(|| McpError::unknown_target(format!("prompt '{}'", params.name)))?;
    let missing: Vec<&str> = entry
        .prompt
        .arguments
        .iter()
        .filter(|a| a.required && !params.arguments.contains_key(&a.name))
        .map(|a| a.name.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(McpError::invalid_params(format!(
            "prompt '{}' is missing required arguments: {}",
            params.name,
            missing.join(", ")
        )));
    }
    (entry.renderer)(ctx, params.arguments).await
}

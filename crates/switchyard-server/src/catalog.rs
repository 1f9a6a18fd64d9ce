//! What a server offers: tools, resources, resource templates and prompts,
//! each bound to the handler that serves it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use switchyard_protocol::types::{
    CallToolResult, GetPromptResult, Prompt, ReadResourceResult, Resource, ResourceTemplate, Tool,
};
use switchyard_protocol::{McpError, McpResult};
use switchyard_session::RequestContext;
use tracing::debug;

use crate::error::ToolError;

/// Boxed tool handler
pub type ToolFn = Arc<
    dyn Fn(RequestContext, Map<String, Value>) -> BoxFuture<'static, Result<CallToolResult, ToolError>>
        + Send
        + Sync,
>;

/// Boxed resource reader; receives the requested URI
pub type ResourceFn =
    Arc<dyn Fn(RequestContext, String) -> BoxFuture<'static, McpResult<ReadResourceResult>> + Send + Sync>;

/// Boxed prompt renderer
pub type PromptFn = Arc<
    dyn Fn(RequestContext, HashMap<String, String>) -> BoxFuture<'static, McpResult<GetPromptResult>>
        + Send
        + Sync,
>;

pub(crate) fn boxed_tool<F, Fut>(handler: F) -> ToolFn
where
    F: Fn(RequestContext, Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallToolResult, ToolError>> + Send + 'static,
{
    Arc::new(move |ctx, args| Box::pin(handler(ctx, args)))
}

pub(crate) fn boxed_reader<F, Fut>(reader: F) -> ResourceFn
where
    F: Fn(RequestContext, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = McpResult<ReadResourceResult>> + Send + 'static,
{
    Arc::new(move |ctx, uri| Box::pin(reader(ctx, uri)))
}

pub(crate) fn boxed_prompt<F, Fut>(renderer: F) -> PromptFn
where
    F: Fn(RequestContext, HashMap<String, String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = McpResult<GetPromptResult>> + Send + 'static,
{
    Arc::new(move |ctx, args| Box::pin(renderer(ctx, args)))
}

pub(crate) struct ToolEntry {
    pub(crate) tool: Tool,
    pub(crate) validator: jsonschema::Validator,
    pub(crate) handler: ToolFn,
}

impl fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolEntry").field("tool", &self.tool.name).finish_non_exhaustive()
    }
}

impl ToolEntry {
    /// Compile the input schema; tools must take an object
    pub(crate) fn new(tool: Tool, handler: ToolFn) -> McpResult<Self> {
        let declares_object = tool
            .input_schema
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| t == "object");
        if !declares_object {
            return Err(McpError::invalid_params(format!(
                "tool '{}' must declare an object input schema",
                tool.name
            )));
        }
        let validator = jsonschema::validator_for(&tool.input_schema).map_err(|e| {
            McpError::invalid_params(format!("tool '{}' has an invalid input schema: {e}", tool.name))
        })?;
        Ok(Self {
            tool,
            validator,
            handler,
        })
    }

    /// Schema violations in `arguments`, empty when valid
    pub(crate) fn violations(&self, arguments: &Map<String, Value>) -> Vec<String> {
        let instance = Value::Object(arguments.clone());
        self.validator
            .iter_errors(&instance)
            .map(|e| e.to_string())
            .collect()
    }
}

#[derive(Clone)]
pub(crate) struct ResourceEntry {
    pub(crate) resource: Resource,
    pub(crate) reader: ResourceFn,
}

#[derive(Clone)]
pub(crate) struct TemplateEntry {
    pub(crate) template: ResourceTemplate,
    pub(crate) reader: ResourceFn,
}

#[derive(Clone)]
pub(crate) struct PromptEntry {
    pub(crate) prompt: Prompt,
    pub(crate) renderer: PromptFn,
}

/// Everything a server serves, in registration order
#[derive(Default, Clone)]
pub(crate) struct Catalog {
    pub(crate) tools: Vec<Arc<ToolEntry>>,
    pub(crate) resources: Vec<ResourceEntry>,
    pub(crate) templates: Vec<TemplateEntry>,
    pub(crate) prompts: Vec<PromptEntry>,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("tools", &self.tools.len())
            .field("resources", &self.resources.len())
            .field("templates", &self.templates.len())
            .field("prompts", &self.prompts.len())
            .finish()
    }
}

impl Catalog {
    pub(crate) fn tool(&self, name: &str) -> Option<&Arc<ToolEntry>> {
        self.tools.iter().find(|t| t.tool.name == name)
    }

    pub(crate) fn prompt(&self, name: &str) -> Option<&PromptEntry> {
        self.prompts.iter().find(|p| p.prompt.name == name)
    }

    /// Reader for `uri`: an exact resource first, then the first template
    /// whose pattern matches
    pub(crate) fn reader_for(&self, uri: &str) -> Option<ResourceFn> {
        if let Some(entry) = self.resources.iter().find(|r| r.resource.uri == uri) {
            return Some(entry.reader.clone());
        }
        let entry = self
            .templates
            .iter()
            .find(|t| template_matches(&t.template.uri_template, uri))?;
        debug!(template = %entry.template.uri_template, %uri, "resource matched template");
        Some(entry.reader.clone())
    }

    pub(crate) fn check_unique(&self) -> McpResult<()> {
        fn dupes<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> McpResult<()> {
            let mut seen = std::collections::HashSet::new();
            for name in names {
                if !seen.insert(name) {
                    return Err(McpError::invalid_params(format!("duplicate {kind} '{name}'")));
                }
            }
            Ok(())
        }
        dupes("tool", self.tools.iter().map(|t| t.tool.name.as_str()))?;
        dupes("resource", self.resources.iter().map(|r| r.resource.uri.as_str()))?;
        dupes(
            "resource template",
            self.templates.iter().map(|t| t.template.uri_template.as_str()),
        )?;
        dupes("prompt", self.prompts.iter().map(|p| p.prompt.name.as_str()))
    }
}

/// Match a URI against a level-1 URI template: literal text must match
/// exactly and each `{var}` consumes at least one character.
pub(crate) fn template_matches(template: &str, uri: &str) -> bool {
    let mut literals = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        literals.push(&rest[..open]);
        match rest[open..].find('}') {
            Some(close) => rest = &rest[open + close + 1..],
            None => return template == uri,
        }
    }
    if literals.is_empty() {
        return template == uri;
    }
    literals.push(rest);

    let Some(mut remaining) = uri.strip_prefix(literals[0]) else {
        return false;
    };
    let last = literals.len() - 1;
    for (i, literal) in literals.iter().enumerate().skip(1) {
        if i == last {
            return remaining.len() > literal.len() && remaining.ends_with(literal);
        }
        if literal.is_empty() {
            continue;
        }
        match remaining.get(1..).and_then(|tail| tail.find(literal)) {
            Some(pos) => remaining = &remaining[pos + 1 + literal.len()..],
            None => return false,
        }
    }
    false
}

//! Typed parameters and results for every protocol method.

mod bridged;
mod content;
mod initialize;
mod notifications;
mod prompts;
mod resources;
mod tools;

pub use bridged::{
    CreateMessageParams, CreateMessageResult, ElicitAction, ElicitParams, ElicitResult,
    ListRootsResult, Root, SamplingMessage,
};
pub use content::{Content, Role};
pub use initialize::{Implementation, InitializeParams, InitializeResult};
pub use notifications::{
    CancelledParams, EmptyResult, LogLevel, LoggingMessageParams, PaginatedParams, ProgressParams,
    ProgressToken, SetLevelParams, progress_token,
};
pub use prompts::{GetPromptParams, GetPromptResult, ListPromptsResult, Prompt, PromptArgument, PromptMessage};
pub use resources::{
    ListResourceTemplatesResult, ListResourcesResult, ReadResourceResult, Resource, ResourceContents,
    ResourceTemplate, ResourceUriParams,
};
pub use tools::{CallToolParams, CallToolResult, ListToolsResult, Tool};

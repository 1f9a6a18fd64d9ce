//! Server-originated calls that travel back over the same session.
//!
//! The server side ([`Bridge`]) issues sampling, elicitation and roots
//! requests under the bridged timeout and retry policy. The client side
//! ([`BridgeResponder`]) answers them through user-supplied handlers, with a
//! [`BridgeInterceptor`] able to inspect, rewrite or refuse each call.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use switchyard_protocol::types::{
    CreateMessageParams, CreateMessageResult, ElicitParams, ElicitResult, ListRootsResult,
};
use switchyard_protocol::{CapabilitySet, ErrorKind, McpError, McpResult, methods};
use tracing::{debug, warn};

use crate::handler::{DispatchTable, parse_params};
use crate::session::{RequestOptions, Session};

/// Outbound bridged calls on a session
#[derive(Debug, Clone)]
pub struct Bridge {
    session: Session,
}

impl Bridge {
    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    /// Ask the client's model for a completion
    pub async fn create_message(&self, params: CreateMessageParams) -> McpResult<CreateMessageResult> {
        self.call(methods::SAMPLING_CREATE_MESSAGE, &params).await
    }

    /// Ask the client's user for structured input
    pub async fn elicit(&self, params: ElicitParams) -> McpResult<ElicitResult> {
        self.call(methods::ELICITATION_CREATE, &params).await
    }

    /// Ask the client for its filesystem roots
    pub async fn list_roots(&self) -> McpResult<ListRootsResult> {
        self.call(methods::ROOTS_LIST, &serde_json::json!({})).await
    }

    async fn call<P, R>(&self, method: &str, params: &P) -> McpResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let config = self.session.config();
        let mut retry = 0u32;
        loop {
            let options = RequestOptions::new().timeout(config.bridge_timeout);
            match self
                .session
                .request_with(method, Some(params.clone()), options)
                .await
            {
                Ok(value) => {
                    return serde_json::from_value(value).map_err(|e| {
                        McpError::protocol_violation(format!("malformed '{method}' result: {e}"))
                    });
                }
                Err(err) if err.kind == ErrorKind::Timeout => {
                    retry += 1;
                    match config.bridge_retry.delay_for(retry) {
                        Some(delay) => {
                            debug!(method, retry, ?delay, "bridged call timed out, retrying");
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(err),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Produces completions for `sampling/createMessage`
#[async_trait]
pub trait SamplingHandler: Send + Sync + fmt::Debug {
    /// Produce a completion
    async fn create_message(&self, params: CreateMessageParams) -> McpResult<CreateMessageResult>;
}

/// Collects user input for `elicitation/create`
#[async_trait]
pub trait ElicitationHandler: Send + Sync + fmt::Debug {
    /// Collect input; declining or cancelling is a normal result
    async fn elicit(&self, params: ElicitParams) -> McpResult<ElicitResult>;
}

/// Answers `roots/list`
#[async_trait]
pub trait RootsProvider: Send + Sync + fmt::Debug {
    /// Current roots
    async fn list_roots(&self) -> McpResult<ListRootsResult>;
}

/// A bridged request as seen by an interceptor
#[derive(Debug, Clone)]
pub enum BridgeRequest {
    /// Sampling
    Sampling(CreateMessageParams),
    /// Elicitation
    Elicitation(ElicitParams),
    /// Roots listing; carries no parameters
    Roots,
}

/// A bridged response as seen by an interceptor
#[derive(Debug, Clone)]
pub enum BridgeResponse {
    /// Sampling
    Sampling(CreateMessageResult),
    /// Elicitation
    Elicitation(ElicitResult),
    /// Roots listing
    Roots(ListRootsResult),
}

/// Interceptor verdict on a bridged request
#[derive(Debug, Clone)]
pub enum Interception {
    /// Forward this (possibly rewritten) request to the handler
    Proceed(BridgeRequest),
    /// Refuse on the user's behalf
    Decline,
    /// Abandon on the user's behalf
    Cancel,
    /// Fail the call with this error
    Reject(McpError),
}

/// Hook around every bridged request handled on the client
#[async_trait]
pub trait BridgeInterceptor: Send + Sync + fmt::Debug {
    /// Inspect or rewrite a request before the handler sees it
    async fn before(&self, request: BridgeRequest) -> Interception {
        Interception::Proceed(request)
    }

    /// Inspect or rewrite a response before it is sent
    async fn after(&self, response: BridgeResponse) -> McpResult<BridgeResponse> {
        Ok(response)
    }
}

/// Interceptor that lets everything through
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

#[async_trait]
impl BridgeInterceptor for PassThrough {}

/// Client-side answering half of the bridge
#[derive(Debug, Clone)]
pub struct BridgeResponder {
    sampling: Option<Arc<dyn SamplingHandler>>,
    elicitation: Option<Arc<dyn ElicitationHandler>>,
    roots: Option<(Arc<dyn RootsProvider>, bool)>,
    interceptor: Arc<dyn BridgeInterceptor>,
}

impl Default for BridgeResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeResponder {
    /// Responder with no handlers
    pub fn new() -> Self {
        Self {
            sampling: None,
            elicitation: None,
            roots: None,
            interceptor: Arc::new(PassThrough),
        }
    }

    /// Answer sampling requests
    pub fn sampling(mut self, handler: Arc<dyn SamplingHandler>) -> Self {
        self.sampling = Some(handler);
        self
    }

    /// Answer elicitation requests
    pub fn elicitation(mut self, handler: Arc<dyn ElicitationHandler>) -> Self {
        self.elicitation = Some(handler);
        self
    }

    /// Answer roots requests; `list_changed` advertises change notifications
    pub fn roots(mut self, provider: Arc<dyn RootsProvider>, list_changed: bool) -> Self {
        self.roots = Some((provider, list_changed));
        self
    }

    /// Replace the interceptor
    pub fn interceptor(mut self, interceptor: Arc<dyn BridgeInterceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    /// Add the capabilities implied by the configured handlers
    pub fn declare(&self, mut capabilities: CapabilitySet) -> CapabilitySet {
        if self.sampling.is_some() {
            capabilities = capabilities.with_sampling();
        }
        if self.elicitation.is_some() {
            capabilities = capabilities.with_elicitation();
        }
        if let Some((_, list_changed)) = &self.roots {
            capabilities = capabilities.with_roots(*list_changed);
        }
        capabilities
    }

    /// Bind the configured handlers into `table`
    pub fn install(&self, mut table: DispatchTable) -> DispatchTable {
        if let Some(handler) = self.sampling.clone() {
            let interceptor = self.interceptor.clone();
            table = table.on_request(methods::SAMPLING_CREATE_MESSAGE, move |_ctx, params| {
                let handler = handler.clone();
                let interceptor = interceptor.clone();
                async move {
                    let params: CreateMessageParams = parse_params(params)?;
                    let result = answer_sampling(&*interceptor, &*handler, params).await?;
                    Ok(serde_json::to_value(result)?)
                }
            });
        }
        if let Some(handler) = self.elicitation.clone() {
            let interceptor = self.interceptor.clone();
            table = table.on_request(methods::ELICITATION_CREATE, move |_ctx, params| {
                let handler = handler.clone();
                let interceptor = interceptor.clone();
                async move {
                    let params: ElicitParams = parse_params(params)?;
                    let result = answer_elicitation(&*interceptor, &*handler, params).await?;
                    Ok(serde_json::to_value(result)?)
                }
            });
        }
        if let Some((provider, _)) = self.roots.clone() {
            let interceptor = self.interceptor.clone();
            table = table.on_request(methods::ROOTS_LIST, move |_ctx, _params| {
                let provider = provider.clone();
                let interceptor = interceptor.clone();
                async move {
                    let result = answer_roots(&*interceptor, &*provider).await?;
                    Ok(serde_json::to_value(result)?)
                }
            });
        }
        table
    }
}

async fn answer_sampling(
    interceptor: &dyn BridgeInterceptor,
    handler: &dyn SamplingHandler,
    params: CreateMessageParams,
) -> McpResult<CreateMessageResult> {
    let params = match interceptor.before(BridgeRequest::Sampling(params)).await {
        Interception::Proceed(BridgeRequest::Sampling(p)) => p,
        Interception::Proceed(_) => {
            return Err(McpError::internal("interceptor changed the request kind"));
        }
        Interception::Decline => return Err(McpError::user_rejected("sampling request declined")),
        Interception::Cancel => return Err(McpError::user_rejected("sampling request cancelled")),
        Interception::Reject(err) => {
            warn!(error = %err, "sampling request rejected by interceptor");
            return Err(err);
        }
    };
    let result = handler.create_message(params).await?;
    match interceptor.after(BridgeResponse::Sampling(result)).await? {
        BridgeResponse::Sampling(result) => Ok(result),
        _ => Err(McpError::internal("interceptor changed the response kind")),
    }
}

async fn answer_elicitation(
    interceptor: &dyn BridgeInterceptor,
    handler: &dyn ElicitationHandler,
    params: ElicitParams,
) -> McpResult<ElicitResult> {
    let params = match interceptor.before(BridgeRequest::Elicitation(params)).await {
        Interception::Proceed(BridgeRequest::Elicitation(p)) => p,
        Interception::Proceed(_) => {
            return Err(McpError::internal("interceptor changed the request kind"));
        }
        Interception::Decline => return Ok(ElicitResult::decline()),
        Interception::Cancel => return Ok(ElicitResult::cancel()),
        Interception::Reject(err) => {
            warn!(error = %err, "elicitation request rejected by interceptor");
            return Err(err);
        }
    };
    let result = handler.elicit(params).await?;
    match interceptor.after(BridgeResponse::Elicitation(result)).await? {
        BridgeResponse::Elicitation(result) => Ok(result),
        _ => Err(McpError::internal("interceptor changed the response kind")),
    }
}

async fn answer_roots(
    interceptor: &dyn BridgeInterceptor,
    provider: &dyn RootsProvider,
) -> McpResult<ListRootsResult> {
    match interceptor.before(BridgeRequest::Roots).await {
        Interception::Proceed(BridgeRequest::Roots) => {}
        Interception::Proceed(_) => {
            return Err(McpError::internal("interceptor changed the request kind"));
        }
        Interception::Decline => return Err(McpError::user_rejected("roots request declined")),
        Interception::Cancel => return Err(McpError::user_rejected("roots request cancelled")),
        Interception::Reject(err) => {
            warn!(error = %err, "roots request rejected by interceptor");
            return Err(err);
        }
    }
    let result = provider.list_roots().await?;
    match interceptor.after(BridgeResponse::Roots(result)).await? {
        BridgeResponse::Roots(result) => Ok(result),
        _ => Err(McpError::internal("interceptor changed the response kind")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_protocol::types::{Content, ElicitAction, Role};

    #[derive(Debug)]
    struct Canned;

    #[async_trait]
    impl SamplingHandler for Canned {
        async fn create_message(&self, _params: CreateMessageParams) -> McpResult<CreateMessageResult> {
            Ok(CreateMessageResult {
                role: Role::Assistant,
                content: Content::text("canned"),
                model: "test-model".into(),
                stop_reason: None,
            })
        }
    }

    #[async_trait]
    impl ElicitationHandler for Canned {
        async fn elicit(&self, _params: ElicitParams) -> McpResult<ElicitResult> {
            Ok(ElicitResult::accept(serde_json::Map::new()))
        }
    }

    #[async_trait]
    impl RootsProvider for Canned {
        async fn list_roots(&self) -> McpResult<ListRootsResult> {
            Ok(ListRootsResult::default())
        }
    }

    #[derive(Debug)]
    struct DenyAll;

    #[async_trait]
    impl BridgeInterceptor for DenyAll {
        async fn before(&self, _request: BridgeRequest) -> Interception {
            Interception::Decline
        }
    }

    fn sampling_params() -> CreateMessageParams {
        serde_json::from_value(serde_json::json!({"messages": [], "maxTokens": 16})).unwrap()
    }

    fn elicit_params() -> ElicitParams {
        ElicitParams {
            message: "name?".into(),
            requested_schema: serde_json::json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn test_pass_through() {
        let result = answer_sampling(&PassThrough, &Canned, sampling_params()).await.unwrap();
        assert_eq!(result.model, "test-model");
        let result = answer_elicitation(&PassThrough, &Canned, elicit_params()).await.unwrap();
        assert_eq!(result.action, ElicitAction::Accept);
    }

    #[tokio::test]
    async fn test_decline_maps_per_kind() {
        let err = answer_sampling(&DenyAll, &Canned, sampling_params()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UserRejected);
        let result = answer_elicitation(&DenyAll, &Canned, elicit_params()).await.unwrap();
        assert_eq!(result.action, ElicitAction::Decline);
        let err = answer_roots(&DenyAll, &Canned).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UserRejected);
        assert!(answer_roots(&PassThrough, &Canned).await.unwrap().roots.is_empty());
    }

    #[test]
    fn test_declared_capabilities_follow_handlers() {
        let responder = BridgeResponder::new()
            .sampling(Arc::new(Canned))
            .elicitation(Arc::new(Canned));
        let caps = responder.declare(CapabilitySet::new());
        assert!(caps.contains("sampling"));
        assert!(caps.contains("elicitation"));
        assert!(!caps.contains("roots"));
        let table = responder.install(DispatchTable::new());
        assert!(table.handles(methods::SAMPLING_CREATE_MESSAGE));
        assert!(!table.handles(methods::ROOTS_LIST));
    }
}

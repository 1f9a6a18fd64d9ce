//! Method bindings for inbound traffic.
//!
//! Request handlers run in their own task and produce the response payload;
//! the session turns `Err` into an error response. Notification handlers run
//! detached and their failures are only logged.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use switchyard_protocol::{McpError, McpResult};

use crate::context::RequestContext;
use crate::session::Session;

/// Boxed request handler
pub type RequestHandler =
    Arc<dyn Fn(RequestContext, Option<Value>) -> BoxFuture<'static, McpResult<Value>> + Send + Sync>;

/// Boxed notification handler
pub type NotificationHandler =
    Arc<dyn Fn(Session, Option<Value>) -> BoxFuture<'static, McpResult<()>> + Send + Sync>;

/// Methods answered by the session itself; bindings for them are ignored.
pub const RESERVED_METHODS: &[&str] = &[
    switchyard_protocol::methods::INITIALIZE,
    switchyard_protocol::methods::PING,
    switchyard_protocol::methods::RESOURCES_SUBSCRIBE,
    switchyard_protocol::methods::RESOURCES_UNSUBSCRIBE,
    switchyard_protocol::methods::LOGGING_SET_LEVEL,
];

/// Method name to handler map
#[derive(Clone, Default)]
pub struct DispatchTable {
    requests: HashMap<String, RequestHandler>,
    notifications: HashMap<String, NotificationHandler>,
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut requests: Vec<_> = self.requests.keys().collect();
        requests.sort();
        let mut notifications: Vec<_> = self.notifications.keys().collect();
        notifications.sort();
        f.debug_struct("DispatchTable")
            .field("requests", &requests)
            .field("notifications", &notifications)
            .finish()
    }
}

impl DispatchTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a raw request handler
    pub fn on_request<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RequestContext, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<Value>> + Send + 'static,
    {
        let handler: RequestHandler = Arc::new(move |ctx, params| Box::pin(handler(ctx, params)));
        self.requests.insert(method.into(), handler);
        self
    }

    /// Bind a request handler with typed params and result.
    ///
    /// Missing params deserialize from `{}`; a shape mismatch is answered
    /// with `InvalidParams` without calling the handler.
    pub fn on_typed<P, R, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(RequestContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.on_request(method, move |ctx, params| {
            let handler = handler.clone();
            async move {
                let params: P = parse_params(params)?;
                let result = handler(ctx, params).await?;
                serde_json::to_value(result)
                    .map_err(|e| McpError::internal(format!("failed to serialize result: {e}")))
            }
        })
    }

    /// Bind a notification handler
    pub fn on_notification<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Session, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<()>> + Send + 'static,
    {
        let handler: NotificationHandler =
            Arc::new(move |session, params| Box::pin(handler(session, params)));
        self.notifications.insert(method.into(), handler);
        self
    }

    /// Copy every binding of `other` into this table, overriding on conflict
    pub fn merge(mut self, other: DispatchTable) -> Self {
        self.requests.extend(other.requests);
        self.notifications.extend(other.notifications);
        self
    }

    /// Handler bound to a request method
    pub fn request_handler(&self, method: &str) -> Option<RequestHandler> {
        if RESERVED_METHODS.contains(&method) {
            return None;
        }
        self.requests.get(method).cloned()
    }

    /// Handler bound to a notification method
    pub fn notification_handler(&self, method: &str) -> Option<NotificationHandler> {
        self.notifications.get(method).cloned()
    }

    /// Whether a request method is bound
    pub fn handles(&self, method: &str) -> bool {
        self.request_handler(method).is_some()
    }
}

/// Deserialize request params, treating absent params as an empty object
pub fn parse_params<P: DeserializeOwned>(params: Option<Value>) -> McpResult<P> {
    let value = params.unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(value).map_err(|e| McpError::invalid_params(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use switchyard_protocol::ErrorKind;

    #[derive(Debug, Deserialize)]
    struct Echo {
        text: String,
    }

    #[test]
    fn test_parse_params() {
        let echo: Echo = parse_params(Some(serde_json::json!({"text": "hi"}))).unwrap();
        assert_eq!(echo.text, "hi");
        let err = parse_params::<Echo>(None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParams);
    }

    #[test]
    fn test_reserved_methods_are_not_dispatched() {
        let table = DispatchTable::new()
            .on_request("ping", |_, _| async { Ok(Value::Null) })
            .on_request("custom/echo", |_, p| async move { Ok(p.unwrap_or_default()) });
        assert!(!table.handles("ping"));
        assert!(table.handles("custom/echo"));
        assert!(format!("{table:?}").contains("custom/echo"));
    }

    #[test]
    fn test_merge_overrides() {
        let a = DispatchTable::new().on_notification("n", |_, _| async { Ok(()) });
        let b = DispatchTable::new().on_request("r", |_, _| async { Ok(Value::Null) });
        let merged = a.merge(b);
        assert!(merged.handles("r"));
        assert!(merged.notification_handler("n").is_some());
    }
}

//! Outbound requests awaiting a response.
//!
//! Every entry is removed by exactly one of: a matching response, a local
//! timeout or cancellation, or session shutdown. Removal and resolution
//! happen under the same lock, so a call never resolves twice.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use switchyard_protocol::{McpError, McpResult, MessageId};
use tokio::sync::oneshot;

struct PendingCall {
    method: String,
    created_at: Instant,
    tx: oneshot::Sender<McpResult<Value>>,
}

/// Correlation table for outbound requests
#[derive(Default)]
pub struct PendingCalls {
    calls: Mutex<HashMap<MessageId, PendingCall>>,
}

impl std::fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCalls")
            .field("len", &self.len())
            .finish()
    }
}

impl PendingCalls {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request; the receiver yields its single outcome.
    ///
    /// Must be called before the request is written, otherwise a fast
    /// response could arrive for an id that is not yet registered.
    pub fn register(
        &self,
        id: MessageId,
        method: impl Into<String>,
    ) -> oneshot::Receiver<McpResult<Value>> {
        let (tx, rx) = oneshot::channel();
        self.calls.lock().insert(
            id,
            PendingCall {
                method: method.into(),
                created_at: Instant::now(),
                tx,
            },
        );
        rx
    }

    /// Deliver an outcome. Returns `false` if `id` is not pending, which
    /// means the call already resolved or never existed.
    pub fn resolve(&self, id: &MessageId, outcome: McpResult<Value>) -> bool {
        let Some(call) = self.calls.lock().remove(id) else {
            return false;
        };
        tracing::trace!(
            method = %call.method,
            elapsed_ms = call.created_at.elapsed().as_millis() as u64,
            "pending call resolved"
        );
        // The waiter may have gone away; the entry is gone either way.
        let _ = call.tx.send(outcome);
        true
    }

    /// Fail every pending call with a copy of `error`
    pub fn fail_all(&self, error: &McpError) -> usize {
        let drained: Vec<_> = self.calls.lock().drain().collect();
        let count = drained.len();
        for (_, call) in drained {
            let _ = call.tx.send(Err(error.clone()));
        }
        count
    }

    /// Method name of a pending call
    pub fn method_of(&self, id: &MessageId) -> Option<String> {
        self.calls.lock().get(id).map(|c| c.method.clone())
    }

    /// How long the oldest call has been waiting
    pub fn oldest_age(&self) -> Option<Duration> {
        self.calls.lock().values().map(|c| c.created_at.elapsed()).max()
    }

    /// Number of pending calls
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchyard_protocol::ErrorKind;

    #[tokio::test]
    async fn test_resolves_exactly_once() {
        let pending = PendingCalls::new();
        let id = MessageId::from(1);
        let rx = pending.register(id.clone(), "tools/call");

        assert!(pending.resolve(&id, Err(McpError::timeout("deadline"))));
        assert!(!pending.resolve(&id, Ok(json!({"late": true}))));

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.unwrap_err().kind, ErrorKind::Timeout);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_unknown_id_is_reported() {
        let pending = PendingCalls::new();
        assert!(!pending.resolve(&MessageId::from("nope"), Ok(Value::Null)));
    }

    #[tokio::test]
    async fn test_fail_all() {
        let pending = PendingCalls::new();
        let a = pending.register(MessageId::from(1), "ping");
        let b = pending.register(MessageId::from(2), "ping");
        assert_eq!(pending.method_of(&MessageId::from(2)).as_deref(), Some("ping"));
        assert_eq!(pending.fail_all(&McpError::session_closing()), 2);
        assert_eq!(a.await.unwrap().unwrap_err().kind, ErrorKind::SessionClosing);
        assert_eq!(b.await.unwrap().unwrap_err().kind, ErrorKind::SessionClosing);
        assert!(pending.oldest_age().is_none());
    }
}

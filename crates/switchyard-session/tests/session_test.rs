//! End-to-end session behaviour over in-memory pipes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use switchyard_protocol::types::{
    Content, CreateMessageParams, CreateMessageResult, LogLevel, Role as Speaker,
};
use switchyard_protocol::{CapabilitySet, ErrorKind, McpResult, Role, methods};
use switchyard_session::{
    BridgeResponder, DispatchTable, LifecyclePhase, ListKind, RequestOptions, SamplingHandler,
    Session, SessionEvent,
};
use switchyard_transport::{StdioTransport, Transport, TransportMessage, duplex_pair};
use tokio::time::{sleep, timeout};

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn slow_handlers(completed: Arc<AtomicBool>) -> DispatchTable {
    DispatchTable::new()
        .on_request("custom/slow", move |_ctx, _params| {
            let completed = completed.clone();
            async move {
                sleep(Duration::from_millis(300)).await;
                completed.store(true, Ordering::SeqCst);
                Ok(json!({"done": true}))
            }
        })
        .on_request("custom/echo", |_ctx, params| async move {
            Ok(params.unwrap_or(Value::Null))
        })
}

async fn ping_roundtrip(session: &Session) {
    let pong = session.request(methods::PING, None).await.unwrap();
    assert_eq!(pong, json!({}));
}

async fn connected(server_caps: CapabilitySet, handlers: DispatchTable) -> (Session, Session) {
    let (client_end, server_end) = duplex_pair();
    let server = Session::builder(Role::Server, server_end)
        .id("server")
        .capabilities(server_caps)
        .handlers(handlers)
        .start()
        .await
        .unwrap();
    let client = Session::builder(Role::Client, client_end)
        .id("client")
        .start()
        .await
        .unwrap();
    client.initialize().await.unwrap();
    let watched = server.clone();
    wait_until(move || watched.is_operational()).await;
    (client, server)
}

async fn raw_peer() -> (StdioTransport, Session) {
    let (raw, server_end) = duplex_pair();
    let server = Session::builder(Role::Server, server_end)
        .capabilities(CapabilitySet::new().with_tools(false))
        .start()
        .await
        .unwrap();
    raw.connect().await.unwrap();
    (raw, server)
}

async fn raw_exchange(raw: &StdioTransport, frame: &str) -> Value {
    raw.send(TransportMessage::new(frame.to_string())).await.unwrap();
    let reply = timeout(Duration::from_secs(2), raw.receive())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    serde_json::from_slice(&reply.payload).unwrap()
}

#[tokio::test]
async fn test_handshake_reaches_operational() {
    let (client, server) = connected(CapabilitySet::new().with_tools(true), DispatchTable::new()).await;
    assert_eq!(client.phase(), LifecyclePhase::Operational);
    assert_eq!(client.protocol_version(), Some("2025-11-25"));
    assert_eq!(server.protocol_version(), Some("2025-11-25"));
    assert!(client.remote_capabilities().unwrap().contains("tools"));
    assert_eq!(server.negotiated().unwrap().peer_info.name, "switchyard");
}

#[tokio::test]
async fn test_older_client_version_is_accepted() {
    let (client_end, server_end) = duplex_pair();
    let server = Session::builder(Role::Server, server_end).start().await.unwrap();
    let client = Session::builder(Role::Client, client_end)
        .supported_versions(["2024-11-05"])
        .start()
        .await
        .unwrap();
    let result = client.initialize().await.unwrap();
    assert_eq!(result.protocol_version, "2024-11-05");
    let watched = server.clone();
    wait_until(move || watched.is_operational()).await;
}

#[tokio::test]
async fn test_incompatible_version_stays_non_operational() {
    let (client_end, server_end) = duplex_pair();
    let server = Session::builder(Role::Server, server_end)
        .supported_versions(["2025-11-25"])
        .start()
        .await
        .unwrap();
    let client = Session::builder(Role::Client, client_end)
        .supported_versions(["2024-11-05"])
        .start()
        .await
        .unwrap();
    let err = client.initialize().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::IncompatibleVersion);
    assert_eq!(client.phase(), LifecyclePhase::Initializing);
    assert_ne!(server.phase(), LifecyclePhase::Operational);

    let err = client.request("custom/echo", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotInitialized);
}

#[tokio::test]
async fn test_request_before_initialize_is_a_protocol_violation() {
    let (raw, server) = raw_peer().await;
    let reply = raw_exchange(&raw, r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#).await;
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["error"]["code"], ErrorKind::ProtocolViolation.code());
    assert_eq!(server.phase(), LifecyclePhase::Uninitialized);
}

#[tokio::test]
async fn test_traffic_during_initializing_is_refused_but_ping_works() {
    let (raw, server) = raw_peer().await;
    let init = raw_exchange(
        &raw,
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18","capabilities":{},"clientInfo":{"name":"raw","version":"0"}}}"#,
    )
    .await;
    assert_eq!(init["result"]["protocolVersion"], "2025-06-18");
    assert_eq!(server.phase(), LifecyclePhase::Initializing);

    let refused = raw_exchange(&raw, r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#).await;
    assert_eq!(refused["error"]["code"], ErrorKind::NotInitialized.code());
    let pong = raw_exchange(&raw, r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#).await;
    assert_eq!(pong["result"], json!({}));

    let again = raw_exchange(
        &raw,
        r#"{"jsonrpc":"2.0","id":4,"method":"initialize","params":{"protocolVersion":"2025-06-18","capabilities":{},"clientInfo":{"name":"raw","version":"0"}}}"#,
    )
    .await;
    assert_eq!(again["error"]["code"], ErrorKind::ProtocolViolation.code());
}

#[tokio::test]
async fn test_unparseable_frame_gets_null_id_error() {
    let (raw, _server) = raw_peer().await;
    let reply = raw_exchange(&raw, "{not json").await;
    assert_eq!(reply["id"], Value::Null);
    assert_eq!(reply["error"]["code"], -32700);
}

#[tokio::test]
async fn test_missing_capability_fails_locally() {
    let (client, _server) = connected(CapabilitySet::new().with_prompts(false), DispatchTable::new()).await;
    let err = client.request(methods::TOOLS_LIST, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::CapabilityNotDeclared);
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_unbound_method_is_not_found() {
    let (client, _server) = connected(CapabilitySet::new(), DispatchTable::new()).await;
    let err = client.request("custom/missing", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::MethodNotFound);
}

#[tokio::test]
async fn test_custom_request_round_trip() {
    let flag = Arc::new(AtomicBool::new(false));
    let (client, _server) = connected(CapabilitySet::new(), slow_handlers(flag)).await;
    let echoed = client.request("custom/echo", Some(json!({"n": 1}))).await.unwrap();
    assert_eq!(echoed, json!({"n": 1}));
    ping_roundtrip(&client).await;
}

#[tokio::test]
async fn test_timeout_cancels_peer_and_discards_late_response() {
    let completed = Arc::new(AtomicBool::new(false));
    let (client, server) = connected(CapabilitySet::new(), slow_handlers(completed.clone())).await;

    let err = client
        .request_with(
            "custom/slow",
            None,
            RequestOptions::new().timeout(Duration::from_millis(30)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(client.pending_count(), 0);

    // The peer drops the handler instead of finishing it.
    let watched = server.clone();
    wait_until(move || watched.inflight_count() == 0).await;
    sleep(Duration::from_millis(350)).await;
    assert!(!completed.load(Ordering::SeqCst));

    ping_roundtrip(&client).await;
}

#[tokio::test]
async fn test_caller_cancellation() {
    let completed = Arc::new(AtomicBool::new(false));
    let (client, server) = connected(CapabilitySet::new(), slow_handlers(completed.clone())).await;
    let token = tokio_util::sync::CancellationToken::new();
    let call = {
        let client = client.clone();
        let token = token.clone();
        tokio::spawn(async move {
            client
                .request_with("custom/slow", None, RequestOptions::new().cancel_on(token))
                .await
        })
    };
    let watched = server.clone();
    wait_until(move || watched.inflight_count() == 1).await;
    token.cancel();
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    let watched = server.clone();
    wait_until(move || watched.inflight_count() == 0).await;
    assert!(!completed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_close_fails_pending_calls_and_closes_peer() {
    let flag = Arc::new(AtomicBool::new(false));
    let (client, server) = connected(CapabilitySet::new(), slow_handlers(flag)).await;

    let hook_ran = Arc::new(AtomicBool::new(false));
    {
        let hook_ran = hook_ran.clone();
        client.on_shutdown(move |s| {
            assert_eq!(s.phase(), LifecyclePhase::ShuttingDown);
            hook_ran.store(true, Ordering::SeqCst);
        });
    }

    let call = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .request_with("custom/slow", None, RequestOptions::new().no_timeout())
                .await
        })
    };
    sleep(Duration::from_millis(20)).await;
    client.close().await;

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::SessionClosing);
    assert!(hook_ran.load(Ordering::SeqCst));
    assert_eq!(client.phase(), LifecyclePhase::Closed);

    timeout(Duration::from_secs(2), server.wait_closed()).await.unwrap();
    assert_eq!(server.close_reason().as_deref(), Some("peer closed the connection"));

    let err = client.request(methods::PING, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::SessionClosing);
}

#[tokio::test]
async fn test_progress_reaches_caller() {
    let handlers = DispatchTable::new().on_request("custom/work", |ctx, _| async move {
        ctx.report_progress(0.5, Some(1.0), Some("half".into())).await?;
        Ok(json!("ok"))
    });
    let (client, _server) = connected(CapabilitySet::new(), handlers).await;
    let mut events = client.events();
    let result = client
        .request_with("custom/work", None, RequestOptions::new().progress_token("job-1"))
        .await
        .unwrap();
    assert_eq!(result, json!("ok"));

    match timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap() {
        SessionEvent::Progress(p) => {
            assert_eq!(p.progress_token.to_string(), "job-1");
            assert_eq!(p.message.as_deref(), Some("half"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_subscriptions_filter_updates() {
    let caps = CapabilitySet::new().with_resources(true, true);
    let (client, server) = connected(caps, DispatchTable::new()).await;
    let mut events = client.events();

    client.subscribe("file:///a").await.unwrap();
    client.subscribe("file:///a").await.unwrap();
    let watched = server.clone();
    wait_until(move || watched.subscriptions().contains("file:///a")).await;
    assert_eq!(server.subscriptions().len(), 1);

    assert!(server.notify_resource_updated("file:///a").await.unwrap());
    assert!(!server.notify_resource_updated("file:///b").await.unwrap());
    server.notify_list_changed(ListKind::Resources).await.unwrap();

    match timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap() {
        SessionEvent::ResourceUpdated { uri } => assert_eq!(uri, "file:///a"),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(
        timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap(),
        SessionEvent::ListChanged(ListKind::Resources)
    ));

    client.unsubscribe("file:///a").await.unwrap();
    let watched = server.clone();
    wait_until(move || watched.subscriptions().is_empty()).await;
}

#[tokio::test]
async fn test_subscribe_needs_server_support() {
    let (client, _server) =
        connected(CapabilitySet::new().with_resources(false, false), DispatchTable::new()).await;
    let err = client.subscribe("file:///a").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::CapabilityNotDeclared);
}

#[tokio::test]
async fn test_log_level_filters_messages() {
    let (client, server) = connected(CapabilitySet::new().with_logging(), DispatchTable::new()).await;
    let mut events = client.events();
    client
        .request(methods::LOGGING_SET_LEVEL, Some(json!({"level": "warning"})))
        .await
        .unwrap();
    assert_eq!(server.log_level(), LogLevel::Warning);

    server.log(LogLevel::Info, None, json!("dropped")).await.unwrap();
    server
        .log(LogLevel::Error, Some("db".into()), json!("kept"))
        .await
        .unwrap();
    match timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap() {
        SessionEvent::Log(p) => {
            assert_eq!(p.level, LogLevel::Error);
            assert_eq!(p.data, json!("kept"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[derive(Debug)]
struct FixedModel;

#[async_trait]
impl SamplingHandler for FixedModel {
    async fn create_message(&self, params: CreateMessageParams) -> McpResult<CreateMessageResult> {
        Ok(CreateMessageResult {
            role: Speaker::Assistant,
            content: Content::text(format!("{} messages", params.messages.len())),
            model: "fixed".into(),
            stop_reason: Some("endTurn".into()),
        })
    }
}

fn sampling_request() -> CreateMessageParams {
    serde_json::from_value(json!({
        "messages": [{"role": "user", "content": {"type": "text", "text": "hi"}}],
        "maxTokens": 32
    }))
    .unwrap()
}

#[tokio::test]
async fn test_bridged_sampling_without_client_capability() {
    let (_client, server) = connected(CapabilitySet::new().with_tools(false), DispatchTable::new()).await;
    let err = server
        .bridge()
        .create_message(sampling_request())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::CapabilityNotDeclared);
}

#[tokio::test]
async fn test_bridged_sampling_from_inside_a_handler() {
    let responder = BridgeResponder::new().sampling(Arc::new(FixedModel));
    let (client_end, server_end) = duplex_pair();
    let handlers = DispatchTable::new().on_request("custom/ask", |ctx, _| async move {
        let answer = ctx.peer().create_message(sampling_request()).await?;
        Ok(json!({"model": answer.model, "text": answer.content.as_text()}))
    });
    let server = Session::builder(Role::Server, server_end)
        .handlers(handlers)
        .start()
        .await
        .unwrap();
    let client = Session::builder(Role::Client, client_end)
        .capabilities(responder.declare(CapabilitySet::new()))
        .handlers(responder.install(DispatchTable::new()))
        .start()
        .await
        .unwrap();
    client.initialize().await.unwrap();
    let watched = server.clone();
    wait_until(move || watched.is_operational()).await;

    let result = client.request("custom/ask", None).await.unwrap();
    assert_eq!(result, json!({"model": "fixed", "text": "1 messages"}));
}

#[tokio::test]
async fn test_unsolicited_notification_without_capability_is_rejected() {
    let (client, server) = connected(CapabilitySet::new(), DispatchTable::new()).await;
    let mut events = client.events();
    let err = server.notify(methods::TOOLS_LIST_CHANGED, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::CapabilityNotDeclared);
    let err = server
        .notify_list_changed(ListKind::Tools)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::CapabilityNotDeclared);
    assert!(timeout(Duration::from_millis(50), events.recv()).await.is_err());
}

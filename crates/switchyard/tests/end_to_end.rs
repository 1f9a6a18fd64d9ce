//! Whole-stack scenarios: TCP sessions and hosted child processes.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Map, json};
use switchyard::prelude::*;
use switchyard::transport::TransportConfig;
use tokio::time::{sleep, timeout};

fn docs_server() -> McpServer {
    McpServer::builder()
        .name("docs")
        .tool(Tool::new("word_count", json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })), |_ctx, args| async move {
            let text = args.get("text").and_then(|v| v.as_str()).unwrap_or_default();
            Ok(CallToolResult::text(text.split_whitespace().count().to_string()))
        })
        .resource(Resource::new("docs://readme", "readme"), |_ctx, uri| async move {
            Ok(ReadResourceResult {
                contents: vec![ResourceContents::text(uri, Some("text/plain".into()), "read me")],
            })
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_tcp_session_with_push_updates() {
    let server = docs_server();
    let listener = TcpServer::bind("127.0.0.1:0", TransportConfig::default()).await.unwrap();
    let addr = listener.local_addr().to_string();
    let serving = server.clone();
    tokio::spawn(async move { serving.serve_tcp(listener).await });

    let client = Client::builder().id("tcp").connect(TcpTransport::new(addr)).await.unwrap();
    let counted = client
        .call_tool("word_count", Map::from_iter([("text".to_string(), json!("one two three"))]))
        .await
        .unwrap();
    assert_eq!(counted.content[0].as_text(), Some("3"));

    let invalid = client.call_tool("word_count", Map::new()).await.unwrap();
    assert!(invalid.is_error());

    client.subscribe("docs://readme").await.unwrap();
    let mut events = client.events();
    for _ in 0..200 {
        if server.hub().notify_resource_changed("docs://readme").await == 1 {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    let event = timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, SessionEvent::ResourceUpdated { uri } if uri == "docs://readme"));

    client.close().await;
    for _ in 0..200 {
        if server.hub().session_count() == 0 {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(server.hub().session_count(), 0);
}

#[tokio::test]
async fn test_host_reports_servers_that_fail_to_start() {
    let config = HostConfig {
        servers: vec![ServerSpec::new("ghost", "/nonexistent/switchyard-server")],
        ..HostConfig::default()
    };
    let host = Host::start(config).await;
    assert!(host.router().session_ids().is_empty());
    assert_eq!(host.failures().len(), 1);
    assert_eq!(host.failures()[0].0, "ghost");
    assert_eq!(host.failures()[0].1.kind, ErrorKind::Transport);
    host.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_host_routes_to_child_process() {
    let reply = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-11-25","capabilities":{},"serverInfo":{"name":"mini","version":"0"}}}"#;
    let script = format!("read line; printf '%s\\n' '{reply}'; echo 'mini ready' >&2; exec cat > /dev/null");
    let config = HostConfig {
        servers: vec![
            ServerSpec::new("mini", "sh").args(["-c", script.as_str()]),
            ServerSpec::new("ghost", "/nonexistent/switchyard-server"),
        ],
        ..HostConfig::default()
    };
    let host = Host::start(config).await;
    assert_eq!(host.router().session_ids(), vec!["mini".to_string()]);
    assert_eq!(host.failures().len(), 1);

    let mini = host.router().client("mini").unwrap();
    assert_eq!(mini.server_info().unwrap().name, "mini");
    assert!(host.router().list_tools().is_empty());

    host.shutdown().await;
    assert!(!mini.is_operational());
}

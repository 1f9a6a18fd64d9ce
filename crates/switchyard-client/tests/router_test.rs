//! Routing across several servers.

use std::collections::HashMap;
use std::future::{Ready, ready};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};
use switchyard_client::{Client, CollisionPolicy, Router, RouterConfig};
use switchyard_protocol::types::{
    CallToolResult, Content, GetPromptResult, ListToolsResult, Prompt, PromptMessage,
    ReadResourceResult, Resource, ResourceContents, Role as Speaker, Tool,
};
use switchyard_protocol::{CapabilitySet, ErrorKind, Role, methods};
use switchyard_server::{McpServer, ToolError};
use switchyard_session::{DispatchTable, ListKind, RequestContext, Session};
use switchyard_transport::duplex_pair;
use tokio::time::sleep;

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn answer(
    name: &'static str,
    tool: &'static str,
) -> impl Fn(RequestContext, Map<String, Value>) -> Ready<Result<CallToolResult, ToolError>>
+ Send
+ Sync
+ 'static {
    move |_ctx, _args| ready(Ok(CallToolResult::text(format!("{name}:{tool}"))))
}

fn member_server(name: &'static str) -> McpServer {
    McpServer::builder()
        .name(name)
        .tool(Tool::new("search", json!({"type": "object"})), answer(name, "search"))
        .tool(Tool::new(format!("{name}_only"), json!({"type": "object"})), answer(name, "only"))
        .tool(Tool::new("slow", json!({"type": "object"})), |_ctx, _args| async move {
            sleep(Duration::from_millis(500)).await;
            Ok(CallToolResult::text("late"))
        })
        .prompt(Prompt::new(format!("{name}_prompt")), move |_ctx, _args| async move {
            Ok(GetPromptResult {
                description: None,
                messages: vec![PromptMessage {
                    role: Speaker::User,
                    content: Content::text(name),
                }],
            })
        })
        .resource(Resource::new("mem://shared", "shared"), move |_ctx, uri| async move {
            Ok(ReadResourceResult {
                contents: vec![ResourceContents::text(uri, None, name)],
            })
        })
        .build()
        .unwrap()
}

async fn member(server: &McpServer, id: &str) -> (Client, Session) {
    let (client_end, server_end) = duplex_pair();
    let served = server.serve(server_end).await.unwrap();
    let client = Client::builder().id(id).connect(client_end).await.unwrap();
    let watched = served.clone();
    wait_until(move || watched.is_operational()).await;
    (client, served)
}

async fn router_with(policy: CollisionPolicy) -> (Router, Session, Session) {
    let router = Router::new(RouterConfig {
        collision_policy: policy,
        ..RouterConfig::default()
    });
    let (alpha, alpha_served) = member(&member_server("alpha"), "alpha").await;
    let (beta, beta_served) = member(&member_server("beta"), "beta").await;
    router.add_session(alpha).await.unwrap();
    router.add_session(beta).await.unwrap();
    (router, alpha_served, beta_served)
}

fn tool_names(router: &Router) -> Vec<String> {
    let mut names: Vec<String> = router.list_tools().into_iter().map(|t| t.name).collect();
    names.sort();
    names
}

async fn text_of(router: &Router, tool: &str) -> String {
    let result = router.call_tool(tool, Map::new()).await.unwrap();
    result.content[0].as_text().unwrap_or_default().to_string()
}

#[tokio::test]
async fn test_namespace_policy_prefixes_collisions() {
    let (router, _a, _b) = router_with(CollisionPolicy::Namespace).await;
    assert_eq!(
        tool_names(&router),
        vec!["alpha.search", "alpha.slow", "alpha_only", "beta.search", "beta.slow", "beta_only"]
    );
    assert_eq!(text_of(&router, "alpha.search").await, "alpha:search");
    assert_eq!(text_of(&router, "beta.search").await, "beta:search");
    assert_eq!(text_of(&router, "beta_only").await, "beta:only");

    let err = router.call_tool("search", Map::new()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownTarget);
}

#[tokio::test]
async fn test_priority_policy_prefers_first_connected() {
    let (router, _a, _b) = router_with(CollisionPolicy::Priority).await;
    assert_eq!(
        tool_names(&router),
        vec!["alpha_only", "beta_only", "search", "slow"]
    );
    assert_eq!(text_of(&router, "search").await, "alpha:search");
    assert_eq!(text_of(&router, "beta.search").await, "beta:search");
}

#[tokio::test]
async fn test_reject_ambiguous_hides_collisions() {
    let (router, _a, _b) = router_with(CollisionPolicy::RejectAmbiguous).await;
    assert_eq!(tool_names(&router), vec!["alpha_only", "beta_only"]);

    let err = router.call_tool("search", Map::new()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownTarget);
    assert!(err.message.contains("ambiguous"));
    assert_eq!(text_of(&router, "alpha.search").await, "alpha:search");
}

#[tokio::test]
async fn test_prompts_and_resources_route() {
    let (router, _a, _b) = router_with(CollisionPolicy::Priority).await;

    let prompt = router.get_prompt("beta_prompt", HashMap::new()).await.unwrap();
    assert_eq!(prompt.messages[0].content.as_text(), Some("beta"));

    let shared = router.read_resource("mem://shared").await.unwrap();
    assert_eq!(shared.contents, vec![ResourceContents::text("mem://shared", None, "alpha")]);
    let namespaced = router.read_resource("beta.mem://shared").await.unwrap();
    assert_eq!(namespaced.contents[0].uri(), "mem://shared");
    assert_eq!(router.list_resources().len(), 1);
}

#[tokio::test]
async fn test_closed_member_leaves_without_affecting_others() {
    let (router, _a, beta_served) = router_with(CollisionPolicy::Priority).await;
    assert_eq!(router.session_ids(), vec!["alpha", "beta"]);

    beta_served.close().await;
    let watched = router.clone();
    wait_until(move || watched.session_ids() == vec!["alpha".to_string()]).await;

    assert!(!tool_names(&router).contains(&"beta_only".to_string()));
    let err = router.call_tool("beta_only", Map::new()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownTarget);
    assert_eq!(text_of(&router, "search").await, "alpha:search");
}

#[tokio::test]
async fn test_pending_call_survives_another_member_closing() {
    let (router, _a, beta_served) = router_with(CollisionPolicy::Namespace).await;

    let slow = {
        let router = router.clone();
        tokio::spawn(async move { router.call_tool("alpha.slow", Map::new()).await })
    };
    sleep(Duration::from_millis(50)).await;
    beta_served.close().await;
    let watched = router.clone();
    wait_until(move || watched.session_ids() == vec!["alpha".to_string()]).await;

    let result = slow.await.unwrap().unwrap();
    assert_eq!(result.content[0].as_text(), Some("late"));
}

#[tokio::test]
async fn test_inflight_call_fails_when_its_session_closes() {
    let (router, _a, beta_served) = router_with(CollisionPolicy::Namespace).await;

    let slow = {
        let router = router.clone();
        tokio::spawn(async move { router.call_tool("beta.slow", Map::new()).await })
    };
    sleep(Duration::from_millis(50)).await;
    beta_served.close().await;

    let err = slow.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::SessionClosing);
    assert_eq!(text_of(&router, "alpha.search").await, "alpha:search");
}

#[tokio::test]
async fn test_list_changed_triggers_refresh() {
    let tools = Arc::new(Mutex::new(vec![Tool::new("first", json!({"type": "object"}))]));
    let listed = tools.clone();
    let handlers = DispatchTable::new().on_typed(methods::TOOLS_LIST, move |_ctx, _params: Value| {
        let listed = listed.clone();
        async move {
            let tools = listed.lock().unwrap().clone();
            Ok(ListToolsResult {
                tools,
                next_cursor: None,
            })
        }
    });
    let (client_end, server_end) = duplex_pair();
    let server = Session::builder(Role::Server, server_end)
        .capabilities(CapabilitySet::new().with_tools(true))
        .handlers(handlers)
        .start()
        .await
        .unwrap();
    let client = Client::builder().id("dynamic").connect(client_end).await.unwrap();
    let watched = server.clone();
    wait_until(move || watched.is_operational()).await;

    let router = Router::default();
    router.add_session(client).await.unwrap();
    assert_eq!(tool_names(&router), vec!["first"]);

    tools.lock().unwrap().push(Tool::new("second", json!({"type": "object"})));
    server.notify_list_changed(ListKind::Tools).await.unwrap();

    let watched = router.clone();
    wait_until(move || watched.list_tools().len() == 2).await;
    assert_eq!(tool_names(&router), vec!["first", "second"]);
}

#[tokio::test]
async fn test_server_catalog_changes_reach_the_router() {
    let server = McpServer::builder()
        .name("growing")
        .list_changed(true)
        .tool(Tool::new("first", json!({"type": "object"})), answer("growing", "first"))
        .build()
        .unwrap();
    let (client, _served) = member(&server, "growing").await;
    let router = Router::default();
    router.add_session(client).await.unwrap();
    assert_eq!(tool_names(&router), vec!["first"]);

    server
        .add_tool(Tool::new("second", json!({"type": "object"})), answer("growing", "second"))
        .await
        .unwrap();
    let watched = router.clone();
    wait_until(move || watched.list_tools().len() == 2).await;
    assert_eq!(text_of(&router, "second").await, "growing:second");

    server.remove_tool("first").await.unwrap();
    let watched = router.clone();
    wait_until(move || watched.list_tools().len() == 1).await;
    let err = router.call_tool("first", Map::new()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownTarget);
}

fn dotted_pair() -> (McpServer, McpServer) {
    let alpha = McpServer::builder()
        .name("alpha")
        .tool(Tool::new("search", json!({"type": "object"})), answer("alpha", "search"))
        .build()
        .unwrap();
    let beta = McpServer::builder()
        .name("beta")
        .tool(Tool::new("search", json!({"type": "object"})), answer("beta", "search"))
        .tool(Tool::new("alpha.search", json!({"type": "object"})), answer("beta", "dotted"))
        .build()
        .unwrap();
    (alpha, beta)
}

#[tokio::test]
async fn test_bare_name_never_takes_a_namespaced_route() {
    for policy in [
        CollisionPolicy::Namespace,
        CollisionPolicy::Priority,
        CollisionPolicy::RejectAmbiguous,
    ] {
        let (alpha_server, beta_server) = dotted_pair();
        let router = Router::new(RouterConfig {
            collision_policy: policy,
            ..RouterConfig::default()
        });
        let (alpha, _a) = member(&alpha_server, "alpha").await;
        let (beta, _b) = member(&beta_server, "beta").await;
        router.add_session(alpha).await.unwrap();
        router.add_session(beta).await.unwrap();

        let names = tool_names(&router);
        assert_eq!(
            names.iter().filter(|n| *n == "alpha.search").count(),
            usize::from(policy == CollisionPolicy::Namespace),
            "{policy:?}: {names:?}"
        );
        assert!(names.contains(&"beta.alpha.search".to_string()), "{policy:?}: {names:?}");
        assert_eq!(text_of(&router, "alpha.search").await, "alpha:search", "{policy:?}");
        assert_eq!(text_of(&router, "beta.alpha.search").await, "beta:dotted", "{policy:?}");
        assert_eq!(text_of(&router, "beta.search").await, "beta:search", "{policy:?}");
    }
}

#[tokio::test]
async fn test_session_id_must_not_contain_separator() {
    let router = Router::default();
    let (client, _served) = member(&member_server("alpha"), "a.b").await;
    let err = router.add_session(client).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidParams);
    assert!(router.session_ids().is_empty());
}

#[tokio::test]
async fn test_duplicate_session_id_is_rejected() {
    let router = Router::default();
    let (first, _a) = member(&member_server("alpha"), "same").await;
    let (second, _b) = member(&member_server("beta"), "same").await;
    router.add_session(first).await.unwrap();
    let err = router.add_session(second).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidParams);

    let snapshot = router.snapshot();
    assert_eq!(snapshot.session_ids().collect::<Vec<_>>(), vec!["same"]);
    assert_eq!(snapshot.tool_route("search").unwrap().session_id(), "same");
}

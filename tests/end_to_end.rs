//! End-to-end tests: real HTTP requests against a server running real
//! worker isolates.

mod common;

use common::{start_server, start_server_with_dispatcher, test_config, write_worker};
use edgeserve::config::FailureMode;
use edgeserve::dispatch::Dispatcher;
use edgeserve::routing::{HookOutcome, RouteTarget};
use serde_json::json;
use std::sync::Arc;

const HELLO_WORKER: &str = r#"
addEventListener("fetch", (event) => {
  event.respondWith(new Response("hi", { headers: { "content-type": "text/plain" } }));
});
"#;

const ECHO_PARAMS_WORKER: &str = r#"
addEventListener("fetch", (event) => {
  event.respondWith(new Response(JSON.stringify(event.request.params || {}), {
    headers: { "content-type": "application/json" },
  }));
});
"#;

const ECHO_BODY_WORKER: &str = r#"
addEventListener("fetch", (event) => {
  event.respondWith((async () => {
    const text = await event.request.text();
    return new Response(text, { status: 201 });
  })());
});
"#;

const BAD_RESPONSE_WORKER: &str = r#"
addEventListener("fetch", (event) => {
  event.respondWith("not a response");
});
"#;

#[tokio::test]
async fn test_wildcard_serves_path_worker() {
    let dir = tempfile::tempdir().unwrap();
    write_worker(dir.path(), "hello.js", HELLO_WORKER);
    let (addr, _shutdown) = start_server(test_config(dir.path(), json!("*"))).await;

    let response = reqwest::get(format!("http://{addr}/hello")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain"
    );
    assert_eq!(response.text().await.unwrap(), "hi");
}

#[tokio::test]
async fn test_descriptor_route_points_at_worker() {
    let dir = tempfile::tempdir().unwrap();
    write_worker(dir.path(), "hello.js", HELLO_WORKER);
    let routes = json!({ "/greet": { "path": "/hello" } });
    let (addr, _shutdown) = start_server(test_config(dir.path(), routes)).await;

    let response = reqwest::get(format!("http://{addr}/greet")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "hi");
}

#[tokio::test]
async fn test_unmatched_route_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    write_worker(dir.path(), "hello.js", HELLO_WORKER);
    let routes = json!({ "/greet": { "path": "/hello" } });
    let (addr, _shutdown) = start_server(test_config(dir.path(), routes)).await;

    let response = reqwest::get(format!("http://{addr}/nope")).await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_method_keys_scope_routes() {
    let dir = tempfile::tempdir().unwrap();
    write_worker(dir.path(), "hello.js", HELLO_WORKER);
    let routes = json!({ "get": { "/only": { "path": "/hello" } } });
    let (addr, _shutdown) = start_server(test_config(dir.path(), routes)).await;
    let client = reqwest::Client::new();

    let get = client
        .get(format!("http://{addr}/only"))
        .send()
        .await
        .unwrap();
    assert_eq!(get.status(), 200);

    let post = client
        .post(format!("http://{addr}/only"))
        .send()
        .await
        .unwrap();
    assert_eq!(post.status(), 404);
}

#[tokio::test]
async fn test_path_params_reach_worker_coerced() {
    let dir = tempfile::tempdir().unwrap();
    write_worker(dir.path(), "echo.js", ECHO_PARAMS_WORKER);
    let routes = json!({ "/users/:id": { "path": "/echo" } });
    let (addr, _shutdown) = start_server(test_config(dir.path(), routes)).await;

    let response = reqwest::get(format!("http://{addr}/users/42")).await.unwrap();
    assert_eq!(response.status(), 200);
    let params: serde_json::Value = response.json().await.unwrap();
    assert_eq!(params["id"], json!(42));
}

#[tokio::test]
async fn test_query_params_override_defaults() {
    let dir = tempfile::tempdir().unwrap();
    write_worker(dir.path(), "echo.js", ECHO_PARAMS_WORKER);
    let routes = json!({
        "/search": { "path": "/echo", "useQuery": true, "params": { "limit": 10 } }
    });
    let (addr, _shutdown) = start_server(test_config(dir.path(), routes)).await;

    let response = reqwest::get(format!("http://{addr}/search?limit=5&q=abc"))
        .await
        .unwrap();
    let params: serde_json::Value = response.json().await.unwrap();
    assert_eq!(params["limit"], json!(5));
    assert_eq!(params["q"], json!("abc"));
}

#[tokio::test]
async fn test_post_body_reaches_worker() {
    let dir = tempfile::tempdir().unwrap();
    write_worker(dir.path(), "echo-body.js", ECHO_BODY_WORKER);
    let routes = json!({ "/echo-body": { "path": "/echo-body" } });
    let (addr, _shutdown) = start_server(test_config(dir.path(), routes)).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/echo-body"))
        .body("payload text")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(response.text().await.unwrap(), "payload text");
}

#[tokio::test]
async fn test_open_failure_mode_hides_detail() {
    let dir = tempfile::tempdir().unwrap();
    write_worker(dir.path(), "bad.js", BAD_RESPONSE_WORKER);
    let (addr, _shutdown) = start_server(test_config(dir.path(), json!("*"))).await;

    let response = reqwest::get(format!("http://{addr}/bad")).await.unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "");
}

#[tokio::test]
async fn test_error_failure_mode_exposes_detail() {
    let dir = tempfile::tempdir().unwrap();
    write_worker(dir.path(), "bad.js", BAD_RESPONSE_WORKER);
    let mut config = test_config(dir.path(), json!("*"));
    config.workers.failure_mode = FailureMode::Error;
    config
        .workers
        .failure_error_headers
        .insert("access-control-allow-origin".into(), "*".into());
    let (addr, _shutdown) = start_server(config).await;

    let response = reqwest::get(format!("http://{addr}/bad")).await.unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
    assert!(response.text().await.unwrap().contains("contract"));
}

#[tokio::test]
async fn test_handler_chain_redirects_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    write_worker(dir.path(), "hello.js", HELLO_WORKER);
    let config = test_config(dir.path(), json!(null));
    let mut dispatcher = Dispatcher::new(config.clone()).unwrap();
    let redirect: edgeserve::routing::RouteHook = Arc::new(|_req| {
        HookOutcome::Redirect(RouteTarget {
            path: "/hello".into(),
            ..Default::default()
        })
    });
    dispatcher.add_chain(None, "/legacy", vec![redirect]).unwrap();
    let (addr, _shutdown) = start_server_with_dispatcher(config, dispatcher).await;

    let response = reqwest::get(format!("http://{addr}/legacy")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "hi");
}

#[tokio::test]
async fn test_responses_carry_a_request_id() {
    let dir = tempfile::tempdir().unwrap();
    write_worker(dir.path(), "hello.js", HELLO_WORKER);
    let (addr, _shutdown) = start_server(test_config(dir.path(), json!("*"))).await;

    let response = reqwest::get(format!("http://{addr}/hello")).await.unwrap();
    let id = response.headers().get("x-request-id").unwrap();
    assert!(!id.to_str().unwrap().is_empty());

    // A caller-supplied id is echoed back, not replaced.
    let response = reqwest::Client::new()
        .get(format!("http://{addr}/hello"))
        .header("x-request-id", "trace-me")
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers().get("x-request-id").unwrap(), "trace-me");
}

#[tokio::test]
async fn test_shutdown_evicts_live_workers() {
    let dir = tempfile::tempdir().unwrap();
    write_worker(dir.path(), "hello.js", HELLO_WORKER);
    let config = test_config(dir.path(), json!("*"));
    let dispatcher = Dispatcher::new(config.clone()).unwrap();
    let registry = Arc::clone(dispatcher.registry());
    let (addr, shutdown) = start_server_with_dispatcher(config, dispatcher).await;

    let response = reqwest::get(format!("http://{addr}/hello")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(registry.live_count(), 1);

    shutdown.trigger();
    // The accept loop drains, then the server closes every unit.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while registry.live_count() > 0 {
        assert!(std::time::Instant::now() < deadline, "workers never evicted");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}

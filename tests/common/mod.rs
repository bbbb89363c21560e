//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::path::Path;

use tokio::net::TcpListener;

use edgeserve::dispatch::Dispatcher;
use edgeserve::{HttpServer, ServerConfig, Shutdown};

/// Writes a worker module into the test's worker root.
pub fn write_worker(dir: &Path, name: &str, source: &str) {
    std::fs::write(dir.join(name), source).expect("write worker source");
}

/// A config rooted at `dir` with limits suited to tests.
pub fn test_config(dir: &Path, routes: serde_json::Value) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.port = 0;
    config.workers.root = dir.to_str().expect("utf8 path").to_string();
    config.workers.limits.max_request_time_ms = 5_000;
    config.workers.limits.cpu_budget_ms = 60_000;
    config.routes = routes;
    config
}

/// Starts a server on an ephemeral port. The returned `Shutdown` stops it.
pub async fn start_server(config: ServerConfig) -> (SocketAddr, Shutdown) {
    let server = HttpServer::new(config).expect("compile routes");
    serve(server).await
}

/// Same, around a dispatcher that already has handler chains registered.
#[allow(dead_code)]
pub async fn start_server_with_dispatcher(
    config: ServerConfig,
    dispatcher: Dispatcher,
) -> (SocketAddr, Shutdown) {
    serve(HttpServer::with_dispatcher(config, dispatcher)).await
}

async fn serve(server: HttpServer) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });
    (addr, shutdown)
}

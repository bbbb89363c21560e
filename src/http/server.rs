//! HTTP server setup and request entry point.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all dispatch handler
//! - Wire up middleware (tracing, request timeout)
//! - Lift HTTP requests into `DispatchRequest`s
//! - Translate worker replies and dispatch failures into responses
//! - Apply the configured failure mode at the edge

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use indexmap::IndexMap;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{FailureMode, ServerConfig};
use crate::dispatch::{DispatchError, DispatchRequest, Dispatcher};
use crate::routing::TableError;
use crate::worker::WorkerReply;

const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Headroom added to the worker deadline for the outer HTTP timeout, so the
/// dispatcher's own timeout fires first and applies its policy.
const TIMEOUT_HEADROOM_MS: u64 = 2_000;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<ServerConfig>,
}

/// HTTP server fronting the dispatch pipeline.
pub struct HttpServer {
    router: Router,
    dispatcher: Arc<Dispatcher>,
}

impl HttpServer {
    /// Create a server, compiling the route table from config.
    pub fn new(config: ServerConfig) -> Result<Self, TableError> {
        let dispatcher = Dispatcher::new(config.clone())?;
        Ok(Self::with_dispatcher(config, dispatcher))
    }

    /// Create a server around a prepared dispatcher, for callers that
    /// register handler chains first.
    pub fn with_dispatcher(config: ServerConfig, dispatcher: Dispatcher) -> Self {
        let config = Arc::new(config);
        let dispatcher = Arc::new(dispatcher);
        let state = AppState {
            dispatcher: Arc::clone(&dispatcher),
            config: Arc::clone(&config),
        };
        let router = Self::build_router(&config, state);
        Self { router, dispatcher }
    }

    /// Build the Axum router with all middleware layers. Request ids are
    /// minted in middleware and echoed on every response.
    fn build_router(config: &ServerConfig, state: AppState) -> Router {
        let outer_timeout =
            config.workers.limits.max_request_time_ms.max(1) + TIMEOUT_HEADROOM_MS;
        Router::new()
            .route("/{*path}", any(dispatch_handler))
            .route("/", any(dispatch_handler))
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TimeoutLayer::new(Duration::from_millis(outer_timeout)))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server until Ctrl+C or the shutdown subscription fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Shutdown signal received");
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Shutdown triggered");
                    }
                }
            })
            .await?;

        // Accepting has stopped; close every live worker unit before
        // returning control to the caller.
        self.dispatcher.registry().evict_all();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Catch-all handler: every path is dispatched through the route table.
async fn dispatch_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let method = request.method().as_str().to_uppercase();
    let uri = request.uri().clone();
    let path = uri.path().to_string();

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        "Dispatching request"
    );

    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| state.config.bind_address());
    let url = format!("{}://{}{}", state.config.listener.protocol, host, uri);

    let query: Vec<(String, String)> = uri
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();

    let mut headers: IndexMap<String, String> = IndexMap::new();
    for (name, value) in request.headers() {
        let Ok(value) = value.to_str() else { continue };
        let key = name.as_str().to_lowercase();
        match headers.get_mut(&key) {
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => {
                headers.insert(key, value.to_string());
            }
        }
    }

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) if bytes.is_empty() => None,
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(_) => {
            return (StatusCode::PAYLOAD_TOO_LARGE, Body::empty()).into_response();
        }
    };

    let dispatch = DispatchRequest {
        method,
        url,
        path,
        query,
        headers,
        body,
    };

    match state.dispatcher.dispatch(dispatch).await {
        Ok(reply) => worker_response(reply),
        Err(err) if err.is_not_found() => {
            tracing::debug!(request_id = %request_id, "No route matched");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(err) => failure_response(&state, &request_id, err),
    }
}

/// Translates the worker's reply into an HTTP response. Unmappable status
/// codes and header values are dropped rather than failing the request.
fn worker_response(reply: WorkerReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::builder().status(status);
    if let Some(response_headers) = response.headers_mut() {
        for (key, value) in &reply.headers {
            let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
                continue;
            };
            let Ok(value) = HeaderValue::from_str(value) else {
                continue;
            };
            response_headers.insert(name, value);
        }
    }
    let body = reply.body.map(Body::from).unwrap_or_else(Body::empty);
    response.body(body).unwrap_or_else(|_| {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

/// Applies the configured failure mode to a dispatch error.
fn failure_response(state: &AppState, request_id: &str, err: DispatchError) -> Response {
    match state.config.workers.failure_mode {
        FailureMode::Open => {
            tracing::warn!(request_id = %request_id, error = %err, "Dispatch failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        FailureMode::Error => {
            tracing::warn!(request_id = %request_id, error = %err, "Dispatch failed");
            let mut response = Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR);
            if let Some(response_headers) = response.headers_mut() {
                for (key, value) in &state.config.workers.failure_error_headers {
                    let (Ok(name), Ok(value)) = (
                        HeaderName::from_bytes(key.as_bytes()),
                        HeaderValue::from_str(value),
                    ) else {
                        continue;
                    };
                    response_headers.insert(name, value);
                }
            }
            response
                .body(Body::from(err.to_string()))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        FailureMode::Fatal => {
            tracing::error!(request_id = %request_id, error = %err, "Fatal dispatch failure");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_response_translation() {
        let reply = WorkerReply {
            status: 201,
            status_text: Some("Created".into()),
            headers: IndexMap::from([("content-type".to_string(), "text/plain".to_string())]),
            body: Some("made".into()),
        };
        let response = worker_response(reply);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/plain"
        );
    }

    #[test]
    fn test_worker_response_bad_status_maps_to_500() {
        let reply = WorkerReply {
            status: 42,
            status_text: None,
            headers: IndexMap::new(),
            body: None,
        };
        let response = worker_response(reply);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

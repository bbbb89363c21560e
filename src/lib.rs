//! Edge-worker serving library.
//!
//! Runs service-worker style JavaScript modules behind an HTTP front:
//! requests are resolved through a route table, dispatched to cached
//! worker isolates, and the workers' responses returned to the client.

pub mod config;
pub mod dispatch;
pub mod http;
pub mod kv;
pub mod lifecycle;
pub mod routing;
pub mod supervisor;
pub mod worker;

pub use config::{FailureMode, ServerConfig};
pub use dispatch::{DispatchRequest, Dispatcher};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use routing::RouteTable;
pub use worker::WorkerRegistry;

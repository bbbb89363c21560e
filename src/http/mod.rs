//! HTTP edge subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, catch-all handler)
//!     → DispatchRequest (method, url, headers, body lifted out)
//!     → [dispatch layer resolves route, invokes worker]
//!     → WorkerReply translated back to an HTTP response
//! ```

pub mod server;

pub use server::HttpServer;

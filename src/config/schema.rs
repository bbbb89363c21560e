//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Root configuration for the edge-worker server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (protocol, hostname, port, fork pool size).
    pub listener: ListenerConfig,

    /// Worker fetch/spawn/eviction settings.
    pub workers: WorkerConfig,

    /// KV capability settings.
    pub kv: KvConfig,

    /// Route table, as an arbitrary nested mapping. Pattern keys start with
    /// `/`, method keys (`get`, `post`, ...) select method-specific subtrees,
    /// `*` matches any path. Compiled into a `RouteTable` at startup.
    pub routes: serde_json::Value,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Protocol to serve ("http"; TLS termination is left to a fronting proxy).
    pub protocol: String,

    /// Hostname to bind.
    pub hostname: String,

    /// Port to bind.
    pub port: u16,

    /// Number of OS processes in the fork pool (capped at CPU count).
    pub max_servers: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            hostname: "localhost".to_string(),
            port: 3000,
            max_servers: 1,
        }
    }
}

/// How dispatch failures are translated into client responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Hide all detail: generic 500 with an empty body.
    #[default]
    Open,
    /// Surface the error text in the body plus the configured error headers.
    /// Development only.
    Error,
    /// Re-throw: log and exit the process non-zero so the supervisor
    /// respawns it. Fail-fast correctness over availability.
    Fatal,
}

/// Worker fetch, caching and execution settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Root for worker source lookup: a local directory or an http(s) URL.
    pub root: String,

    /// Default worker file name, used when a wildcard route resolves a
    /// directory path.
    pub default_worker: String,

    /// Cache spawned workers across requests. When false every request
    /// spawns (and closes) a fresh unit.
    pub cache_workers: bool,

    /// Optional TTL on cache entries in ms. A route `maxAge` overrides it
    /// for that route only.
    pub cache_ttl_ms: Option<u64>,

    /// Failure-mode policy applied at the dispatch boundary.
    pub failure_mode: FailureMode,

    /// Headers attached to `error`-mode failure responses (CORS etc).
    pub failure_error_headers: IndexMap<String, String>,

    /// Resource limits attached to each worker at creation.
    pub limits: WorkerLimits,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            root: ".".to_string(),
            default_worker: "worker.js".to_string(),
            cache_workers: true,
            cache_ttl_ms: None,
            failure_mode: FailureMode::Open,
            failure_error_headers: IndexMap::new(),
            limits: WorkerLimits::default(),
        }
    }
}

/// Immutable resource limits for one worker unit.
///
/// Fixed at spawn time; changing any field for a path invalidates the cached
/// worker and forces recreation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerLimits {
    /// Eviction after this long with no requests (0 disables).
    pub max_idle_ms: u64,

    /// Eviction after this absolute lifetime regardless of activity
    /// (0 disables).
    pub max_age_ms: u64,

    /// Per-request deadline; on expiry the worker receives a close signal.
    pub max_request_time_ms: u64,

    /// CPU time budget per request, enforced by the worker itself.
    pub cpu_budget_ms: u64,

    /// v8 young-generation heap ceiling in MB.
    pub max_young_heap_mb: usize,

    /// v8 old-generation heap ceiling in MB.
    pub max_old_heap_mb: usize,

    /// Stack size of the worker thread in MB.
    pub stack_size_mb: usize,

    /// Code-range size in MB. Participates in cache-key equality; the
    /// public isolate API exposes no code-range knob.
    pub code_range_mb: usize,
}

impl Default for WorkerLimits {
    fn default() -> Self {
        Self {
            max_idle_ms: 60_000,
            max_age_ms: 0,
            max_request_time_ms: 8_000,
            cpu_budget_ms: 5_000,
            max_young_heap_mb: 256,
            max_old_heap_mb: 256,
            stack_size_mb: 4,
            code_range_mb: 2,
        }
    }
}

/// KV capability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KvConfig {
    /// Directory holding one JSON file per named store.
    pub dir: String,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            dir: ".edgeserve-kv".to_string(),
        }
    }
}

impl ServerConfig {
    /// Bind address string for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.listener.hostname, self.listener.port)
    }
}

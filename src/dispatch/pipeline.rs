//! Request dispatch pipeline.
//!
//! One request flows: route resolution, handler chains, parameter merge,
//! worker lookup or creation, deadline-bounded invocation, reply
//! translation. Failure-mode policy is applied one layer up, at the HTTP
//! boundary.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::routing::{
    coerce_value, resolve, HookOutcome, HookRequest, Resolved, RouteHook, RouteTable, RouteTarget,
    TableError,
};
use crate::worker::{
    CreationOptions, InvokePayload, WorkerError, WorkerRecord, WorkerRegistry, WorkerReply,
};

use super::error::DispatchError;

/// One inbound request, already lifted out of the HTTP layer.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub method: String,
    /// Full request URL as the worker sees it.
    pub url: String,
    pub path: String,
    /// Decoded query pairs in order of appearance.
    pub query: Vec<(String, String)>,
    /// Lower-cased, comma-joined headers in wire order.
    pub headers: IndexMap<String, String>,
    pub body: Option<String>,
}

pub struct Dispatcher {
    table: RouteTable,
    registry: Arc<WorkerRegistry>,
    config: ServerConfig,
}

impl Dispatcher {
    pub fn new(config: ServerConfig) -> Result<Dispatcher, TableError> {
        let table = RouteTable::compile(&config.routes)?;
        let registry = WorkerRegistry::new(config.workers.clone());
        Ok(Dispatcher {
            table,
            registry,
            config,
        })
    }

    /// Registers a handler chain. Chains are code, not config, so this only
    /// works before the dispatcher is shared.
    pub fn add_chain(
        &mut self,
        method: Option<&str>,
        pattern: &str,
        hooks: Vec<RouteHook>,
    ) -> Result<(), TableError> {
        self.table.add_chain(method, pattern, hooks)
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub async fn dispatch(&self, req: DispatchRequest) -> Result<WorkerReply, DispatchError> {
        let resolved = resolve(
            &self.table,
            &req.method,
            &req.path,
            &self.config.workers.default_worker,
        )
        .ok_or_else(|| DispatchError::RouteNotFound {
            method: req.method.clone(),
            path: req.path.clone(),
        })?;

        let (target, captures) = match resolved {
            Resolved::Target(m) => (m.target, m.params),
            Resolved::Chain { hooks, params } => {
                let target = run_chain(&hooks, &req, &params);
                (target, params)
            }
        };
        debug!(path = %req.path, worker = %target.path, "route resolved");

        let limits = target.limits.unwrap_or(self.config.workers.limits);
        let params = merge_params(&target, captures, &req.query);
        let options = CreationOptions {
            root: self.config.workers.root.clone(),
            limits,
            use_query: target.use_query,
            params: target.params.clone(),
            cache_ttl_ms: target.max_age,
        };

        let record = self.registry.get_or_create(&target.path, options).await?;
        let result = self.invoke(&record, &req, params, limits).await;
        if !self.registry.cache_enabled() {
            record.handle.close();
        }
        result.map_err(Into::into)
    }

    async fn invoke(
        &self,
        record: &Arc<WorkerRecord>,
        req: &DispatchRequest,
        params: BTreeMap<String, Value>,
        limits: crate::config::WorkerLimits,
    ) -> Result<WorkerReply, WorkerError> {
        let payload = InvokePayload {
            method: req.method.clone(),
            url: req.url.clone(),
            headers: req.headers.clone(),
            body: req.body.clone(),
            params,
        };
        let message =
            serde_json::to_string(&payload).map_err(|e| WorkerError::Serialization(e.to_string()))?;

        let invocation = record.handle.invoke(message);
        let outcome = if limits.max_request_time_ms > 0 {
            let deadline = Duration::from_millis(limits.max_request_time_ms);
            match tokio::time::timeout(deadline, invocation).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(path = %record.path, "request deadline expired, closing worker");
                    record.handle.terminate();
                    self.registry.evict(record);
                    return Err(WorkerError::ExecutionTimeout(limits.max_request_time_ms));
                }
            }
        } else {
            invocation.await
        };

        match outcome {
            Ok(json) => serde_json::from_str::<WorkerReply>(&json).map_err(|_| {
                WorkerError::ContractViolation("respondWith did not return a Response".into())
            }),
            Err(e) => {
                if matches!(
                    e,
                    WorkerError::Crash(_)
                        | WorkerError::CpuBudgetExceeded(_)
                        | WorkerError::HeapLimitExceeded(_)
                ) {
                    self.registry.evict(record);
                }
                Err(e)
            }
        }
    }
}

/// Runs a handler chain in order. `Continue` falls through, `Stop` and
/// chain exhaustion both yield the default target for the matched path,
/// `Redirect` supplies its own target.
fn run_chain(
    hooks: &[RouteHook],
    req: &DispatchRequest,
    params: &BTreeMap<String, Value>,
) -> RouteTarget {
    let context = HookRequest {
        method: &req.method,
        path: &req.path,
        params,
    };
    for hook in hooks {
        match hook(&context) {
            HookOutcome::Continue => continue,
            HookOutcome::Stop => break,
            HookOutcome::Redirect(target) => return target,
        }
    }
    RouteTarget {
        path: req.path.clone(),
        ..Default::default()
    }
}

/// Route defaults are weakest, path captures override them, query pairs
/// (when enabled) override both.
fn merge_params(
    target: &RouteTarget,
    captures: BTreeMap<String, Value>,
    query: &[(String, String)],
) -> BTreeMap<String, Value> {
    let mut params = target.params.clone();
    params.extend(captures);
    if target.use_query {
        for (key, raw) in query {
            params.insert(key.clone(), coerce_value(raw));
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(path: &str) -> DispatchRequest {
        DispatchRequest {
            method: "GET".into(),
            url: format!("http://localhost:3000{path}"),
            path: path.into(),
            query: Vec::new(),
            headers: IndexMap::new(),
            body: None,
        }
    }

    #[test]
    fn test_merge_params_precedence() {
        let target = RouteTarget {
            params: BTreeMap::from([
                ("tier".to_string(), json!("default")),
                ("id".to_string(), json!(0)),
            ]),
            use_query: true,
            ..Default::default()
        };
        let captures = BTreeMap::from([("id".to_string(), json!(42))]);
        let query = vec![("tier".to_string(), "gold".to_string())];

        let merged = merge_params(&target, captures, &query);
        assert_eq!(merged["id"], json!(42));
        assert_eq!(merged["tier"], json!("gold"));
    }

    #[test]
    fn test_merge_params_ignores_query_when_disabled() {
        let target = RouteTarget::default();
        let query = vec![("tier".to_string(), "gold".to_string())];
        let merged = merge_params(&target, BTreeMap::new(), &query);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_chain_stop_yields_default_target() {
        let hooks: Vec<RouteHook> = vec![
            Arc::new(|_| HookOutcome::Continue),
            Arc::new(|_| HookOutcome::Stop),
            Arc::new(|_| {
                HookOutcome::Redirect(RouteTarget {
                    path: "/never".into(),
                    ..Default::default()
                })
            }),
        ];
        let target = run_chain(&hooks, &request("/orders"), &BTreeMap::new());
        assert_eq!(target.path, "/orders");
    }

    #[test]
    fn test_chain_redirect_supplies_target() {
        let hooks: Vec<RouteHook> = vec![Arc::new(|_| {
            HookOutcome::Redirect(RouteTarget {
                path: "/special".into(),
                ..Default::default()
            })
        })];
        let target = run_chain(&hooks, &request("/orders"), &BTreeMap::new());
        assert_eq!(target.path, "/special");
    }

    #[test]
    fn test_chain_exhaustion_yields_default_target() {
        let hooks: Vec<RouteHook> = vec![Arc::new(|_| HookOutcome::Continue)];
        let target = run_chain(&hooks, &request("/orders"), &BTreeMap::new());
        assert_eq!(target.path, "/orders");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_route_is_not_found() {
        let dispatcher = Dispatcher::new(ServerConfig::default()).unwrap();
        let err = dispatcher.dispatch(request("/missing")).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(dispatcher.registry().spawned_total(), 0);
    }
}

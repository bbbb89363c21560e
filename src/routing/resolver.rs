//! Route resolution.
//!
//! # Responsibilities
//! - Descend the route tree for (method, path)
//! - Extract `:name` params with JSON coercion
//! - Apply wildcard target synthesis
//!
//! # Design Decisions
//! - Pure function: no I/O, no state, same input always resolves the same
//! - No backtracking: any segment mismatch fails the whole pattern
//! - Param values are JSON-parsed when the raw segment parses as JSON,
//!   else kept as the literal string (deliberate convenience, not a bug)

use std::collections::BTreeMap;

use serde_json::Value;

use crate::routing::table::{
    EntryKey, RouteHook, RouteNode, RoutePattern, RouteTable, RouteTarget, Segment,
};

/// A successful resolution to a concrete target.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub target: RouteTarget,
    pub params: BTreeMap<String, Value>,
}

/// Outcome of resolution: a direct target, or a handler chain the
/// dispatcher must run.
pub enum Resolved {
    Target(RouteMatch),
    Chain {
        hooks: Vec<RouteHook>,
        params: BTreeMap<String, Value>,
    },
}

/// Resolve `(method, path)` against the table. `None` is a terminal
/// not-found, surfaced as HTTP 404 by the dispatcher.
pub fn resolve(
    table: &RouteTable,
    method: &str,
    path: &str,
    default_worker: &str,
) -> Option<Resolved> {
    let method = method.to_ascii_lowercase();
    resolve_node(&table.root, &method, path, default_worker, BTreeMap::new())
}

fn resolve_node(
    node: &RouteNode,
    method: &str,
    path: &str,
    default_worker: &str,
    params: BTreeMap<String, Value>,
) -> Option<Resolved> {
    match node {
        RouteNode::Descriptor(target) => Some(Resolved::Target(RouteMatch {
            target: target.clone(),
            params,
        })),
        RouteNode::Chain(hooks) => Some(Resolved::Chain {
            hooks: hooks.clone(),
            params,
        }),
        RouteNode::Passthrough => Some(Resolved::Target(RouteMatch {
            target: synthesize_target(path, default_worker),
            params,
        })),
        RouteNode::Table(entries) => {
            // Method keys take precedence over pattern keys at every level.
            for (key, sub) in entries {
                if let EntryKey::Method(m) = key {
                    if m == method {
                        if let Some(resolved) =
                            resolve_node(sub, method, path, default_worker, params.clone())
                        {
                            return Some(resolved);
                        }
                    }
                }
            }
            for (key, sub) in entries {
                match key {
                    EntryKey::Method(_) => {}
                    EntryKey::Wildcard => {
                        return resolve_node(sub, method, path, default_worker, params);
                    }
                    EntryKey::Pattern(pattern) => {
                        if let Some(captured) = extract_params(pattern, path) {
                            let mut merged = params.clone();
                            merged.extend(captured);
                            if let Some(resolved) =
                                resolve_node(sub, method, path, default_worker, merged)
                            {
                                return Some(resolved);
                            }
                        }
                    }
                }
            }
            None
        }
    }
}

/// Wildcard target synthesis: a directory path gets the default worker name
/// appended; a file path gets `.js` appended when absent.
fn synthesize_target(path: &str, default_worker: &str) -> RouteTarget {
    let path = if path.ends_with('/') {
        format!("{}{}", path, default_worker)
    } else if path.ends_with(".js") {
        path.to_string()
    } else {
        format!("{}.js", path)
    };
    RouteTarget {
        path,
        ..RouteTarget::default()
    }
}

/// Match `pattern` against `path` segment by segment.
///
/// Equal segment count is required; any mismatch fails the whole pattern.
fn extract_params(pattern: &RoutePattern, path: &str) -> Option<BTreeMap<String, Value>> {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() != pattern.segments.len() {
        return None;
    }
    let mut params = BTreeMap::new();
    for (segment, part) in pattern.segments.iter().zip(&parts) {
        match segment {
            Segment::Literal(lit) => {
                if lit != part {
                    return None;
                }
            }
            Segment::Param(name) => {
                params.insert(name.clone(), coerce_value(part));
            }
            Segment::Regex(re) => {
                if !re.is_match(part) {
                    return None;
                }
            }
        }
    }
    Some(params)
}

/// JSON-decode a raw segment when possible, else keep the literal string.
pub fn coerce_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

//! Route table compilation.
//!
//! # Responsibilities
//! - Compile the untyped routes config tree into typed nodes
//! - Precompile regex path segments
//! - Hold programmatically registered handler chains
//!
//! # Design Decisions
//! - Leaves are a tagged variant: `Descriptor | Chain | Table | Passthrough`
//! - Config-loaded tables only produce descriptors and sub-tables; handler
//!   chains are code, registered through `add_chain`
//! - Insertion order is preserved (first match wins downstream)

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::config::WorkerLimits;

/// HTTP method keys recognized in route tables.
const METHOD_KEYS: &[&str] = &[
    "get", "post", "put", "delete", "head", "options", "patch", "trace", "connect",
];

/// A resolved dispatch target: worker path plus per-route options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RouteTarget {
    /// Worker source path (relative to the worker root, or an http(s) URL).
    pub path: String,

    /// Default parameters, overridden by path captures and (with
    /// `use_query`) query parameters.
    pub params: BTreeMap<String, Value>,

    /// Allow query-string parameters; they override path params.
    #[serde(alias = "useQuery")]
    pub use_query: bool,

    /// Per-call worker cache TTL override, in milliseconds.
    #[serde(alias = "maxAge")]
    pub max_age: Option<u64>,

    /// Per-route execution limit overrides.
    pub limits: Option<WorkerLimits>,
}

/// Context handed to each handler in a chain.
pub struct HookRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub params: &'a BTreeMap<String, Value>,
}

/// What a chain handler decided.
pub enum HookOutcome {
    /// Fall through to the next handler.
    Continue,
    /// Short-circuit the chain without producing a redirect; dispatch goes
    /// to the default target for the matched path. The `"route"` case.
    Stop,
    /// Redirect dispatch to a different target, merged over defaults.
    Redirect(RouteTarget),
}

/// One handler in an ordered chain.
pub type RouteHook = Arc<dyn Fn(&HookRequest<'_>) -> HookOutcome + Send + Sync>;

/// One path segment of a compiled pattern.
#[derive(Debug, Clone)]
pub enum Segment {
    /// Must equal the path segment exactly.
    Literal(String),
    /// `:name`: captures the path segment as a parameter.
    Param(String),
    /// `/re/`: the regex must match the path segment.
    Regex(Regex),
}

/// A compiled path pattern, split on `/`.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    pub raw: String,
    pub segments: Vec<Segment>,
}

impl RoutePattern {
    /// Compile a pattern string like `/item/:id` or `/files//^v[0-9]+$//list`.
    ///
    /// A segment written `/re/` is a regex matching exactly one path segment.
    /// Splitting on `/` turns it into the triple `"", re, ""`, which is folded
    /// back into a single regex segment here.
    pub fn compile(raw: &str) -> Result<Self, TableError> {
        let parts: Vec<&str> = raw.split('/').collect();
        let mut segments = Vec::new();
        let mut i = 0;
        while i < parts.len() {
            let part = parts[i];
            if part.is_empty()
                && i > 0
                && i + 2 < parts.len()
                && !parts[i + 1].is_empty()
                && parts[i + 2].is_empty()
            {
                let re = Regex::new(parts[i + 1]).map_err(|e| TableError {
                    pattern: raw.to_string(),
                    message: e.to_string(),
                })?;
                segments.push(Segment::Regex(re));
                i += 3;
                continue;
            }
            if let Some(name) = part.strip_prefix(':') {
                segments.push(Segment::Param(name.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
            i += 1;
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }
}

/// Key of one table entry.
#[derive(Clone)]
pub enum EntryKey {
    /// Lowercased HTTP method; selects a method-specific subtree.
    Method(String),
    /// `*`: matches any path.
    Wildcard,
    /// A compiled path pattern.
    Pattern(RoutePattern),
}

/// A node in the route tree.
#[derive(Clone)]
pub enum RouteNode {
    /// Terminal target descriptor.
    Descriptor(RouteTarget),
    /// Ordered handler chain.
    Chain(Vec<RouteHook>),
    /// Keyed sub-table, insertion-ordered.
    Table(Vec<(EntryKey, RouteNode)>),
    /// Synthesize the target from the request path (bare `*` routes).
    Passthrough,
}

impl fmt::Debug for RouteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteNode::Descriptor(t) => f.debug_tuple("Descriptor").field(t).finish(),
            RouteNode::Chain(hooks) => write!(f, "Chain({} hooks)", hooks.len()),
            RouteNode::Table(entries) => write!(f, "Table({} entries)", entries.len()),
            RouteNode::Passthrough => write!(f, "Passthrough"),
        }
    }
}

/// The compiled, immutable route table.
#[derive(Debug, Clone)]
pub struct RouteTable {
    pub root: RouteNode,
}

/// A route pattern that failed to compile.
#[derive(Debug, thiserror::Error)]
#[error("invalid route pattern '{pattern}': {message}")]
pub struct TableError {
    pub pattern: String,
    pub message: String,
}

impl RouteTable {
    /// Compile the routes config tree.
    ///
    /// `null` compiles to an empty table, a bare string to a single wildcard
    /// or pattern entry, objects to keyed tables. Arrays are rejected here:
    /// handler chains carry code and are registered via [`add_chain`].
    ///
    /// [`add_chain`]: RouteTable::add_chain
    pub fn compile(routes: &Value) -> Result<Self, TableError> {
        let root = match routes {
            Value::Null => RouteNode::Table(Vec::new()),
            Value::String(s) => {
                let key = compile_key(s)?;
                RouteNode::Table(vec![(key, RouteNode::Passthrough)])
            }
            Value::Object(_) => compile_node(routes)?,
            other => {
                return Err(TableError {
                    pattern: other.to_string(),
                    message: "routes must be a table, a pattern string, or null".to_string(),
                })
            }
        };
        Ok(Self { root })
    }

    /// Register an ordered handler chain for `pattern`, optionally under a
    /// method key. Chains are checked in insertion order like any other
    /// pattern entry.
    pub fn add_chain(
        &mut self,
        method: Option<&str>,
        pattern: &str,
        hooks: Vec<RouteHook>,
    ) -> Result<(), TableError> {
        let key = compile_key(pattern)?;
        let entries = match &mut self.root {
            RouteNode::Table(entries) => entries,
            other => {
                let prior = std::mem::replace(other, RouteNode::Table(Vec::new()));
                if let RouteNode::Table(entries) = other {
                    entries.push((EntryKey::Wildcard, prior));
                    entries
                } else {
                    unreachable!()
                }
            }
        };
        match method {
            Some(m) => {
                let m = m.to_ascii_lowercase();
                let node = RouteNode::Table(vec![(key, RouteNode::Chain(hooks))]);
                entries.push((EntryKey::Method(m), node));
            }
            None => entries.push((key, RouteNode::Chain(hooks))),
        }
        Ok(())
    }
}

fn compile_key(raw: &str) -> Result<EntryKey, TableError> {
    if raw == "*" {
        Ok(EntryKey::Wildcard)
    } else {
        Ok(EntryKey::Pattern(RoutePattern::compile(raw)?))
    }
}

fn compile_node(value: &Value) -> Result<RouteNode, TableError> {
    match value {
        Value::String(s) if s == "*" => Ok(RouteNode::Passthrough),
        Value::String(s) => Ok(RouteNode::Descriptor(RouteTarget {
            path: s.clone(),
            ..RouteTarget::default()
        })),
        Value::Object(map) => {
            if map.contains_key("path") {
                let target = RouteTarget::deserialize(value.clone()).map_err(|e| TableError {
                    pattern: value.to_string(),
                    message: e.to_string(),
                })?;
                return Ok(RouteNode::Descriptor(target));
            }
            let mut entries = Vec::with_capacity(map.len());
            for (key, sub) in map {
                let entry_key = if METHOD_KEYS.contains(&key.as_str()) {
                    EntryKey::Method(key.clone())
                } else if key == "*" || key.starts_with('/') {
                    compile_key(key)?
                } else {
                    return Err(TableError {
                        pattern: key.clone(),
                        message: "route keys must be methods, patterns starting with '/', or '*'"
                            .to_string(),
                    });
                };
                entries.push((entry_key, compile_node(sub)?));
            }
            Ok(RouteNode::Table(entries))
        }
        Value::Array(_) => Err(TableError {
            pattern: value.to_string(),
            message: "handler chains are registered programmatically, not from config"
                .to_string(),
        }),
        other => Err(TableError {
            pattern: other.to_string(),
            message: "unsupported route node".to_string(),
        }),
    }
}

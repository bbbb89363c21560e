//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → resolver.rs (descend route tree, extract params)
//!     → Return: Resolved target / handler chain, or NotFound
//!
//! Table Compilation (at startup):
//!     routes config (JSON tree)
//!     → table.rs (tagged RouteNode variants, precompiled regex segments)
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Tables compiled at startup, immutable at runtime
//! - Regex segments compiled once; resolution itself allocates only params
//! - Route leaves are a tagged variant (descriptor / chain / sub-table),
//!   never discovered by runtime type inspection
//! - Method keys take precedence over pattern keys at every level
//! - First matching pattern wins, in table insertion order

pub mod resolver;
pub mod table;

pub use resolver::{coerce_value, resolve, Resolved, RouteMatch};
pub use table::{
    HookOutcome, HookRequest, RouteHook, RouteNode, RouteTable, RouteTarget, TableError,
};

//! Dispatch boundary between the HTTP layer and the worker subsystem.
//!
//! Data flow:
//! 1. the HTTP handler lifts the request into a `DispatchRequest`
//! 2. `pipeline` resolves the route, runs chains, merges parameters
//! 3. the worker registry supplies a unit and the pipeline invokes it
//! 4. errors surface as `DispatchError` for failure-mode translation

pub mod error;
pub mod pipeline;

pub use error::DispatchError;
pub use pipeline::{DispatchRequest, Dispatcher};

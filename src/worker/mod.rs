//! Worker lifecycle: source fetch, isolate execution, caching.
//!
//! Data flow for one request:
//! 1. `registry` resolves a cached unit or creates one single-flight
//! 2. `source` fetches and validates the worker script
//! 3. `unit` evaluates it in a fresh isolate on a dedicated thread
//! 4. `protocol` frames the request/response exchange with the isolate
//! 5. eviction timers and exit watchers retire the unit

pub mod error;
pub mod protocol;
pub mod registry;
pub mod source;
pub mod unit;

pub use error::{WorkerError, WorkerResult};
pub use protocol::{ExitReason, InvokePayload, WorkerReply};
pub use registry::{CreationOptions, WorkerRecord, WorkerRegistry};
pub use unit::UnitHandle;

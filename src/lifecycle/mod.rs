//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Evict workers → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, then close worker units
//! - Every long-running task subscribes to a single broadcast channel

pub mod shutdown;

pub use shutdown::Shutdown;

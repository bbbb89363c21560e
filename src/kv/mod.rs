//! Persistent key/value capability shared by all worker units.
//!
//! Data flow:
//! 1. `configure` points the process-global registry at its data directory
//! 2. worker bootstrap constructs `KVStore` objects by name
//! 3. `ops` bridge isolate calls to the named `store::KvStore`
//! 4. every mutation is flushed to `<dir>/<name>.json`

pub mod ops;
pub mod store;

pub use store::{configure, open, KvEntry, KvError, KvStore, ListOptions, PutOptions};

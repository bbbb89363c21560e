//! Deno ops exposing the KV stores to worker isolates. The JS-side
//! `KVStore` shim in the bootstrap calls straight into these.

use deno_core::{error::CoreError, op2};
use serde_json::Value;
use std::io::Error as IoError;

use super::store::{self, KvError, ListOptions, PutOptions};

fn kv_error(e: KvError) -> CoreError {
    IoError::other(e.to_string()).into()
}

/// Fetch one entry, value and metadata together. Null when absent or expired.
#[op2]
#[serde]
pub fn op_kv_get(
    #[string] store: String,
    #[string] key: String,
) -> Result<Option<Value>, CoreError> {
    let store = store::open(&store).map_err(kv_error)?;
    Ok(store.get(&key).map(|entry| {
        serde_json::json!({
            "value": entry.value,
            "metadata": entry.metadata,
        })
    }))
}

/// Write one entry with optional expiry and metadata.
#[op2]
pub fn op_kv_put(
    #[string] store: String,
    #[string] key: String,
    #[serde] value: serde_json::Value,
    #[serde] options: PutOptions,
) -> Result<(), CoreError> {
    let store = store::open(&store).map_err(kv_error)?;
    store.put(&key, value, options).map_err(kv_error)
}

#[op2(fast)]
pub fn op_kv_delete(#[string] store: String, #[string] key: String) -> Result<(), CoreError> {
    let store = store::open(&store).map_err(kv_error)?;
    store.delete(&key).map_err(kv_error)
}

/// List live keys in order, optionally filtered by prefix and capped.
#[op2]
#[serde]
pub fn op_kv_list(
    #[string] store: String,
    #[serde] options: ListOptions,
) -> Result<Vec<Value>, CoreError> {
    let store = store::open(&store).map_err(kv_error)?;
    Ok(store.list(&options))
}

deno_core::extension!(
    edgeserve_kv,
    ops = [op_kv_get, op_kv_put, op_kv_delete, op_kv_list],
);

/// Register the KV extension on a fresh isolate.
pub fn init() -> deno_core::Extension {
    edgeserve_kv::init_ops_and_esm()
}

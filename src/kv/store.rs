//! Named key/value stores with optional expiry, persisted as one JSON file
//! per store under the configured data directory. Stores are process-global
//! so every worker unit sees the same data.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("kv store data error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid kv operation: {0}")]
    InvalidOptions(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvEntry {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Seconds since epoch after which the entry is gone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PutOptions {
    #[serde(default)]
    pub expiration: Option<u64>,
    #[serde(default)]
    pub expiration_ttl: Option<u64>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListOptions {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One named store. Entries live in memory and are flushed to disk after
/// every mutation.
pub struct KvStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, KvEntry>>,
}

impl KvStore {
    fn load(path: PathBuf) -> Result<KvStore, KvError> {
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(KvStore {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn get(&self, key: &str) -> Option<KvEntry> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if is_expired(entry) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    pub fn put(&self, key: &str, value: Value, options: PutOptions) -> Result<(), KvError> {
        let expiration = match (options.expiration, options.expiration_ttl) {
            (Some(_), Some(_)) => {
                return Err(KvError::InvalidOptions(
                    "expiration and expirationTtl are mutually exclusive".into(),
                ))
            }
            (Some(at), None) => Some(at),
            (None, Some(ttl)) => Some(now_secs() + ttl),
            (None, None) => None,
        };
        let entry = KvEntry {
            value,
            metadata: options.metadata,
            expiration,
        };
        let snapshot = {
            let mut entries = self.lock();
            entries.insert(key.to_string(), entry);
            entries.clone()
        };
        self.flush(&snapshot)
    }

    pub fn delete(&self, key: &str) -> Result<(), KvError> {
        let snapshot = {
            let mut entries = self.lock();
            if entries.remove(key).is_none() {
                return Ok(());
            }
            entries.clone()
        };
        self.flush(&snapshot)
    }

    /// Lists live entries in key order, without their values.
    pub fn list(&self, options: &ListOptions) -> Vec<Value> {
        let mut entries = self.lock();
        entries.retain(|_, entry| !is_expired(entry));
        let limit = options.limit.unwrap_or(usize::MAX);
        entries
            .iter()
            .filter(|(key, _)| key.starts_with(&options.prefix))
            .take(limit)
            .map(|(key, entry)| {
                serde_json::json!({
                    "name": key,
                    "expiration": entry.expiration,
                    "metadata": entry.metadata,
                })
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, KvEntry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn flush(&self, entries: &BTreeMap<String, KvEntry>) -> Result<(), KvError> {
        let bytes = serde_json::to_vec(entries)?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

#[derive(Default)]
struct KvRegistry {
    dir: RwLock<Option<PathBuf>>,
    stores: DashMap<String, Arc<KvStore>>,
}

static REGISTRY: LazyLock<KvRegistry> = LazyLock::new(KvRegistry::default);

/// Points the registry at its data directory. Call once before serving;
/// stores opened earlier keep their original location.
pub fn configure(dir: impl Into<PathBuf>) {
    let dir = dir.into();
    *REGISTRY
        .dir
        .write()
        .unwrap_or_else(|p| p.into_inner()) = Some(dir);
}

/// Opens (or creates) the named store, loading persisted entries.
pub fn open(name: &str) -> Result<Arc<KvStore>, KvError> {
    if name.is_empty() || name.contains(['/', '\\']) {
        return Err(KvError::InvalidOptions(format!(
            "invalid store name {name:?}"
        )));
    }
    if let Some(store) = REGISTRY.stores.get(name) {
        return Ok(Arc::clone(&store));
    }
    let dir = REGISTRY
        .dir
        .read()
        .unwrap_or_else(|p| p.into_inner())
        .clone()
        .unwrap_or_else(|| PathBuf::from(".edgeserve-kv"));
    if let Err(e) = std::fs::create_dir_all(&dir) {
        warn!(dir = %dir.display(), error = %e, "failed to create kv directory");
        return Err(e.into());
    }
    let store = Arc::new(KvStore::load(dir.join(format!("{name}.json")))?);
    let store = REGISTRY
        .stores
        .entry(name.to_string())
        .or_insert(store)
        .clone();
    Ok(store)
}

fn is_expired(entry: &KvEntry) -> bool {
    matches!(entry.expiration, Some(at) if now_secs() >= at)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

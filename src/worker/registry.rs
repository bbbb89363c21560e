//! Worker cache and lifecycle supervision.
//!
//! The registry deduplicates concurrent creation per path, validates cache
//! hits against the options the worker was created with, and evicts units
//! on idle, age, TTL expiry or unit exit.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{WorkerConfig, WorkerLimits};
use crate::worker::source::fetch_source;
use crate::worker::unit::UnitHandle;
use crate::worker::WorkerResult;

/// Everything that makes two workers for the same path interchangeable.
/// A cached unit is reused only when the stored options equal the
/// requested ones; any difference forces recreation.
#[derive(Debug, Clone, PartialEq)]
pub struct CreationOptions {
    pub root: String,
    pub limits: WorkerLimits,
    pub use_query: bool,
    pub params: BTreeMap<String, Value>,
    pub cache_ttl_ms: Option<u64>,
}

/// One live cached worker.
pub struct WorkerRecord {
    pub path: String,
    pub handle: UnitHandle,
    pub options: CreationOptions,
    timers: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WorkerRecord {
    fn abort_timers(&self) {
        let timers = std::mem::take(
            &mut *self.timers.lock().unwrap_or_else(|p| p.into_inner()),
        );
        for timer in timers {
            timer.abort();
        }
    }
}

impl Drop for WorkerRecord {
    fn drop(&mut self) {
        self.abort_timers();
    }
}

pub struct WorkerRegistry {
    config: WorkerConfig,
    live: DashMap<String, Arc<WorkerRecord>>,
    flights: DashMap<String, Arc<Mutex<()>>>,
    spawned: AtomicU64,
}

impl WorkerRegistry {
    pub fn new(config: WorkerConfig) -> Arc<WorkerRegistry> {
        Arc::new(WorkerRegistry {
            config,
            live: DashMap::new(),
            flights: DashMap::new(),
            spawned: AtomicU64::new(0),
        })
    }

    pub fn cache_enabled(&self) -> bool {
        self.config.cache_workers
    }

    /// Total units spawned since startup, cache misses included.
    pub fn spawned_total(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Creations currently deduplicating. Zero whenever no call is inside
    /// `get_or_create`; the flight map must not outlive its waiters.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Returns a unit for `path`, reusing the cached one when its creation
    /// options match. Concurrent calls for the same path are single-flight:
    /// one caller creates, the rest wait and share the result.
    pub async fn get_or_create(
        self: &Arc<Self>,
        path: &str,
        options: CreationOptions,
    ) -> WorkerResult<Arc<WorkerRecord>> {
        if !self.config.cache_workers {
            return self.create(path, options, false).await;
        }

        let flight = self
            .flights
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = flight.lock().await;
            self.cached_or_create(path, options).await
        };
        // Last caller out drops the flight entry; two strong counts means
        // only this clone and the map itself still hold it. The shard lock
        // makes the count check and the removal atomic against new clones.
        self.flights
            .remove_if(path, |_, entry| Arc::strong_count(entry) <= 2);
        result
    }

    async fn cached_or_create(
        self: &Arc<Self>,
        path: &str,
        options: CreationOptions,
    ) -> WorkerResult<Arc<WorkerRecord>> {
        if let Some(record) = self.live.get(path).map(|r| Arc::clone(&r)) {
            if !record.handle.is_exited() && record.options == options {
                debug!(path, "worker cache hit");
                return Ok(record);
            }
            info!(path, "worker options changed, recreating");
            self.evict(&record);
        }

        self.create(path, options, true).await
    }

    async fn create(
        self: &Arc<Self>,
        path: &str,
        options: CreationOptions,
        cache: bool,
    ) -> WorkerResult<Arc<WorkerRecord>> {
        let source = fetch_source(path, &options.root).await?;
        let handle = UnitHandle::spawn(source, options.limits).await?;
        self.spawned.fetch_add(1, Ordering::Relaxed);
        info!(path, cached = cache, "worker spawned");

        let record = Arc::new(WorkerRecord {
            path: path.to_string(),
            handle,
            options,
            timers: std::sync::Mutex::new(Vec::new()),
        });
        if cache {
            self.arm_timers(&record);
            self.watch_exit(&record);
            self.live.insert(path.to_string(), Arc::clone(&record));
        }
        Ok(record)
    }

    /// Removes the record and asks its unit to exit. In-flight invocations
    /// keep their own `Arc` so the unit drains before the thread ends.
    pub fn evict(&self, record: &Arc<WorkerRecord>) {
        let removed = self
            .live
            .remove_if(&record.path, |_, live| Arc::ptr_eq(live, record))
            .is_some();
        record.abort_timers();
        record.handle.close();
        if removed {
            debug!(path = %record.path, "worker evicted");
        }
    }

    /// Evicts every live worker, for shutdown.
    pub fn evict_all(&self) {
        let records: Vec<Arc<WorkerRecord>> =
            self.live.iter().map(|r| Arc::clone(&r)).collect();
        for record in records {
            self.evict(&record);
        }
    }

    fn arm_timers(self: &Arc<Self>, record: &Arc<WorkerRecord>) {
        let mut timers = record
            .timers
            .lock()
            .unwrap_or_else(|p| p.into_inner());

        let idle = record.options.limits.max_idle_ms;
        if idle > 0 {
            let registry = Arc::clone(self);
            let target = Arc::clone(record);
            timers.push(tokio::spawn(async move {
                loop {
                    let since = now_ms().saturating_sub(target.handle.last_hit_ms());
                    if since >= idle {
                        debug!(path = %target.path, "idle limit reached");
                        registry.evict(&target);
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(idle - since)).await;
                }
            }));
        }

        let age = record.options.limits.max_age_ms;
        if age > 0 {
            let registry = Arc::clone(self);
            let target = Arc::clone(record);
            timers.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(age)).await;
                debug!(path = %target.path, "age limit reached");
                registry.evict(&target);
            }));
        }

        let ttl = record.options.cache_ttl_ms.or(self.config.cache_ttl_ms);
        if let Some(ttl) = ttl.filter(|t| *t > 0) {
            let registry = Arc::clone(self);
            let target = Arc::clone(record);
            timers.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ttl)).await;
                debug!(path = %target.path, "cache ttl expired");
                registry.evict(&target);
            }));
        }
    }

    /// Drops the cache entry as soon as the unit thread finishes, whatever
    /// the cause, so the next request spawns fresh.
    fn watch_exit(self: &Arc<Self>, record: &Arc<WorkerRecord>) {
        let registry = Arc::clone(self);
        let target = Arc::clone(record);
        tokio::spawn(async move {
            let code = target.handle.wait_exit().await;
            if code != 0 {
                warn!(path = %target.path, code, "worker exited abnormally");
            }
            registry.evict(&target);
        });
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

//! Bounded, time-limited cache of loaded calculator modules.
//!
//! Entries expire `max_age` after insertion. When the cache is full, the
//! least-recently-used entry is evicted to make room for a new id. A
//! background [`CacheSweeper`] can drop expired entries independently of
//! access.

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::module::CalculatorModule;
use crate::types::PluginId;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// A cached module with its access bookkeeping
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub module: Arc<CalculatorModule>,
    pub inserted_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub size_estimate: usize,
    /// Monotonic tick of the last insert/access; breaks `last_accessed` ties
    access_seq: u64,
}

/// Snapshot of cache occupancy and effectiveness
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub memory_estimate: usize,
    pub oldest_entry_age_ms: Option<i64>,
    pub most_accessed_id: Option<PluginId>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<PluginId, CacheEntry>,
    hits: u64,
    misses: u64,
    seq: u64,
}

impl CacheInner {
    fn tick(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn evict_lru(&mut self) -> Option<PluginId> {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.last_accessed, e.access_seq))
            .map(|(id, _)| id.clone())?;
        self.entries.remove(&victim);
        Some(victim)
    }
}

/// LRU + TTL cache keyed by plugin id
pub struct ModuleCache {
    inner: Mutex<CacheInner>,
    max_entries: usize,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache")
            .field("max_entries", &self.max_entries)
            .field("max_age", &self.max_age)
            .field("len", &self.len())
            .finish()
    }
}

impl ModuleCache {
    pub fn new(max_entries: usize, max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            max_entries,
            max_age,
            clock,
        }
    }

    pub fn from_config(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.max_entries, config.max_age(), clock)
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    // A panic while holding the lock leaves plain bookkeeping behind, which
    // is still consistent enough to keep serving.
    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.inserted_at > self.max_age
    }

    /// Cached module for `id`, or `None` on a miss
    ///
    /// An expired entry is removed and counted as a miss.
    pub fn get(&self, id: &PluginId) -> Option<Arc<CalculatorModule>> {
        let now = self.clock.now();
        let mut inner = self.lock();

        let expired = match inner.entries.get(id) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => self.is_expired(entry, now),
        };

        if expired {
            inner.entries.remove(id);
            inner.misses += 1;
            tracing::debug!("Cache entry for {} expired", id);
            return None;
        }

        let seq = inner.tick();
        inner.hits += 1;
        let entry = inner.entries.get_mut(id)?;
        entry.last_accessed = now;
        entry.access_count += 1;
        entry.access_seq = seq;
        Some(Arc::clone(&entry.module))
    }

    /// Insert or replace the module for `id`
    ///
    /// Inserting a new id into a full cache first evicts the entry with the
    /// oldest `last_accessed`. A cache with capacity 0 stores nothing.
    pub fn set(&self, id: PluginId, module: Arc<CalculatorModule>) {
        if self.max_entries == 0 {
            return;
        }

        let now = self.clock.now();
        let size_estimate = module.size_estimate();
        let mut inner = self.lock();

        if !inner.entries.contains_key(&id) {
            while inner.entries.len() >= self.max_entries {
                match inner.evict_lru() {
                    Some(victim) => tracing::info!("Evicted {} from module cache", victim),
                    None => break,
                }
            }
        }

        let access_seq = inner.tick();
        inner.entries.insert(
            id,
            CacheEntry {
                module,
                inserted_at: now,
                last_accessed: now,
                access_count: 0,
                size_estimate,
                access_seq,
            },
        );
    }

    /// Whether a live entry exists; does not count as an access
    pub fn has(&self, id: &PluginId) -> bool {
        let now = self.clock.now();
        let mut inner = self.lock();
        let expired = match inner.entries.get(id) {
            None => return false,
            Some(entry) => self.is_expired(entry, now),
        };
        if expired {
            inner.entries.remove(id);
        }
        !expired
    }

    /// Copy of the entry for `id` without touching access stats
    pub fn peek(&self, id: &PluginId) -> Option<CacheEntry> {
        self.lock().entries.get(id).cloned()
    }

    pub fn delete(&self, id: &PluginId) -> bool {
        self.lock().entries.remove(id).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        tracing::debug!("Cleared {} cached modules", count);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| now - entry.inserted_at <= self.max_age);
        let removed = before - inner.entries.len();
        if removed > 0 {
            tracing::debug!("Swept {} expired modules", removed);
        }
        removed
    }

    /// Load every id not already cached, in parallel
    ///
    /// Failures are logged and skipped. Returns the number of modules that
    /// were loaded and inserted.
    pub fn preload<F>(&self, ids: &[PluginId], loader: F) -> usize
    where
        F: Fn(&PluginId) -> Result<Arc<CalculatorModule>> + Sync,
    {
        let pending: Vec<&PluginId> = ids.iter().filter(|id| !self.has(id)).collect();
        if pending.is_empty() {
            return 0;
        }

        let loader = &loader;
        let results: Vec<(PluginId, Result<Arc<CalculatorModule>>)> = thread::scope(|scope| {
            let handles: Vec<_> = pending
                .iter()
                .map(|id| {
                    let id = (*id).clone();
                    scope.spawn(move || {
                        let result = loader(&id);
                        (id, result)
                    })
                })
                .collect();

            handles
                .into_iter()
                .filter_map(|h| match h.join() {
                    Ok(pair) => Some(pair),
                    Err(_) => {
                        tracing::warn!("Preload worker panicked");
                        None
                    }
                })
                .collect()
        });

        let mut loaded = 0;
        for (id, result) in results {
            match result {
                Ok(module) => {
                    self.set(id, module);
                    loaded += 1;
                }
                Err(e) => tracing::warn!("Failed to preload {}: {}", id, e),
            }
        }
        tracing::info!("Preloaded {}/{} modules", loaded, pending.len());
        loaded
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let inner = self.lock();

        let lookups = inner.hits + inner.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            inner.hits as f64 / lookups as f64
        };

        let oldest_entry_age_ms = inner
            .entries
            .values()
            .map(|e| e.inserted_at)
            .min()
            .map(|oldest| (now - oldest).num_milliseconds());

        // Highest access count, lowest id on ties
        let most_accessed_id = inner
            .entries
            .iter()
            .max_by(|(a_id, a), (b_id, b)| {
                a.access_count
                    .cmp(&b.access_count)
                    .then_with(|| b_id.cmp(a_id))
            })
            .map(|(id, _)| id.clone());

        CacheStats {
            total_entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            hit_rate,
            memory_estimate: inner.entries.values().map(|e| e.size_estimate).sum(),
            oldest_entry_age_ms,
            most_accessed_id,
        }
    }

    /// Zero the hit/miss counters, keeping entries
    pub fn reset_stats(&self) {
        let mut inner = self.lock();
        inner.hits = 0;
        inner.misses = 0;
    }
}

/// Background thread that periodically sweeps expired cache entries
///
/// Holds only a weak reference to the cache. Dropping the sweeper stops
/// the thread; so does dropping the cache.
#[derive(Debug)]
pub struct CacheSweeper {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CacheSweeper {
    /// # Errors
    /// `Config` if `interval` is zero
    pub fn spawn(cache: &Arc<ModuleCache>, interval: std::time::Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Config("cache sweep interval must be > 0".into()));
        }
        let weak = Arc::downgrade(cache);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("medcalc-cache-sweep".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(cache) = weak.upgrade() else {
                            break;
                        };
                        if catch_unwind(AssertUnwindSafe(|| cache.sweep_expired())).is_err() {
                            tracing::error!("Cache sweep panicked; background sweeping stopped");
                            break;
                        }
                    }
                    // Stop requested or sweeper dropped
                    _ => break,
                }
            })?;

        tracing::debug!("Started cache sweeper every {:?}", interval);
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::module::tests::{weight_module, Doubler};
    use crate::Error;
    use chrono::TimeZone;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
        ))
    }

    fn module(name: &str) -> Arc<CalculatorModule> {
        Arc::new(weight_module(name, Arc::new(Doubler)))
    }

    fn id(name: &str) -> PluginId {
        PluginId::from(format!("test.{}", name))
    }

    #[test]
    fn test_get_after_set_returns_same_module() {
        let cache = ModuleCache::new(10, Duration::minutes(30), clock());
        let m = module("a");
        cache.set(id("a"), Arc::clone(&m));

        let got = cache.get(&id("a")).unwrap();
        assert!(Arc::ptr_eq(&got, &m));
        assert_eq!(cache.peek(&id("a")).unwrap().access_count, 1);
    }

    #[test]
    fn test_miss_counts() {
        let cache = ModuleCache::new(10, Duration::minutes(30), clock());
        assert!(cache.get(&id("nope")).is_none());
        cache.set(id("a"), module("a"));
        cache.get(&id("a"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_expired_entry_is_removed_on_get() {
        let clock = clock();
        let cache = ModuleCache::new(10, Duration::milliseconds(1), clock.clone());
        cache.set(id("a"), module("a"));
        assert_eq!(cache.stats().total_entries, 1);

        clock.advance(Duration::milliseconds(10));

        assert!(cache.get(&id("a")).is_none());
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[test]
    fn test_entry_valid_until_exactly_max_age() {
        let clock = clock();
        let cache = ModuleCache::new(10, Duration::seconds(60), clock.clone());
        cache.set(id("a"), module("a"));

        clock.advance(Duration::seconds(60));
        assert!(cache.has(&id("a")));

        clock.advance(Duration::milliseconds(1));
        assert!(!cache.has(&id("a")));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction_keeps_recently_accessed() {
        let clock = clock();
        let cache = ModuleCache::new(2, Duration::minutes(30), clock.clone());

        cache.set(id("a"), module("a"));
        clock.advance(Duration::seconds(1));
        cache.set(id("b"), module("b"));
        clock.advance(Duration::seconds(1));
        assert!(cache.get(&id("a")).is_some());
        clock.advance(Duration::seconds(1));
        cache.set(id("c"), module("c"));

        assert!(cache.has(&id("a")));
        assert!(!cache.has(&id("b")));
        assert!(cache.has(&id("c")));
    }

    #[test]
    fn test_lru_ties_broken_by_access_order() {
        // Frozen clock: every timestamp is equal
        let cache = ModuleCache::new(2, Duration::minutes(30), clock());

        cache.set(id("a"), module("a"));
        cache.set(id("b"), module("b"));
        cache.get(&id("a"));
        cache.set(id("c"), module("c"));

        assert!(cache.has(&id("a")));
        assert!(!cache.has(&id("b")));
    }

    #[test]
    fn test_replacing_existing_id_does_not_evict() {
        let cache = ModuleCache::new(2, Duration::minutes(30), clock());
        cache.set(id("a"), module("a"));
        cache.set(id("b"), module("b"));
        cache.set(id("a"), module("a"));

        assert_eq!(cache.len(), 2);
        assert!(cache.has(&id("b")));
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let cache = ModuleCache::new(0, Duration::minutes(30), clock());
        cache.set(id("a"), module("a"));
        assert!(cache.is_empty());
        assert!(cache.get(&id("a")).is_none());
    }

    #[test]
    fn test_has_does_not_touch_stats() {
        let cache = ModuleCache::new(10, Duration::minutes(30), clock());
        cache.set(id("a"), module("a"));
        assert!(cache.has(&id("a")));
        assert!(!cache.has(&id("b")));

        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 0);
        assert_eq!(cache.peek(&id("a")).unwrap().access_count, 0);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let clock = clock();
        let cache = ModuleCache::new(10, Duration::minutes(5), clock.clone());
        cache.set(id("old"), module("old"));
        clock.advance(Duration::minutes(4));
        cache.set(id("new"), module("new"));
        clock.advance(Duration::minutes(2));

        assert_eq!(cache.sweep_expired(), 1);
        assert!(cache.has(&id("new")));
        assert!(!cache.has(&id("old")));
    }

    #[test]
    fn test_stats_report_oldest_and_most_accessed() {
        let clock = clock();
        let cache = ModuleCache::new(10, Duration::minutes(30), clock.clone());
        cache.set(id("a"), module("a"));
        clock.advance(Duration::seconds(5));
        cache.set(id("b"), module("b"));
        cache.get(&id("b"));
        cache.get(&id("b"));
        cache.get(&id("a"));

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.oldest_entry_age_ms, Some(5_000));
        assert_eq!(stats.most_accessed_id, Some(id("b")));
        assert!(stats.memory_estimate > 0);

        cache.reset_stats();
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_preload_skips_failures() {
        let cache = ModuleCache::new(10, Duration::minutes(30), clock());
        let ids = vec![id("a"), id("broken"), id("b")];

        let loaded = cache.preload(&ids, |pid| {
            if pid.local_id() == "broken" {
                Err(Error::PluginNotFound(pid.clone()))
            } else {
                Ok(module(pid.local_id()))
            }
        });

        assert_eq!(loaded, 2);
        assert!(cache.has(&id("a")));
        assert!(cache.has(&id("b")));
        assert!(!cache.has(&id("broken")));

        // Already cached ids are not reloaded
        assert_eq!(cache.preload(&ids[..1], |pid| Ok(module(pid.local_id()))), 0);
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = ModuleCache::new(10, Duration::minutes(30), clock());
        cache.set(id("a"), module("a"));
        cache.set(id("b"), module("b"));

        assert!(cache.delete(&id("a")));
        assert!(!cache.delete(&id("a")));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_background_sweeper_evicts_expired() {
        crate::logging::init_test();
        let clock = clock();
        let cache = Arc::new(ModuleCache::new(10, Duration::seconds(1), clock.clone()));
        cache.set(id("a"), module("a"));
        clock.advance(Duration::seconds(2));

        let sweeper = CacheSweeper::spawn(&cache, std::time::Duration::from_millis(5)).unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while cache.len() > 0 && std::time::Instant::now() < deadline {
            thread::sleep(std::time::Duration::from_millis(5));
        }
        sweeper.stop();

        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_sweeper_exits_when_cache_dropped() {
        let cache = Arc::new(ModuleCache::new(10, Duration::seconds(1), clock()));
        let sweeper = CacheSweeper::spawn(&cache, std::time::Duration::from_millis(1)).unwrap();
        drop(cache);
        // Joins without hanging
        drop(sweeper);
    }

    #[test]
    fn test_sweeper_rejects_zero_interval() {
        let cache = Arc::new(ModuleCache::new(10, Duration::seconds(1), clock()));
        let err = CacheSweeper::spawn(&cache, std::time::Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

//! Thread-safe LRU cache core.
//!
//! # Locking
//!
//! | Path                                   | Lock                  |
//! |----------------------------------------|-----------------------|
//! | hit, `get`, `contains`, `statistics`   | index read            |
//! | insert, evict, remove, resize, sweep   | index write           |
//! | miss bookkeeping                       | in-flight mutex       |
//!
//! Hits update per-entry atomics, so the read lock is enough to keep LRU
//! order current. Native handles are disposed after the write lock is
//! released.
//!
//! # Single-flight
//!
//! Concurrent misses on the same key are coalesced: the first caller runs the
//! factory, later callers block on a channel and share its outcome.

use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;

use super::entry::{CacheEntry, CacheResource, EntrySnapshot};
use super::maintenance::MaintenanceTask;
use super::stats::{CacheCounters, CacheStatistics};
use crate::errors::{BackendError, CacheError, Result};
use crate::utils::Stopwatch;

/// Settings for an [`LruCache`].
///
/// | Field            | Default    |
/// |------------------|------------|
/// | `capacity`       | 256        |
/// | `max_age`        | 10 minutes |
/// | `sweep_interval` | 30 seconds |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LruCacheConfig {
    /// Maximum number of resident entries. Must be at least 1.
    pub capacity: usize,
    /// Entries older than this (measured from creation) are expired by the
    /// sweep and by [`LruCache::force_cleanup`]. `None` disables expiration.
    pub max_age: Option<Duration>,
    /// Period of the background sweep thread. `None` runs no thread.
    pub sweep_interval: Option<Duration>,
}

impl Default for LruCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_age: Some(Duration::from_secs(600)),
            sweep_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl LruCacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(CacheError::InvalidConfiguration(
                "cache capacity must be at least 1".to_string(),
            ));
        }
        if self.max_age == Some(Duration::ZERO) {
            return Err(CacheError::InvalidConfiguration(
                "max_age must be positive".to_string(),
            ));
        }
        if self.sweep_interval == Some(Duration::ZERO) {
            return Err(CacheError::InvalidConfiguration(
                "sweep_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of [`LruCache::get_or_create`].
#[derive(Debug)]
pub struct CacheLookup<V> {
    pub value: Arc<V>,
    /// `false` only for the caller whose factory call produced `value`.
    pub was_cached: bool,
    /// Factory time, when this call ran the factory.
    pub creation_duration: Option<Duration>,
}

impl<V> Clone for CacheLookup<V> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            was_cached: self.was_cached,
            creation_duration: self.creation_duration,
        }
    }
}

type Bucket<K, V> = SmallVec<[CacheEntry<K, V>; 1]>;
type Waiter<V> = flume::Sender<std::result::Result<Arc<V>, BackendError>>;

#[inline]
fn key_hash<K: Hash>(key: &K) -> u64 {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

struct Index<K, V> {
    buckets: FxHashMap<u64, Bucket<K, V>>,
    len: usize,
    memory: u64,
}

impl<K: Eq, V: CacheResource> Index<K, V> {
    fn new() -> Self {
        Self {
            buckets: FxHashMap::default(),
            len: 0,
            memory: 0,
        }
    }

    fn find(&self, hash: u64, key: &K) -> Option<&CacheEntry<K, V>> {
        self.buckets.get(&hash)?.iter().find(|e| e.key == *key)
    }

    fn insert(&mut self, hash: u64, entry: CacheEntry<K, V>) {
        self.len += 1;
        self.memory += entry.memory_estimate;
        self.buckets.entry(hash).or_default().push(entry);
    }

    fn take_at(&mut self, hash: u64, pos: usize) -> Option<CacheEntry<K, V>> {
        let bucket = self.buckets.get_mut(&hash)?;
        let entry = bucket.swap_remove(pos);
        if bucket.is_empty() {
            self.buckets.remove(&hash);
        }
        self.len -= 1;
        self.memory = self.memory.saturating_sub(entry.memory_estimate);
        Some(entry)
    }

    fn remove(&mut self, hash: u64, key: &K) -> Option<CacheEntry<K, V>> {
        let pos = self.buckets.get(&hash)?.iter().position(|e| e.key == *key)?;
        self.take_at(hash, pos)
    }

    /// Removes the `count` entries with the oldest access ticks, oldest
    /// first, in a single pass over the index.
    fn take_lru(&mut self, count: usize) -> Vec<CacheEntry<K, V>> {
        let count = count.min(self.len);
        if count == 0 {
            return Vec::new();
        }
        let mut ticks: Vec<(u64, u64)> = self
            .buckets
            .iter()
            .flat_map(|(hash, bucket)| bucket.iter().map(move |e| (e.last_access_tick(), *hash)))
            .collect();
        if count < ticks.len() {
            ticks.select_nth_unstable(count - 1);
            ticks.truncate(count);
        }
        ticks.sort_unstable();

        let mut victims = Vec::with_capacity(count);
        for (tick, hash) in ticks {
            let pos = self
                .buckets
                .get(&hash)
                .and_then(|b| b.iter().position(|e| e.last_access_tick() == tick));
            if let Some(entry) = pos.and_then(|pos| self.take_at(hash, pos)) {
                victims.push(entry);
            }
        }
        victims
    }

    fn evict_to(&mut self, capacity: usize) -> Vec<CacheEntry<K, V>> {
        self.take_lru(self.len.saturating_sub(capacity))
    }

    fn remove_where(&mut self, mut pred: impl FnMut(&CacheEntry<K, V>) -> bool) -> Vec<CacheEntry<K, V>> {
        let mut removed = Vec::new();
        self.buckets.retain(|_, bucket| {
            let mut i = 0;
            while i < bucket.len() {
                if pred(&bucket[i]) {
                    removed.push(bucket.swap_remove(i));
                } else {
                    i += 1;
                }
            }
            !bucket.is_empty()
        });
        for entry in &removed {
            self.len -= 1;
            self.memory = self.memory.saturating_sub(entry.memory_estimate);
        }
        removed
    }

    fn drain(&mut self) -> Vec<CacheEntry<K, V>> {
        self.len = 0;
        self.memory = 0;
        self.buckets.drain().flat_map(|(_, bucket)| bucket).collect()
    }

    fn iter(&self) -> impl Iterator<Item = &CacheEntry<K, V>> {
        self.buckets.values().flatten()
    }
}

/// Capacity-bounded cache of shared native handles keyed by structural keys.
pub struct LruCache<K, V: CacheResource> {
    index: RwLock<Index<K, V>>,
    in_flight: Mutex<FxHashMap<K, Vec<Waiter<V>>>>,
    capacity: AtomicUsize,
    max_age: Option<Duration>,
    tick: AtomicU64,
    counters: CacheCounters,
    maintenance: Mutex<Option<MaintenanceTask>>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: CacheResource,
{
    /// Creates the cache and, if configured, its sweep thread.
    pub fn new(config: LruCacheConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let cache = Arc::new(Self {
            index: RwLock::new(Index::new()),
            in_flight: Mutex::new(FxHashMap::default()),
            capacity: AtomicUsize::new(config.capacity),
            max_age: config.max_age,
            tick: AtomicU64::new(0),
            counters: CacheCounters::default(),
            maintenance: Mutex::new(None),
        });
        if let Some(interval) = config.sweep_interval {
            let task = MaintenanceTask::spawn(&cache, interval)?;
            *cache.maintenance.lock() = Some(task);
        }
        Ok(cache)
    }

    #[inline]
    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// [Read] Returns the handle for `key`, creating it with `create` on a miss.
    ///
    /// `create` runs without any cache lock held and at most once per
    /// concurrent miss on the same key.
    pub fn get_or_create<F>(&self, key: &K, create: F) -> Result<CacheLookup<V>>
    where
        F: FnOnce() -> std::result::Result<V, BackendError>,
    {
        let hash = key_hash(key);

        if let Some(value) = self.lookup(hash, key) {
            self.counters.record_hit();
            return Ok(CacheLookup {
                value,
                was_cached: true,
                creation_duration: None,
            });
        }

        let waiter = {
            let mut in_flight = self.in_flight.lock();
            // The creator publishes to the index before leaving the in-flight
            // map, so this re-check cannot miss a finished creation.
            if let Some(value) = self.lookup(hash, key) {
                drop(in_flight);
                self.counters.record_hit();
                return Ok(CacheLookup {
                    value,
                    was_cached: true,
                    creation_duration: None,
                });
            }
            if let Some(waiters) = in_flight.get_mut(key) {
                let (tx, rx) = flume::bounded(1);
                waiters.push(tx);
                Some(rx)
            } else {
                in_flight.insert(key.clone(), Vec::new());
                None
            }
        };

        if let Some(rx) = waiter {
            let shared = rx.recv().unwrap_or(Err(BackendError::Abandoned));
            return match shared {
                Ok(value) => {
                    self.counters.record_hit();
                    Ok(CacheLookup {
                        value,
                        was_cached: true,
                        creation_duration: None,
                    })
                }
                Err(source) => Err(CacheError::CreationFailure {
                    key: format!("{key:?}"),
                    source: Arc::new(source),
                }),
            };
        }

        let guard = InFlightGuard {
            cache: self,
            key: Some(key.clone()),
        };
        self.counters.record_miss();
        log::debug!("Pipeline cache miss: {key:?}");

        let watch = Stopwatch::start();
        match create() {
            Ok(value) => {
                let took = watch.elapsed();
                self.counters.record_creation(took);
                let value = self.publish(hash, key, Arc::new(value), took);
                guard.complete(Ok(value.clone()));
                log::debug!(
                    "Created pipeline {key:?} in {:.2} ms",
                    crate::utils::time::as_millis_f64(took)
                );
                Ok(CacheLookup {
                    value,
                    was_cached: false,
                    creation_duration: Some(took),
                })
            }
            Err(err) => {
                self.counters
                    .creation_failures
                    .fetch_add(1, Ordering::Relaxed);
                guard.complete(Err(err.clone()));
                Err(CacheError::CreationFailure {
                    key: format!("{key:?}"),
                    source: Arc::new(err),
                })
            }
        }
    }

    /// [Read] Looks `key` up without creating it. Counts as a hit or miss.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let found = self.lookup(key_hash(key), key);
        if found.is_some() {
            self.counters.record_hit();
        } else {
            self.counters.record_miss();
        }
        found
    }

    /// [Read] Membership test; does not affect LRU order or statistics.
    pub fn contains(&self, key: &K) -> bool {
        self.index.read().find(key_hash(key), key).is_some()
    }

    fn lookup(&self, hash: u64, key: &K) -> Option<Arc<V>> {
        let index = self.index.read();
        let entry = index.find(hash, key)?;
        entry.touch(self.next_tick());
        log::trace!("Pipeline cache hit: {key:?}");
        Some(entry.value.clone())
    }

    /// [Write] Inserts a freshly created value and evicts down to capacity.
    fn publish(&self, hash: u64, key: &K, value: Arc<V>, took: Duration) -> Arc<V> {
        let (resident, evicted) = {
            let mut index = self.index.write();
            if let Some(existing) = index.find(hash, key) {
                existing.touch(self.next_tick());
                (existing.value.clone(), Vec::new())
            } else {
                let entry = CacheEntry::new(key.clone(), value.clone(), self.next_tick(), took);
                index.insert(hash, entry);
                let evicted = index.evict_to(self.capacity.load(Ordering::Relaxed));
                (value.clone(), evicted)
            }
        };
        if !Arc::ptr_eq(&resident, &value) {
            log_release(&format!("{key:?}"), value.release());
        }
        self.counters
            .evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        dispose_all(evicted, "evicted");
        resident
    }

    /// [Write] Removes and disposes the entry for `key`.
    pub fn remove(&self, key: &K) -> bool {
        let removed = self.index.write().remove(key_hash(key), key);
        match removed {
            Some(entry) => {
                dispose_all(vec![entry], "removed");
                true
            }
            None => false,
        }
    }

    /// [Write] Disposes every entry and resets statistics. Returns the number
    /// of entries disposed.
    pub fn clear(&self) -> usize {
        let drained = self.index.write().drain();
        self.counters.reset();
        let count = drained.len();
        dispose_all(drained, "cleared");
        log::info!("Pipeline cache cleared ({count} entries)");
        count
    }

    /// [Write] Changes the capacity, evicting LRU entries when shrinking.
    pub fn resize(&self, new_capacity: usize) -> Result<()> {
        if new_capacity == 0 {
            return Err(CacheError::InvalidConfiguration(
                "cache capacity must be at least 1".to_string(),
            ));
        }
        let evicted = {
            let mut index = self.index.write();
            let old = self.capacity.swap(new_capacity, Ordering::Relaxed);
            if old != new_capacity {
                log::info!("Pipeline cache capacity {old} -> {new_capacity}");
            }
            index.evict_to(new_capacity)
        };
        self.counters
            .evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        dispose_all(evicted, "evicted");
        Ok(())
    }

    /// [Write] Expires every entry older than `max_age`. Returns how many
    /// were removed.
    pub fn force_cleanup(&self) -> usize {
        let Some(max_age) = self.max_age else {
            return 0;
        };
        let now = Instant::now();
        let expired = self.index.write().remove_where(|e| e.age(now) > max_age);
        let count = expired.len();
        if count > 0 {
            self.counters
                .expirations
                .fetch_add(count as u64, Ordering::Relaxed);
            log::debug!("Expired {count} pipeline cache entries");
        }
        dispose_all(expired, "expired");
        count
    }

    /// Periodic maintenance: expiration plus index compaction.
    pub fn sweep(&self) -> usize {
        let expired = self.force_cleanup();
        let mut index = self.index.write();
        let buckets = index.buckets.len();
        if index.buckets.capacity() > buckets.max(16) * 4 {
            index.buckets.shrink_to_fit();
        }
        expired
    }

    /// [Read]
    pub fn statistics(&self) -> CacheStatistics {
        let (entries, memory) = {
            let index = self.index.read();
            (index.len, index.memory)
        };
        CacheStatistics::from_counters(&self.counters, entries, self.capacity(), memory)
    }

    /// [Read] Metadata for every resident entry, most recently used first.
    pub fn entries_snapshot(&self) -> Vec<EntrySnapshot<K>> {
        let now = Instant::now();
        let index = self.index.read();
        let mut entries: Vec<_> = index
            .iter()
            .map(|e| (e.last_access_tick(), e.snapshot(now)))
            .collect();
        drop(index);
        entries.sort_by_key(|(tick, _)| std::cmp::Reverse(*tick));
        entries.into_iter().map(|(_, s)| s).collect()
    }

    /// [Read] Resident keys, least recently used first.
    pub fn keys_lru_order(&self) -> Vec<K> {
        let index = self.index.read();
        let mut keys: Vec<_> = index
            .iter()
            .map(|e| (e.last_access_tick(), e.key.clone()))
            .collect();
        drop(index);
        keys.sort_by_key(|(tick, _)| *tick);
        keys.into_iter().map(|(_, k)| k).collect()
    }

    pub fn len(&self) -> usize {
        self.index.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    fn finish_flight(&self, key: &K, result: &std::result::Result<Arc<V>, BackendError>) {
        let waiters = self.in_flight.lock().remove(key).unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

impl<K, V: CacheResource> Drop for LruCache<K, V> {
    fn drop(&mut self) {
        // Stop the sweep thread before tearing down the index.
        drop(self.maintenance.get_mut().take());

        let index = self.index.get_mut();
        let remaining: Vec<_> = index.buckets.drain().flat_map(|(_, b)| b).collect();
        index.len = 0;
        for entry in remaining {
            let value = entry.value;
            if let Err(err) = value.release() {
                log::warn!("Failed to release pipeline during cache shutdown: {err}");
            }
        }
    }
}

/// Clears the in-flight slot even if the factory panics.
struct InFlightGuard<'a, K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: CacheResource,
{
    cache: &'a LruCache<K, V>,
    key: Option<K>,
}

impl<K, V> InFlightGuard<'_, K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: CacheResource,
{
    fn complete(mut self, result: std::result::Result<Arc<V>, BackendError>) {
        if let Some(key) = self.key.take() {
            self.cache.finish_flight(&key, &result);
        }
    }
}

impl<K, V> Drop for InFlightGuard<'_, K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: CacheResource,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.finish_flight(&key, &Err(BackendError::Abandoned));
        }
    }
}

fn dispose_all<K: Debug, V: CacheResource>(entries: Vec<CacheEntry<K, V>>, reason: &str) {
    for entry in entries {
        let label = format!("{:?}", entry.key);
        log::trace!("Pipeline {reason}: {label}");
        log_release(&label, entry.dispose());
    }
}

fn log_release(label: &str, result: std::result::Result<(), BackendError>) {
    if let Err(err) = result {
        log::warn!("Failed to release pipeline {label}: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Handle(u32);

    impl CacheResource for Handle {
        fn memory_estimate(&self) -> u64 {
            100
        }
    }

    fn cache(capacity: usize) -> Arc<LruCache<&'static str, Handle>> {
        LruCache::new(LruCacheConfig {
            capacity,
            max_age: None,
            sweep_interval: None,
        })
        .unwrap()
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let result = LruCache::<&str, Handle>::new(LruCacheConfig {
            capacity: 0,
            ..LruCacheConfig::default()
        });
        assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
    }

    #[test]
    fn lru_order_follows_access() {
        let c = cache(4);
        for (i, k) in ["a", "b", "c"].into_iter().enumerate() {
            c.get_or_create(&k, || Ok(Handle(i as u32))).unwrap();
        }
        c.get(&"a");
        assert_eq!(c.keys_lru_order(), vec!["b", "c", "a"]);
    }

    #[test]
    fn memory_estimate_tracks_residents() {
        let c = cache(2);
        for k in ["a", "b", "c"] {
            c.get_or_create(&k, || Ok(Handle(0))).unwrap();
        }
        let stats = c.statistics();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.memory_estimate, 200);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn panicking_factory_releases_waiter_slot() {
        let c = cache(2);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = c.get_or_create(&"boom", || -> std::result::Result<Handle, BackendError> {
                panic!("factory panicked")
            });
        }));
        assert!(result.is_err());
        assert!(c.in_flight.lock().is_empty());

        let lookup = c.get_or_create(&"boom", || Ok(Handle(1))).unwrap();
        assert!(!lookup.was_cached);
        assert_eq!(lookup.value.0, 1);
    }

    /// Distinct keys that always land in the same bucket.
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Colliding(&'static str);

    impl Hash for Colliding {
        fn hash<H: Hasher>(&self, state: &mut H) {
            state.write_u64(42);
        }
    }

    #[test]
    fn colliding_keys_stay_distinct() {
        let c = LruCache::<Colliding, Handle>::new(LruCacheConfig {
            capacity: 2,
            max_age: None,
            sweep_interval: None,
        })
        .unwrap();
        let (a, b, d) = (Colliding("a"), Colliding("b"), Colliding("d"));

        c.get_or_create(&a, || Ok(Handle(1))).unwrap();
        c.get_or_create(&b, || Ok(Handle(2))).unwrap();
        assert_eq!(c.index.read().buckets.len(), 1);
        assert_eq!(c.get(&a).map(|h| h.0), Some(1));
        assert_eq!(c.get(&b).map(|h| h.0), Some(2));

        // `a` is now the least recently used entry of the shared bucket.
        c.get_or_create(&d, || Ok(Handle(3))).unwrap();
        assert_eq!(c.keys_lru_order(), vec![b.clone(), d.clone()]);

        assert!(c.remove(&d));
        assert!(!c.contains(&d));
        assert_eq!(c.get(&b).map(|h| h.0), Some(2));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn shrink_evicts_oldest_in_one_pass() {
        let keys: Vec<&'static str> = (0..2000)
            .map(|i| &*Box::leak(format!("k{i}").into_boxed_str()))
            .collect();
        let c = cache(keys.len());
        for k in &keys {
            c.get_or_create(k, || Ok(Handle(0))).unwrap();
        }
        c.get(&keys[0]);

        c.resize(3).unwrap();
        assert_eq!(c.keys_lru_order(), vec![keys[1998], keys[1999], keys[0]]);
        assert_eq!(c.statistics().evictions, 1997);
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use crate::errors::BackendError;

/// A native object owned by the cache.
///
/// `release` is called exactly once, when the owning entry is disposed.
/// Handles that free themselves on `Drop` can keep the default.
pub trait CacheResource: Send + Sync + 'static {
    /// Approximate backend memory held by this object, in bytes.
    fn memory_estimate(&self) -> u64 {
        0
    }

    fn release(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Metadata of a resident entry, detached from the cache.
#[derive(Debug, Clone)]
pub struct EntrySnapshot<K> {
    pub key: K,
    pub created_at: SystemTime,
    pub age: Duration,
    pub idle: Duration,
    pub access_count: u64,
    pub memory_estimate: u64,
    pub creation_duration: Duration,
}

/// One cached handle plus its bookkeeping.
///
/// Access metadata is atomic so hits can update it under the index read lock.
pub(crate) struct CacheEntry<K, V> {
    pub(crate) key: K,
    pub(crate) value: Arc<V>,
    pub(crate) created_at: Instant,
    pub(crate) created_wall: SystemTime,
    /// Global tick of the most recent access; lower is older.
    last_access_tick: AtomicU64,
    /// Nanoseconds since `created_at` of the most recent access.
    last_access_nanos: AtomicU64,
    access_count: AtomicU64,
    pub(crate) memory_estimate: u64,
    pub(crate) creation_duration: Duration,
}

impl<K, V: CacheResource> CacheEntry<K, V> {
    pub(crate) fn new(key: K, value: Arc<V>, tick: u64, creation_duration: Duration) -> Self {
        let memory_estimate = value.memory_estimate();
        Self {
            key,
            value,
            created_at: Instant::now(),
            created_wall: SystemTime::now(),
            last_access_tick: AtomicU64::new(tick),
            last_access_nanos: AtomicU64::new(0),
            access_count: AtomicU64::new(1),
            memory_estimate,
            creation_duration,
        }
    }

    #[inline]
    pub(crate) fn touch(&self, tick: u64) {
        // Concurrent hits may arrive out of order; keep the newest tick.
        self.last_access_tick.fetch_max(tick, Ordering::Relaxed);
        let nanos = u64::try_from(self.created_at.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last_access_nanos.store(nanos, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn last_access_tick(&self) -> u64 {
        self.last_access_tick.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub(crate) fn idle(&self, now: Instant) -> Duration {
        let last = self.created_at
            + Duration::from_nanos(self.last_access_nanos.load(Ordering::Relaxed));
        now.saturating_duration_since(last)
    }

    pub(crate) fn snapshot(&self, now: Instant) -> EntrySnapshot<K>
    where
        K: Clone,
    {
        EntrySnapshot {
            key: self.key.clone(),
            created_at: self.created_wall,
            age: self.age(now),
            idle: self.idle(now),
            access_count: self.access_count(),
            memory_estimate: self.memory_estimate,
            creation_duration: self.creation_duration,
        }
    }

    /// Releases the native handle. Consumes the entry, so it runs once.
    ///
    /// Callers may still hold clones of the `Arc`; those stay valid as Rust
    /// values, but the backend object behind them has been released.
    pub(crate) fn dispose(self) -> Result<(), BackendError>
    where
        K: std::fmt::Debug,
    {
        log::trace!("Disposing cache entry {:?}", self.key);
        self.value.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counted(Arc<AtomicUsize>);

    impl CacheResource for Counted {
        fn memory_estimate(&self) -> u64 {
            256
        }

        fn release(&self) -> Result<(), BackendError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn touch_updates_tick_and_count() {
        let released = Arc::new(AtomicUsize::new(0));
        let entry = CacheEntry::new("a", Arc::new(Counted(released)), 1, Duration::ZERO);
        assert_eq!(entry.access_count(), 1);
        assert_eq!(entry.memory_estimate, 256);

        entry.touch(7);
        assert_eq!(entry.last_access_tick(), 7);
        assert_eq!(entry.access_count(), 2);
    }

    #[test]
    fn late_touch_keeps_newest_tick() {
        let released = Arc::new(AtomicUsize::new(0));
        let entry = CacheEntry::new("a", Arc::new(Counted(released)), 1, Duration::ZERO);
        entry.touch(9);
        entry.touch(4);
        assert_eq!(entry.last_access_tick(), 9);
        assert_eq!(entry.access_count(), 3);
    }

    #[test]
    fn dispose_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let entry = CacheEntry::new("a", Arc::new(Counted(released.clone())), 1, Duration::ZERO);
        entry.dispose().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}

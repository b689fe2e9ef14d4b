//! Cache Core
//!
//! Generic, thread-safe LRU storage for native handles:
//! - [`LruCache`]: get-or-create with single-flight, eviction, expiration
//! - [`CacheResource`]: what a cached handle must provide for disposal
//! - [`CacheStatistics`]: counters snapshot

mod entry;
mod lru;
mod maintenance;
mod stats;

pub use entry::{CacheResource, EntrySnapshot};
pub use lru::{CacheLookup, LruCache, LruCacheConfig};
pub use stats::CacheStatistics;

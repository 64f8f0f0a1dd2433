//! Size- and count-bounded in-memory file cache.
//!
//! Entries are kept in least-recently-used order; an insert that would break
//! either bound evicts from the cold end first. Concurrent misses for one key
//! share a single load through a per-key once-cell, while misses for
//! different keys never wait on each other.

mod entry;

use std::hash::BuildHasherDefault;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use tracing::{debug, warn};

use crate::error::Result;

pub use entry::{fingerprint, CacheEntry, Variant};

pub type EvictionCallback = Arc<dyn Fn(&str) + Send + Sync>;

type LoadSlot = Arc<OnceCell<Result<Arc<CacheEntry>>>>;

struct CacheState {
    lru: LruCache<String, Arc<CacheEntry>, BuildHasherDefault<FxHasher>>,
    total_bytes: u64,
}

impl CacheState {
    fn remove(&mut self, key: &str) -> Option<Arc<CacheEntry>> {
        let removed = self.lru.pop(key)?;
        self.total_bytes -= removed.size();
        Some(removed)
    }
}

pub struct Cache {
    state: Mutex<CacheState>,
    loads: Mutex<FxHashMap<String, LoadSlot>>,
    clock: AtomicU64,
    evictions: AtomicU64,
    max_bytes: u64,
    max_entries: usize,
    on_evict: Option<EvictionCallback>,
}

impl Cache {
    pub fn new(max_bytes: u64, max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                lru: LruCache::unbounded_with_hasher(BuildHasherDefault::default()),
                total_bytes: 0,
            }),
            loads: Mutex::new(FxHashMap::default()),
            clock: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            max_bytes,
            max_entries,
            on_evict: None,
        }
    }

    /// Observer invoked once per evicted key, after the cache lock is released.
    pub fn with_eviction_callback(mut self, callback: EvictionCallback) -> Self {
        self.on_evict = Some(callback);
        self
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Looks up `key` and marks it as most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let mut state = self.state.lock();
        let entry = state.lru.get(key)?;
        entry.touch(self.tick());
        Some(Arc::clone(entry))
    }

    /// Looks up `key` without affecting eviction order.
    pub fn peek(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.state.lock().lru.peek(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().lru.contains(key)
    }

    /// Inserts `entry`, evicting least-recently-used entries until both bounds
    /// hold. Returns `false` when the entry can never fit and was not kept;
    /// the caller still serves it. Any previous value for `key` is dropped
    /// either way.
    pub fn set(&self, key: &str, entry: Arc<CacheEntry>) -> bool {
        let size = entry.size();
        if size > self.max_bytes || self.max_entries == 0 {
            debug!(path = key, bytes = size, "entry exceeds cache capacity, not cached");
            self.state.lock().remove(key);
            return false;
        }

        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock();
            state.remove(key);

            while state.total_bytes + size > self.max_bytes
                || state.lru.len() + 1 > self.max_entries
            {
                match state.lru.pop_lru() {
                    Some((old_key, old)) => {
                        state.total_bytes -= old.size();
                        evicted.push(old_key);
                    }
                    None => break,
                }
            }

            entry.touch(self.tick());
            state.total_bytes += size;
            state.lru.push(key.to_string(), entry);
        }

        self.notify_evicted(evicted);
        true
    }

    pub fn delete(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.state.lock().remove(key)
    }

    /// Empties the cache and zeroes both totals in one step.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.lru.clear();
        state.total_bytes = 0;
    }

    /// Returns the cached entry for `key`, or runs `load` to produce it.
    ///
    /// Concurrent callers that miss on the same key wait for the first
    /// caller's `load` and share its outcome, errors included. No lock is held
    /// while `load` runs.
    pub fn get_or_load<F>(&self, key: &str, load: F) -> Result<Arc<CacheEntry>>
    where
        F: FnOnce() -> Result<CacheEntry>,
    {
        if let Some(entry) = self.get(key) {
            return Ok(entry);
        }

        let slot = {
            let mut loads = self.loads.lock();
            // A load may have finished between the miss above and taking the
            // lock; its entry is published before its slot is retired.
            if let Some(entry) = self.get(key) {
                return Ok(entry);
            }
            Arc::clone(loads.entry(key.to_string()).or_default())
        };

        let outcome = slot
            .get_or_init(|| {
                debug!(path = key, "cache miss, loading");
                let loaded = load().map(Arc::new);
                if let Ok(entry) = &loaded {
                    self.set(key, Arc::clone(entry));
                }
                loaded
            })
            .clone();

        let mut loads = self.loads.lock();
        if loads
            .get(key)
            .map_or(false, |current| Arc::ptr_eq(current, &slot))
        {
            loads.remove(key);
        }

        outcome
    }

    fn notify_evicted(&self, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        self.evictions.fetch_add(keys.len() as u64, Ordering::Relaxed);

        for key in keys {
            debug!(path = %key, "evicted");
            if let Some(callback) = &self.on_evict {
                if panic::catch_unwind(AssertUnwindSafe(|| callback(key.as_str()))).is_err() {
                    warn!(path = %key, "eviction callback panicked");
                }
            }
        }
    }

    /// Aggregate size of all cached raw bytes.
    pub fn size_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    pub fn len(&self) -> usize {
        self.state.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().lru.iter().map(|(k, _)| k.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Content;
    use bytes::Bytes;
    use std::time::UNIX_EPOCH;

    fn entry(key: &str, size: usize) -> Arc<CacheEntry> {
        Arc::new(CacheEntry::new(
            key,
            Content {
                bytes: Bytes::from(vec![b'x'; size]),
                modified: UNIX_EPOCH,
            },
        ))
    }

    #[test]
    fn replacing_a_key_does_not_double_count() {
        let cache = Cache::new(100, 10);
        cache.set("a", entry("a", 40));
        cache.set("a", entry("a", 30));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes(), 30);
    }

    #[test]
    fn get_stamps_access_order() {
        let cache = Cache::new(100, 10);
        cache.set("a", entry("a", 1));
        cache.set("b", entry("b", 1));
        let before = cache.peek("a").unwrap().last_accessed();
        let after = cache.get("a").unwrap().last_accessed();
        assert!(after > before);
        assert_eq!(cache.keys(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn peek_does_not_promote() {
        let cache = Cache::new(100, 2);
        cache.set("a", entry("a", 1));
        cache.set("b", entry("b", 1));
        cache.peek("a");
        cache.set("c", entry("c", 1));
        assert!(!cache.contains("a"));
    }

    #[test]
    fn delete_releases_accounting() {
        let cache = Cache::new(100, 10);
        cache.set("a", entry("a", 10));
        assert!(cache.delete("a").is_some());
        assert!(cache.delete("a").is_none());
        assert_eq!(cache.size_bytes(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_entry_capacity_keeps_nothing() {
        let cache = Cache::new(100, 0);
        assert!(!cache.set("a", entry("a", 1)));
        assert!(cache.is_empty());
    }
}

//! In-memory LRU cache
//!
//! Used by [`HeaderCachingClient`](crate::HeaderCachingClient) to remember
//! the yEnc header of every segment it has seen, so repeated interpolation
//! searches over the same file do not go back to the network.
//!
//! # Cache Strategy
//!
//! - **Index**: segment id
//! - **Eviction**: LRU (Least Recently Used), tracked with a monotonically
//!   increasing access tick
//! - **Size Limit**: configurable max entries
//!
//! # Example
//!
//! ```
//! use nntp_stream::cache::LruCache;
//!
//! let mut cache = LruCache::new(2);
//! cache.put("a", 1);
//! cache.put("b", 2);
//! cache.get(&"a"); // "a" is now most recently used
//! cache.put("c", 3); // evicts "b"
//!
//! assert!(cache.contains(&"a"));
//! assert!(!cache.contains(&"b"));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Bounded LRU map
#[derive(Debug, Clone)]
pub struct LruCache<K, V> {
    max_size: usize,
    /// key -> (value, access tick)
    entries: HashMap<K, (V, u64)>,
    /// access tick -> key; the first entry is the least recently used
    order: BTreeMap<u64, K>,
    tick: u64,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// Create a cache holding at most `max_size` entries
    ///
    /// A `max_size` of 0 is treated as 1.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            entries: HashMap::new(),
            order: BTreeMap::new(),
            tick: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Insert or replace an entry, evicting the least recently used if full
    pub fn put(&mut self, key: K, value: V) {
        let tick = self.next_tick();
        if let Some((_, old_tick)) = self.entries.remove(&key) {
            self.order.remove(&old_tick);
        } else if self.entries.len() >= self.max_size {
            self.evict_lru();
        }
        self.order.insert(tick, key.clone());
        self.entries.insert(key, (value, tick));
    }

    /// Look up an entry and mark it most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let tick = self.next_tick();
        let (value, entry_tick) = self.entries.get_mut(key)?;
        let old_tick = std::mem::replace(entry_tick, tick);
        if let Some(k) = self.order.remove(&old_tick) {
            self.order.insert(tick, k);
        }
        Some(value)
    }

    /// Whether `key` is cached (does not affect recency)
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove an entry
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, tick) = self.entries.remove(key)?;
        self.order.remove(&tick);
        Some(value)
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    fn evict_lru(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

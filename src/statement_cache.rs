//! Bounded, insertion-order LRU cache from statement text to a cached value,
//! with an eviction callback.
//!
//! Grounded on `sqlx_core::common::statement_cache::StatementCache`, which
//! wraps an LRU map keyed by statement text; here the value is generic so the
//! same cache shape serves the pool's `StatementWrapper` entries.

use hashlink::LruCache;

/// Per-[`crate::connection::ConnectionWrapper`] prepared-statement cache.
/// Owned by exactly one connection; cleared when that connection closes.
pub struct StatementCache<V> {
    inner: LruCache<String, V>,
    capacity: usize,
}

impl<V> StatementCache<V> {
    /// `capacity == 0` disables the cache: every lookup misses and nothing
    /// is ever retained.
    pub fn new(capacity: usize) -> Self {
        StatementCache { inner: LruCache::new_unbounded(), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Look up `key`, promoting it to most-recently-used on hit.
    pub fn get(&mut self, key: &str) -> Option<&mut V> {
        if self.capacity == 0 {
            return None;
        }
        self.inner.get_mut(key)
    }

    /// Remove and return the entry for `key`, taking ownership.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        if self.capacity == 0 {
            return None;
        }
        self.inner.remove(key)
    }

    /// Insert `value` under `key`. If at capacity and `key` is new, the
    /// least-recently-used entry is evicted and returned so the caller can
    /// destroy it (close the underlying driver statement).
    pub fn insert(&mut self, key: String, value: V) -> Option<(String, V)> {
        if self.capacity == 0 {
            return Some((key, value));
        }

        let evicted = if self.inner.len() >= self.capacity && !self.inner.contains_key(&key) {
            self.inner.remove_lru()
        } else {
            None
        };

        self.inner.insert(key, value);
        evicted
    }

    /// Drain every entry, e.g. when the owning connection closes.
    pub fn drain(&mut self) -> Vec<(String, V)> {
        let mut out = Vec::with_capacity(self.inner.len());
        while let Some(entry) = self.inner.remove_lru() {
            out.push(entry);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_bounds_distinct_keys() {
        let mut cache: StatementCache<u32> = StatementCache::new(2);
        assert!(cache.insert("A".into(), 1).is_none());
        assert!(cache.insert("B".into(), 2).is_none());
        // touch A so B becomes LRU
        assert!(cache.get("A").is_some());
        let evicted = cache.insert("C".into(), 3);
        assert_eq!(evicted, Some(("B".to_string(), 2)));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("A").is_some());
        assert!(cache.get("C").is_some());
        assert!(cache.get("B").is_none());
    }

    #[test]
    fn zero_capacity_never_retains() {
        let mut cache: StatementCache<u32> = StatementCache::new(0);
        let evicted = cache.insert("A".into(), 1);
        assert_eq!(evicted, Some(("A".to_string(), 1)));
        assert_eq!(cache.len(), 0);
        assert!(cache.get("A").is_none());
    }

    #[test]
    fn reinsert_refreshes_recency_without_eviction() {
        let mut cache: StatementCache<u32> = StatementCache::new(2);
        cache.insert("A".into(), 1);
        cache.insert("B".into(), 2);
        assert!(cache.insert("A".into(), 10).is_none());
        let evicted = cache.insert("C".into(), 3);
        assert_eq!(evicted, Some(("B".to_string(), 2)));
    }
}

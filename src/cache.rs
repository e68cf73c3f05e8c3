//! The object-cache contract the lock core is wrapped by.
//!
//! Out of scope per the core's own design: this module specifies only the
//! two operations the lock core's callers actually need
//! (`lock_exclusive`/`lock_shared` on a cache entry) plus a minimal
//! in-memory cache good enough to drive this crate's own tests. A real
//! cache (LRU with background eviction, size accounting, metrics) is a
//! separate concern.
//!
//! Reclamation follows the design-notes guidance directly: rather than
//! rely on a weak map and non-deterministic finalization, entries are held
//! by a bounded strong-reference LRU and otherwise tracked by `Weak`; a
//! `Weak` that fails to upgrade is treated as already collected and
//! dropped from the index on the next lookup ("collected on lookup").

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::event::CondvarEventBridge;
use crate::thread_lock::{Lock, Slot};

/// A cache entry: a shared value paired with the `Slot` that arbitrates
/// access to it. `lock_exclusive`/`lock_shared` are its only lock-facing
/// operations.
pub struct ObjCacheEntry<V> {
    value: Arc<V>,
    slot: Slot,
}

impl<V> ObjCacheEntry<V> {
    pub fn value(&self) -> &Arc<V> {
        &self.value
    }

    pub fn lock_exclusive(&self) -> Arc<Lock> {
        self.slot.acquire_exclusive()
    }

    pub fn lock_shared(&self) -> Arc<Lock> {
        self.slot.acquire_shared()
    }
}

/// Contract for whatever cache wraps the lock core. Guarantees at most one
/// live value per key.
pub trait ObjCache<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<Arc<ObjCacheEntry<V>>>;
    fn get_or_insert_with(&self, key: K, init: impl FnOnce() -> V) -> Arc<ObjCacheEntry<V>>;
}

struct Indexed<V> {
    weak: Weak<ObjCacheEntry<V>>,
}

/// Minimal in-memory stand-in for the real object cache: a bounded
/// strong-reference LRU backed by a `Weak`-indexed map, with no
/// size/metrics accounting. Sufficient for exercising the lock core end
/// to end; not a substitute for the real cache.
pub struct InMemoryObjCache<K, V> {
    index: Mutex<HashMap<K, Indexed<V>>>,
    lru: Mutex<VecDeque<(K, Arc<ObjCacheEntry<V>>)>>,
    capacity: usize,
}

impl<K, V> InMemoryObjCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            index: Mutex::new(HashMap::new()),
            lru: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn touch(&self, key: K, entry: Arc<ObjCacheEntry<V>>) {
        let mut lru = self.lru.lock();
        lru.push_front((key, entry));
        while lru.len() > self.capacity {
            lru.pop_back();
        }
    }
}

impl<K, V> ObjCache<K, V> for InMemoryObjCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Send + Sync,
{
    fn get(&self, key: &K) -> Option<Arc<ObjCacheEntry<V>>> {
        let mut index = self.index.lock();
        match index.get(key).and_then(|i| i.weak.upgrade()) {
            Some(entry) => {
                self.touch(key.clone(), entry.clone());
                Some(entry)
            }
            None => {
                index.remove(key);
                None
            }
        }
    }

    fn get_or_insert_with(&self, key: K, init: impl FnOnce() -> V) -> Arc<ObjCacheEntry<V>> {
        if let Some(entry) = self.get(&key) {
            return entry;
        }

        let entry = Arc::new(ObjCacheEntry {
            value: Arc::new(init()),
            slot: Slot::new(CondvarEventBridge::new()),
        });
        self.index.lock().insert(key.clone(), Indexed { weak: Arc::downgrade(&entry) });
        self.touch(key, entry.clone());
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_insert_creates_once() {
        let cache: InMemoryObjCache<String, u32> = InMemoryObjCache::new(8);
        let a = cache.get_or_insert_with("k".to_string(), || 1);
        let b = cache.get_or_insert_with("k".to_string(), || 2);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(**a.value(), 1);
    }

    #[test]
    fn entry_locks_are_independent_slots_per_key() {
        let cache: InMemoryObjCache<String, u32> = InMemoryObjCache::new(8);
        let a = cache.get_or_insert_with("a".to_string(), || 1);
        let b = cache.get_or_insert_with("b".to_string(), || 2);
        let la = a.lock_exclusive();
        let lb = b.lock_exclusive();
        assert!(!Arc::ptr_eq(&la, &lb));
    }

    #[test]
    fn eviction_beyond_capacity_drops_strong_refs() {
        let cache: InMemoryObjCache<u32, u32> = InMemoryObjCache::new(1);
        let first = cache.get_or_insert_with(1, || 10);
        cache.get_or_insert_with(2, || 20);
        drop(first);
        // The first entry's only strong ref was in the LRU, evicted when
        // the second insert pushed the deque past capacity.
        assert!(cache.get(&1).is_none());
    }
}

//! Compute-once caches shared between worker threads.
//!
//! A lookup takes the map lock only long enough to find or create the slot
//! for a key; the value is then computed while holding that slot's own lock.
//! Concurrent requests for the same key wait on the slot instead of
//! recomputing, while requests for other keys proceed in parallel.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Slot<V> = Arc<Mutex<Option<Arc<V>>>>;

struct Slots<K, V> {
    map: HashMap<K, Slot<V>>,
    // Least recently used key at the front.
    order: VecDeque<K>,
}

pub struct KeyedCache<K, V> {
    capacity: Option<usize>,
    slots: Mutex<Slots<K, V>>,
    computations: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K: Eq + Hash + Clone, V> KeyedCache<K, V> {
    /// Cache that keeps at most `capacity` entries, evicting the least
    /// recently used one.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    /// Cache that never evicts. Used for state that lives for one run.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            slots: Mutex::new(Slots {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            computations: AtomicUsize::new(0),
        }
    }

    /// Return the cached value for `key`, computing it with `compute` if it is
    /// missing. A failed computation leaves the slot empty so a later call can
    /// try again.
    pub fn get_or_try_insert_with<E, F>(&self, key: K, compute: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let slot = self.slot_for(key);
        let mut value = lock(&slot);
        if let Some(cached) = value.as_ref() {
            return Ok(Arc::clone(cached));
        }

        self.computations.fetch_add(1, Ordering::Relaxed);
        let computed = Arc::new(compute()?);
        *value = Some(Arc::clone(&computed));
        Ok(computed)
    }

    fn slot_for(&self, key: K) -> Slot<V> {
        let mut slots = lock(&self.slots);

        if let Some(slot) = slots.map.get(&key).cloned() {
            if self.capacity.is_some() {
                if let Some(pos) = slots.order.iter().position(|k| *k == key) {
                    slots.order.remove(pos);
                }
                slots.order.push_back(key);
            }
            return slot;
        }

        let slot: Slot<V> = Arc::new(Mutex::new(None));
        slots.map.insert(key.clone(), Arc::clone(&slot));

        if let Some(capacity) = self.capacity {
            slots.order.push_back(key);
            while slots.order.len() > capacity {
                if let Some(evicted) = slots.order.pop_front() {
                    slots.map.remove(&evicted);
                }
            }
        }

        slot
    }

    /// Number of times a value was actually computed (cache misses that ran
    /// the closure).
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_hit_skips_computation() {
        let cache: KeyedCache<usize, String> = KeyedCache::unbounded();
        let first = cache
            .get_or_try_insert_with(3, || Ok::<_, ()>("three".to_string()))
            .unwrap();
        let second = cache
            .get_or_try_insert_with(3, || Ok::<_, ()>("other".to_string()))
            .unwrap();

        assert_eq!(*second, "three");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.computations(), 1);
    }

    #[test]
    fn test_error_leaves_slot_empty() {
        let cache: KeyedCache<usize, u32> = KeyedCache::unbounded();
        assert!(cache.get_or_try_insert_with(1, || Err("boom")).is_err());
        let value = cache.get_or_try_insert_with(1, || Ok::<_, &str>(7)).unwrap();
        assert_eq!(*value, 7);
    }

    #[test]
    fn test_bounded_evicts_least_recently_used() {
        let cache: KeyedCache<u32, u32> = KeyedCache::bounded(2);
        let get = |k: u32| cache.get_or_try_insert_with(k, || Ok::<_, ()>(k * 10)).unwrap();

        get(1);
        get(2);
        get(1); // 2 is now the oldest
        get(3);

        assert_eq!(lock(&cache.slots).map.len(), 2);
        assert_eq!(cache.computations(), 3);

        get(1);
        assert_eq!(cache.computations(), 3, "1 should still be cached");
        get(2);
        assert_eq!(cache.computations(), 4, "2 should have been evicted");
    }

    #[test]
    fn test_concurrent_requests_compute_once() {
        let cache: KeyedCache<usize, usize> = KeyedCache::unbounded();
        let calls = AtomicUsize::new(0);

        (0..64).into_par_iter().for_each(|i| {
            let key = i % 4;
            let value = cache
                .get_or_try_insert_with(key, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(2));
                    Ok::<_, ()>(key * 2)
                })
                .unwrap();
            assert_eq!(*value, key * 2);
        });

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(cache.computations(), 4);
    }
}

//! Sharded concurrent hash map with atomic per-key updates.
//!
//! Keys are spread over independently locked shards so operations on
//! different shards never contend. Every read-modify-write operation
//! (`compute`, `compute_if_absent`, `merge`, `put_if_absent`) runs entirely
//! under its shard's write lock, so it is indivisible with respect to every
//! other operation on the same key. Concurrent `compute` calls on one key
//! therefore never lose updates.
//!
//! Whole-map operations (`len`, `for_each`, `search`, `reduce_values`) visit
//! shards one at a time and are not a consistent snapshot of the whole map.
//!
//! The closures passed to per-key operations run while the shard is locked
//! and must not call back into the same map.

use parking_lot::RwLock;
use std::collections::hash_map::{Entry, RandomState};
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};

const DEFAULT_SHARDS: usize = 16;

/// A thread-safe hash map split into independently locked shards.
pub struct ConcurrentMap<K, V, S = RandomState> {
    shards: Box<[RwLock<HashMap<K, V>>]>,
    hasher: S,
}

impl<K: Hash + Eq, V> ConcurrentMap<K, V> {
    /// Creates an empty map with the default shard count.
    #[must_use]
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Creates an empty map with at least `shards` shards (rounded up to a
    /// power of two, minimum one).
    #[must_use]
    pub fn with_shards(shards: usize) -> Self {
        Self::with_shards_and_hasher(shards, RandomState::new())
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> ConcurrentMap<K, V, S> {
    /// Creates an empty map using `hasher` for shard selection.
    #[must_use]
    pub fn with_shards_and_hasher(shards: usize, hasher: S) -> Self {
        let count = shards.max(1).next_power_of_two();
        Self {
            shards: (0..count).map(|_| RwLock::new(HashMap::new())).collect(),
            hasher,
        }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        let hash = self.hasher.hash_one(key);
        // Power-of-two shard count; the cast keeps the low bits.
        #[allow(clippy::cast_possible_truncation)]
        let index = (hash as usize) & (self.shards.len() - 1);
        &self.shards[index]
    }

    /// Number of shards.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Returns a clone of the value for `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.shard(key).read().get(key).cloned()
    }

    /// Applies `f` to the value for `key` under the shard's read lock.
    pub fn with<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.shard(key).read().get(key).map(f)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.shard(key).read().contains_key(key)
    }

    /// Inserts `value`, returning the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.shard(&key).write().insert(key, value)
    }

    /// Removes `key`, returning its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.shard(key).write().remove(key)
    }

    /// Inserts `value` only if `key` is absent.
    ///
    /// Returns the existing value when the key was present.
    pub fn put_if_absent(&self, key: K, value: V) -> Option<V>
    where
        V: Clone,
    {
        match self.shard(&key).write().entry(key) {
            Entry::Occupied(e) => Some(e.get().clone()),
            Entry::Vacant(e) => {
                e.insert(value);
                None
            }
        }
    }

    /// Atomically replaces the mapping for `key` with `f(key, current)`.
    ///
    /// Returning `None` removes the key. Returns the new value. If `f`
    /// panics the mapping is left unchanged.
    pub fn compute(&self, key: K, f: impl FnOnce(&K, Option<V>) -> Option<V>) -> Option<V>
    where
        V: Clone,
    {
        let mut shard = self.shard(&key).write();
        // The mapping stays in place until `f` returns.
        let current = shard.get(&key).cloned();
        match f(&key, current) {
            Some(next) => {
                shard.insert(key, next.clone());
                Some(next)
            }
            None => {
                shard.remove(&key);
                None
            }
        }
    }

    /// Returns the value for `key`, inserting `f(key)` first if absent.
    ///
    /// `f` runs at most once, and only when the key is absent.
    pub fn compute_if_absent(&self, key: K, f: impl FnOnce(&K) -> V) -> V
    where
        V: Clone,
    {
        let mut shard = self.shard(&key).write();
        match shard.entry(key) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                let value = f(e.key());
                e.insert(value).clone()
            }
        }
    }

    /// Replaces the value for a present `key` with `f(key, current)`.
    ///
    /// Returning `None` removes the key. Absent keys are left untouched.
    pub fn compute_if_present(&self, key: &K, f: impl FnOnce(&K, &V) -> Option<V>) -> Option<V>
    where
        V: Clone,
    {
        let mut shard = self.shard(key).write();
        let next = f(key, shard.get(key)?);
        match next {
            Some(value) => {
                if let Some(slot) = shard.get_mut(key) {
                    *slot = value.clone();
                }
                Some(value)
            }
            None => {
                shard.remove(key);
                None
            }
        }
    }

    /// Inserts `value`, or combines it with the present value via `f`.
    ///
    /// Returns the resulting value. If `f` panics the mapping is left
    /// unchanged.
    pub fn merge(&self, key: K, value: V, f: impl FnOnce(V, V) -> V) -> V
    where
        V: Clone,
    {
        let mut shard = self.shard(&key).write();
        let merged = match shard.get(&key).cloned() {
            Some(current) => f(current, value),
            None => value,
        };
        shard.insert(key, merged.clone());
        merged
    }

    /// Total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Returns true if no shard holds an entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    /// Removes every entry.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
    }

    /// Visits every entry, one shard at a time.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for shard in self.shards.iter() {
            for (k, v) in shard.read().iter() {
                f(k, v);
            }
        }
    }

    /// Returns the first non-`None` result of `f` over the entries.
    pub fn search<R>(&self, mut f: impl FnMut(&K, &V) -> Option<R>) -> Option<R> {
        self.shards
            .iter()
            .find_map(|shard| shard.read().iter().find_map(|(k, v)| f(k, v)))
    }

    /// Folds all values with `f`, or `None` for an empty map.
    pub fn reduce_values(&self, mut f: impl FnMut(V, V) -> V) -> Option<V>
    where
        V: Clone,
    {
        let mut acc: Option<V> = None;
        self.for_each(|_, v| {
            acc = Some(match acc.take() {
                Some(a) => f(a, v.clone()),
                None => v.clone(),
            });
        });
        acc
    }
}

impl<K: Hash + Eq, V> Default for ConcurrentMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for ConcurrentMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for shard in self.shards.iter() {
            map.entries(shard.read().iter());
        }
        map.finish()
    }
}

//! Lock-sharded hash map.
//!
//! Keys hash to one of a fixed number of shards, each behind its own mutex, so
//! operations on different keys rarely contend while operations on the same key
//! are serialized.

use std::collections::hash_map::{Entry, HashMap, RandomState};
use std::hash::{BuildHasher, Hash};

use parking_lot::Mutex;

const DEFAULT_SHARDS: usize = 16;

pub(crate) struct ShardedMap<K, V> {
    shards: Box<[Mutex<HashMap<K, V>>]>,
    hasher: RandomState,
}

impl<K: Hash + Eq, V> ShardedMap<K, V> {
    pub(crate) fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub(crate) fn with_shards(count: usize) -> Self {
        let shards = (0..count.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, key: &K) -> &Mutex<HashMap<K, V>> {
        // Truncation is fine, only the low bits pick the shard.
        #[allow(clippy::cast_possible_truncation)]
        let index = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Run `f` on the entry for `key` while its shard is locked.
    pub(crate) fn with_entry<R>(&self, key: K, f: impl FnOnce(Entry<'_, K, V>) -> R) -> R {
        let mut shard = self.shard(&key).lock();
        f(shard.entry(key))
    }

    pub(crate) fn get_cloned(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.shard(key).lock().get(key).cloned()
    }

    pub(crate) fn remove(&self, key: &K) -> Option<V> {
        self.shard(key).lock().remove(key)
    }

    pub(crate) fn contains_key(&self, key: &K) -> bool {
        self.shard(key).lock().contains_key(key)
    }

    /// Keep only entries for which `f` returns `true`, one shard at a time.
    pub(crate) fn retain(&self, mut f: impl FnMut(&K, &mut V) -> bool) {
        for shard in &*self.shards {
            shard.lock().retain(|k, v| f(k, v));
        }
    }

    /// Visit every entry mutably, one shard at a time.
    pub(crate) fn for_each_mut(&self, mut f: impl FnMut(&K, &mut V)) {
        for shard in &*self.shards {
            for (k, v) in shard.lock().iter_mut() {
                f(k, v);
            }
        }
    }

    /// Remove and return every entry.
    pub(crate) fn drain(&self) -> Vec<(K, V)> {
        self.shards
            .iter()
            .flat_map(|shard| shard.lock().drain().collect::<Vec<_>>())
            .collect()
    }

    pub(crate) fn clear(&self) {
        for shard in &*self.shards {
            shard.lock().clear();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().is_empty())
    }
}

impl<K: Hash + Eq, V> Default for ShardedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

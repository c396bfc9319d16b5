//! Sharded key index mapping key bytes to live entries.
//!
//! The key space is split across independently locked shards to keep
//! unrelated keys from contending. Within a shard, lookups take the read
//! lock and mutations the write lock, so a lookup racing a replace or
//! remove for the same key observes either the old or the new mapping,
//! never a torn one. Ordering across distinct keys is unspecified.

use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::RwLock;

use crate::entry::CacheEntry;
use crate::sync::{AtomicUsize, Ordering};

type Shard = HashMap<Box<[u8]>, Arc<CacheEntry>, RandomState>;

/// Concurrent map from key bytes to the entry currently holding the key.
pub(crate) struct KeyIndex {
    /// Power-of-two shard array.
    shards: Box<[RwLock<Shard>]>,
    /// Shard selector; the shard maps reuse the same seed.
    hasher: RandomState,
    /// Live entry count across all shards.
    len: AtomicUsize,
}

impl KeyIndex {
    /// Create an index with `shard_count` shards (must be a power of two).
    pub fn new(shard_count: usize) -> Self {
        debug_assert!(shard_count.is_power_of_two());

        let hasher = RandomState::new();
        let shards = (0..shard_count)
            .map(|_| RwLock::new(Shard::with_hasher(hasher.clone())))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            hasher,
            len: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &RwLock<Shard> {
        let hash = self.hasher.hash_one(key) as usize;
        &self.shards[hash & (self.shards.len() - 1)]
    }

    /// Look up a key and acquire a reference-count share on the entry.
    ///
    /// The share is taken while the shard read lock is held: removal needs
    /// the write lock, so the index share is still live here and the
    /// acquired share can never resurrect a reclaimed entry.
    pub fn lookup(&self, key: &[u8]) -> Option<Arc<CacheEntry>> {
        let shard = self.shard(key).read();
        let entry = shard.get(key)?;
        entry.acquire();
        Some(entry.clone())
    }

    /// Check for a key without touching refcounts.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.shard(key).read().contains_key(key)
    }

    /// Insert an entry, returning the entry previously mapped to the key.
    ///
    /// The caller still owns the previous entry's index share and must
    /// unlink and release it.
    pub fn insert(&self, entry: Arc<CacheEntry>) -> Option<Arc<CacheEntry>> {
        let key = entry.key().to_vec().into_boxed_slice();
        let previous = self.shard(&key).write().insert(key, entry);
        if previous.is_none() {
            self.len.fetch_add(1, Ordering::Relaxed);
        }
        previous
    }

    /// Remove a key, transferring the index share to the caller.
    pub fn remove(&self, key: &[u8]) -> Option<Arc<CacheEntry>> {
        let removed = self.shard(key).write().remove(key);
        if removed.is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove a key only if it still maps to `expected` (pointer identity).
    ///
    /// Policy-driven eviction uses this to validate a victim selected
    /// outside the shard lock: if the key was concurrently replaced or
    /// removed, nothing happens and the caller must pick another victim.
    pub fn remove_if_same(&self, key: &[u8], expected: &Arc<CacheEntry>) -> bool {
        let mut shard = self.shard(key).write();
        match shard.get(key) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                shard.remove(key);
                drop(shard);
                self.len.fetch_sub(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Drain every entry, handing each to `unlink`.
    ///
    /// Teardown helper; callers get each entry with its index share still
    /// attached, exactly as `remove` would hand it out.
    pub fn drain(&self, mut unlink: impl FnMut(Arc<CacheEntry>)) {
        for shard in self.shards.iter() {
            let mut shard = shard.write();
            for (_, entry) in shard.drain() {
                self.len.fetch_sub(1, Ordering::Relaxed);
                unlink(entry);
            }
        }
    }
}

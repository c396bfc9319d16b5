//! Cache entries and their reference-count lifecycle.
//!
//! An entry binds a key to the extent holding its value bytes. Entries
//! move through three states:
//!
//! 1. **Live**: present in the key index and (under LRU) the recency
//!    list. The index holds one reference-count share.
//! 2. **Unlinked**: removed from both; the remover inherited and then
//!    dropped the index share. Readers that acquired before the removal
//!    may still hold shares.
//! 3. **Reclaimed**: the count reached zero; whoever dropped the last
//!    share returns the extent to the allocator.
//!
//! The count gates only the *extent*: the entry struct itself is managed
//! by `Arc`. A reader therefore keeps the value bytes valid across a
//! concurrent replace or eviction of the same key simply by holding its
//! share until release.

use crate::extent::Extent;
use crate::sync::{fence, AtomicU32, Ordering};

/// Recency-list slot id meaning "not linked".
pub(crate) const INVALID_SLOT: u32 = u32::MAX;

/// A key bound to the extent holding its value.
#[derive(Debug)]
pub(crate) struct CacheEntry {
    /// Key bytes.
    key: Box<[u8]>,
    /// Extent holding the value (granularity-rounded).
    extent: Extent,
    /// Actual value length; at most `extent.len`.
    value_len: usize,
    /// Reference-count shares: one for the index while linked, one per
    /// outstanding reader.
    refs: AtomicU32,
    /// Slot in the recency list, or [`INVALID_SLOT`]. Written only under
    /// the policy lock.
    lru_slot: AtomicU32,
}

impl CacheEntry {
    /// Create a live entry. The initial share belongs to the index.
    pub fn new(key: Box<[u8]>, extent: Extent, value_len: usize) -> Self {
        debug_assert!(value_len <= extent.len);
        Self {
            key,
            extent,
            value_len,
            refs: AtomicU32::new(1),
            lru_slot: AtomicU32::new(INVALID_SLOT),
        }
    }

    /// Key bytes.
    #[inline]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The extent holding the value.
    #[inline]
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Actual value length in bytes.
    #[inline]
    pub fn value_len(&self) -> usize {
        self.value_len
    }

    /// Take a reference-count share.
    ///
    /// Callers must already be guaranteed a live share: a reader under
    /// the shard lock (the index share cannot be dropped concurrently),
    /// or code that inherited the index share by unlinking the entry.
    #[inline]
    pub fn acquire(&self) {
        let prev = self.refs.fetch_add(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "acquire on a reclaimed entry");
    }

    /// Drop a share. Returns `true` exactly once, when the count hits
    /// zero; the caller then owns the extent and must release it.
    #[inline]
    pub fn release(&self) -> bool {
        if self.refs.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    /// Current recency-list slot.
    #[inline]
    pub fn lru_slot(&self) -> u32 {
        self.lru_slot.load(Ordering::Relaxed)
    }

    /// Record the recency-list slot. Only called under the policy lock.
    #[inline]
    pub fn set_lru_slot(&self, slot: u32) {
        self.lru_slot.store(slot, Ordering::Relaxed);
    }
}

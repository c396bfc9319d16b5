//! Replacement policies and victim selection.
//!
//! The policy variant is chosen once at construction and dispatched
//! through [`EvictionPolicy`], so per-operation code never branches on
//! configuration:
//!
//! - **NONE**: `record_access` and `select_victim` are no-ops; a full
//!   pool fails puts immediately and callers evict manually by key.
//! - **LRU**: a recency list with O(1) touch. `select_victim` returns the
//!   least-recently-used entry. Entries untouched since insertion evict
//!   in insertion order, earliest first.
//!
//! The recency list stores nodes in a slot arena (a `Vec` plus an
//! embedded free list) and links them by slot id, so touching an entry
//! never chases heap pointers. Entries record their slot id; slot ids are
//! only read or written under the policy lock.
//!
//! The policy lock is never held across a value copy or a callback.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::entry::{CacheEntry, INVALID_SLOT};

/// Replacement policy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replacement {
    /// No automatic eviction; puts fail with OutOfSpace when the pool is
    /// full and keyless evict always reports NoVictim.
    None,
    /// Least-recently-used eviction.
    Lru,
}

/// Sentinel for "no node" in the recency list links.
const NIL: u32 = u32::MAX;

/// A recency-list node. Freed nodes keep their slot and chain through
/// `next` on the free list.
#[derive(Debug)]
struct Node {
    prev: u32,
    next: u32,
    entry: Option<Arc<CacheEntry>>,
}

/// Doubly linked recency list over a slot arena. Head is most recently
/// used, tail is the eviction candidate.
#[derive(Debug)]
pub(crate) struct LruList {
    nodes: Vec<Node>,
    free_head: u32,
    head: u32,
    tail: u32,
    len: usize,
}

impl LruList {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free_head: NIL,
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    /// Number of linked entries.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.len
    }

    fn alloc_node(&mut self, entry: Arc<CacheEntry>) -> u32 {
        if self.free_head != NIL {
            let slot = self.free_head;
            let node = &mut self.nodes[slot as usize];
            self.free_head = node.next;
            node.prev = NIL;
            node.next = NIL;
            node.entry = Some(entry);
            slot
        } else {
            let slot = self.nodes.len() as u32;
            assert!(slot < NIL, "recency list slot ids exhausted");
            self.nodes.push(Node {
                prev: NIL,
                next: NIL,
                entry: Some(entry),
            });
            slot
        }
    }

    fn free_node(&mut self, slot: u32) -> Arc<CacheEntry> {
        let node = &mut self.nodes[slot as usize];
        let entry = node.entry.take().expect("freeing an empty recency slot");
        node.prev = NIL;
        node.next = self.free_head;
        self.free_head = slot;
        entry
    }

    /// Unlink a node from the list without freeing its slot.
    fn unlink(&mut self, slot: u32) {
        let (prev, next) = {
            let node = &self.nodes[slot as usize];
            (node.prev, node.next)
        };

        if prev != NIL {
            self.nodes[prev as usize].next = next;
        } else {
            self.head = next;
        }

        if next != NIL {
            self.nodes[next as usize].prev = prev;
        } else {
            self.tail = prev;
        }

        self.len -= 1;
    }

    /// Link a node at the most-recently-used end.
    fn link_front(&mut self, slot: u32) {
        let old_head = self.head;
        {
            let node = &mut self.nodes[slot as usize];
            node.prev = NIL;
            node.next = old_head;
        }

        if old_head != NIL {
            self.nodes[old_head as usize].prev = slot;
        } else {
            self.tail = slot;
        }
        self.head = slot;
        self.len += 1;
    }

    /// Insert an entry at the most-recently-used end, returning its slot.
    pub fn push_front(&mut self, entry: Arc<CacheEntry>) -> u32 {
        let slot = self.alloc_node(entry);
        self.link_front(slot);
        slot
    }

    /// Move a linked entry to the most-recently-used end.
    pub fn move_to_front(&mut self, slot: u32) {
        if self.head == slot {
            return;
        }
        self.unlink(slot);
        self.link_front(slot);
    }

    /// Remove and return the entry at `slot`.
    pub fn remove(&mut self, slot: u32) -> Arc<CacheEntry> {
        self.unlink(slot);
        self.free_node(slot)
    }

    /// Pop the least-recently-used entry.
    pub fn pop_back(&mut self) -> Option<Arc<CacheEntry>> {
        if self.tail == NIL {
            return None;
        }
        let slot = self.tail;
        self.unlink(slot);
        Some(self.free_node(slot))
    }
}

/// Policy state, selected once at construction.
pub(crate) enum EvictionPolicy {
    /// No ordering maintained; no victims offered.
    None,
    /// Recency list under its own lock.
    Lru(Mutex<LruList>),
}

impl EvictionPolicy {
    /// Build the policy state for a [`Replacement`] selection.
    pub fn new(replacement: Replacement) -> Self {
        match replacement {
            Replacement::None => Self::None,
            Replacement::Lru => Self::Lru(Mutex::new(LruList::new())),
        }
    }

    /// Register a newly inserted entry as most recently used.
    pub fn insert(&self, entry: &Arc<CacheEntry>) {
        match self {
            Self::None => {}
            Self::Lru(list) => {
                let mut list = list.lock();
                let slot = list.push_front(entry.clone());
                entry.set_lru_slot(slot);
            }
        }
    }

    /// Record an access, moving the entry to the most-recently-used end.
    ///
    /// A no-op if the entry was concurrently unlinked: slot ids only
    /// change under the policy lock, so the stale-slot window closes
    /// here.
    pub fn record_access(&self, entry: &Arc<CacheEntry>) {
        match self {
            Self::None => {}
            Self::Lru(list) => {
                let mut list = list.lock();
                let slot = entry.lru_slot();
                if slot != INVALID_SLOT {
                    list.move_to_front(slot);
                }
            }
        }
    }

    /// Select and unlink the least-recently-used entry.
    pub fn select_victim(&self) -> Option<Arc<CacheEntry>> {
        match self {
            Self::None => None,
            Self::Lru(list) => {
                let mut list = list.lock();
                let entry = list.pop_back()?;
                entry.set_lru_slot(INVALID_SLOT);
                Some(entry)
            }
        }
    }

    /// Unlink an entry that is being removed for another reason
    /// (replacement or keyed eviction).
    pub fn detach(&self, entry: &Arc<CacheEntry>) {
        match self {
            Self::None => {}
            Self::Lru(list) => {
                let mut list = list.lock();
                let slot = entry.lru_slot();
                if slot != INVALID_SLOT {
                    let removed = list.remove(slot);
                    debug_assert!(Arc::ptr_eq(&removed, entry));
                    entry.set_lru_slot(INVALID_SLOT);
                }
            }
        }
    }

    /// Number of entries the policy tracks.
    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Lru(list) => list.lock().len(),
        }
    }
}

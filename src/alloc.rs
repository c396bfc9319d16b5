//! Best-fit extent allocator over the fixed pool.
//!
//! The allocator carves the pool into variable-length extents. Free
//! extents are tracked twice: ordered by `(len, offset)` for best-fit
//! reservation and by offset for neighbor coalescing on release. Both
//! structures live under one mutex; no allocator state is visible
//! outside it except the used-byte counter.
//!
//! Reservation is deterministic for a fixed call sequence: the smallest
//! sufficient extent wins, lowest offset among equals, so fragmentation
//! behavior is reproducible in tests.
//!
//! Running out of space is not fatal here. The engine intercepts
//! [`CacheError::OutOfSpace`] and turns it into eviction plus retry.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

use crate::error::CacheError;
use crate::extent::Extent;
use crate::sync::{AtomicUsize, Ordering};

/// Free extent bookkeeping, maintained under the allocator mutex.
///
/// Invariants: the two structures describe the same set of extents; free
/// extents never overlap; no two free extents are adjacent (release
/// merges them).
#[derive(Debug, Default)]
struct FreeExtents {
    /// Free extents ordered by `(len, offset)` for best-fit lookup.
    by_size: BTreeSet<(usize, usize)>,
    /// Free extents keyed by offset, for coalescing.
    by_offset: BTreeMap<usize, usize>,
}

impl FreeExtents {
    fn insert(&mut self, offset: usize, len: usize) {
        self.by_size.insert((len, offset));
        self.by_offset.insert(offset, len);
    }

    fn remove(&mut self, offset: usize, len: usize) {
        let in_size = self.by_size.remove(&(len, offset));
        let in_offset = self.by_offset.remove(&offset);
        debug_assert!(in_size && in_offset.is_some(), "free structures diverged");
    }
}

/// Allocator for variable-length extents within the pool.
pub(crate) struct ExtentAllocator {
    /// Usable capacity (pool size rounded down to the granularity).
    capacity: usize,
    /// Allocation granularity; all extent lengths are multiples of it.
    granularity: usize,
    /// Free extent tracking.
    free: Mutex<FreeExtents>,
    /// Bytes currently reserved (granularity-rounded).
    used: AtomicUsize,
}

impl ExtentAllocator {
    /// Create an allocator managing `pool_size` bytes.
    pub fn new(pool_size: usize, granularity: usize) -> Self {
        let capacity = pool_size - pool_size % granularity;

        let mut free = FreeExtents::default();
        if capacity > 0 {
            free.insert(0, capacity);
        }

        Self {
            capacity,
            granularity,
            free: Mutex::new(free),
            used: AtomicUsize::new(0),
        }
    }

    /// Usable capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocation granularity in bytes.
    #[inline]
    pub fn granularity(&self) -> usize {
        self.granularity
    }

    /// Bytes currently reserved, after rounding.
    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    /// Round a request up to the granularity. Zero-byte requests still
    /// occupy one granule so every entry owns a real extent.
    pub fn round_up(&self, size: usize) -> usize {
        if size == 0 {
            return self.granularity;
        }
        match size.checked_add(self.granularity - 1) {
            Some(padded) => padded - padded % self.granularity,
            // Saturate; the caller's capacity check rejects it.
            None => usize::MAX,
        }
    }

    /// Reserve an extent of at least `size` bytes.
    pub fn reserve(&self, size: usize) -> Result<Extent, CacheError> {
        let want = self.round_up(size);

        let mut free = self.free.lock();

        // Best fit: smallest free extent that is large enough, lowest
        // offset among equals.
        let (len, offset) = match free.by_size.range((want, 0)..).next() {
            Some(&found) => found,
            None => return Err(CacheError::OutOfSpace),
        };

        free.remove(offset, len);
        if len > want {
            free.insert(offset + want, len - want);
        }
        drop(free);

        self.used.fetch_add(want, Ordering::Relaxed);
        Ok(Extent { offset, len: want })
    }

    /// Return an extent, merging with any free neighbors.
    pub fn release(&self, extent: Extent) {
        let mut offset = extent.offset;
        let mut len = extent.len;

        let mut free = self.free.lock();

        // Merge with the free extent ending where this one starts.
        if let Some((&prev_offset, &prev_len)) = free.by_offset.range(..offset).next_back() {
            debug_assert!(prev_offset + prev_len <= offset, "free extent overlaps release");
            if prev_offset + prev_len == offset {
                free.remove(prev_offset, prev_len);
                offset = prev_offset;
                len += prev_len;
            }
        }

        // Merge with the free extent starting where this one ends.
        if let Some(&next_len) = free.by_offset.get(&extent.end()) {
            free.remove(extent.end(), next_len);
            len += next_len;
        }

        free.insert(offset, len);
        drop(free);

        self.used.fetch_sub(extent.len, Ordering::Relaxed);
    }

    /// Number of free extents (coalescing visibility for tests).
    #[cfg(test)]
    pub fn free_extent_count(&self) -> usize {
        self.free.lock().by_offset.len()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    fn allocator(pool_size: usize, granularity: usize) -> ExtentAllocator {
        ExtentAllocator::new(pool_size, granularity)
    }

    #[test]
    fn test_capacity_rounds_down_to_granularity() {
        let alloc = allocator(1000, 256);
        assert_eq!(alloc.capacity(), 768);
    }

    #[test]
    fn test_round_up() {
        let alloc = allocator(4096, 64);
        assert_eq!(alloc.round_up(0), 64);
        assert_eq!(alloc.round_up(1), 64);
        assert_eq!(alloc.round_up(64), 64);
        assert_eq!(alloc.round_up(65), 128);
        assert_eq!(alloc.round_up(usize::MAX), usize::MAX);
    }

    #[test]
    fn test_reserve_and_release_round_trip() {
        let alloc = allocator(4096, 64);

        let extent = alloc.reserve(100).expect("reserve failed");
        assert_eq!(extent.len, 128);
        assert_eq!(alloc.used_bytes(), 128);

        alloc.release(extent);
        assert_eq!(alloc.used_bytes(), 0);
        assert_eq!(alloc.free_extent_count(), 1);
    }

    #[test]
    fn test_best_fit_prefers_smallest_sufficient_extent() {
        let alloc = allocator(4096, 64);

        // Carve [a=256][b=128][c=256][rest] then free b and the rest,
        // leaving two free extents of different sizes.
        let a = alloc.reserve(256).unwrap();
        let b = alloc.reserve(128).unwrap();
        let c = alloc.reserve(256).unwrap();
        let rest = alloc.reserve(4096 - 640).unwrap();
        alloc.release(b);
        alloc.release(rest);

        // A 128-byte request must land in the 128-byte hole, not the
        // larger tail extent.
        let refill = alloc.reserve(128).unwrap();
        assert_eq!(refill.offset, b.offset);

        alloc.release(a);
        alloc.release(c);
        alloc.release(refill);
        assert_eq!(alloc.free_extent_count(), 1);
    }

    #[test]
    fn test_equal_sizes_break_ties_by_lowest_offset() {
        let alloc = allocator(4096, 64);

        let a = alloc.reserve(128).unwrap();
        let pad1 = alloc.reserve(64).unwrap();
        let b = alloc.reserve(128).unwrap();
        let pad2 = alloc.reserve(64).unwrap();
        let tail = alloc.reserve(4096 - 384).unwrap();

        alloc.release(a);
        alloc.release(b);

        // Two equal 128-byte holes; the lower offset wins.
        let refill = alloc.reserve(128).unwrap();
        assert_eq!(refill.offset, a.offset);

        alloc.release(pad1);
        alloc.release(pad2);
        alloc.release(tail);
        alloc.release(refill);
        assert_eq!(alloc.free_extent_count(), 1);
    }

    #[test]
    fn test_release_coalesces_both_neighbors() {
        let alloc = allocator(4096, 64);

        let a = alloc.reserve(512).unwrap();
        let b = alloc.reserve(512).unwrap();
        let c = alloc.reserve(512).unwrap();
        let _tail = alloc.reserve(4096 - 1536).unwrap();

        alloc.release(a);
        alloc.release(c);
        assert_eq!(alloc.free_extent_count(), 2);

        // Releasing the middle extent merges all three into one.
        alloc.release(b);
        assert_eq!(alloc.free_extent_count(), 1);

        // The merged extent is usable as a whole.
        let merged = alloc.reserve(1536).unwrap();
        assert_eq!(merged.offset, a.offset);
    }

    #[test]
    fn test_exhaustion_reports_out_of_space() {
        let alloc = allocator(1024, 256);

        let first = alloc.reserve(1024).unwrap();
        assert_eq!(alloc.reserve(1), Err(CacheError::OutOfSpace));

        alloc.release(first);
        assert!(alloc.reserve(1).is_ok());
    }

    #[test]
    fn test_oversized_request_fails_without_side_effects() {
        let alloc = allocator(1024, 256);
        assert_eq!(alloc.reserve(2048), Err(CacheError::OutOfSpace));
        assert_eq!(alloc.used_bytes(), 0);
        assert!(alloc.reserve(1024).is_ok());
    }

    #[test]
    fn test_identical_sequences_allocate_identically() {
        let run = || {
            let alloc = allocator(8192, 64);
            let mut extents = Vec::new();
            let mut offsets = Vec::new();

            for size in [100, 700, 64, 300, 64, 1200] {
                extents.push(alloc.reserve(size).unwrap());
            }
            alloc.release(extents[1]);
            alloc.release(extents[3]);

            for size in [256, 128, 640] {
                let extent = alloc.reserve(size).unwrap();
                offsets.push(extent.offset);
            }
            offsets
        };

        assert_eq!(run(), run());
    }
}

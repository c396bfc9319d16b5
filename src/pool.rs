//! Fixed backing region holding cached value bytes.
//!
//! A [`Pool`] is mapped once at construction and never grows. It is either
//! an anonymous mapping or an unlinked temporary file created in a caller
//! supplied directory, which places the region on that filesystem (and its
//! backing device) while keeping the contents volatile: the file has no
//! name and is gone when the mapping is dropped.

use std::ptr::NonNull;

use memmap2::{MmapMut, MmapOptions};

use crate::config::PoolBacking;
use crate::error::{fail, CacheError, CacheResult};

/// The fixed byte region under management.
///
/// All offset/length pairs handed to [`read`](Pool::read) and
/// [`write`](Pool::write) come from the extent allocator, which guarantees
/// that live extents never overlap. Value bytes are written exactly once
/// and are immutable afterwards, which is what makes concurrent reads safe
/// without a lock around the bytes themselves.
pub(crate) struct Pool {
    /// Base address of the mapping.
    base: NonNull<u8>,
    /// Mapped length in bytes.
    len: usize,
    /// Keeps the mapping alive; unmapped on drop.
    _map: MmapMut,
}

// SAFETY: Pool is safe to send/share between threads because:
// 1. The mapping is created once and never moved or resized until Drop
// 2. Writes only target extents reserved by exactly one thread
// 3. Reads only target extents whose bytes are already fully written
unsafe impl Send for Pool {}
unsafe impl Sync for Pool {}

impl Pool {
    /// Map a new region of `len` bytes.
    pub fn new(backing: &PoolBacking, len: usize) -> CacheResult<Self> {
        let mut map = match backing {
            PoolBacking::Anonymous => match MmapOptions::new().len(len).map_anon() {
                Ok(map) => map,
                Err(e) => {
                    return fail(
                        CacheError::Io,
                        format!("anonymous mapping of {len} bytes failed: {e}"),
                    );
                }
            },
            PoolBacking::Directory(dir) => {
                let file = match tempfile::tempfile_in(dir) {
                    Ok(file) => file,
                    Err(e) => {
                        return fail(
                            CacheError::Io,
                            format!("creating pool file in {} failed: {e}", dir.display()),
                        );
                    }
                };
                if let Err(e) = file.set_len(len as u64) {
                    return fail(
                        CacheError::Io,
                        format!("sizing pool file to {len} bytes failed: {e}"),
                    );
                }
                // The file stays unlinked; dropping it after the mapping is
                // established leaves the mapping valid until munmap.
                match unsafe { MmapOptions::new().map_mut(&file) } {
                    Ok(map) => map,
                    Err(e) => {
                        return fail(
                            CacheError::Io,
                            format!("mapping pool file of {len} bytes failed: {e}"),
                        );
                    }
                }
            }
        };

        let base = match NonNull::new(map.as_mut_ptr()) {
            Some(base) => base,
            None => return fail(CacheError::Io, "mapping returned a null base address"),
        };

        log::debug!("mapped {len} byte pool ({backing:?})");

        Ok(Self {
            base,
            len,
            _map: map,
        })
    }

    /// Mapped length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Read `len` bytes starting at `offset`.
    ///
    /// The returned slice must only cover bytes that were fully written by
    /// [`write`](Pool::write); the entry refcount discipline guarantees the
    /// extent is not reused while the slice is reachable.
    #[inline]
    pub fn read(&self, offset: usize, len: usize) -> &[u8] {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "read of {len} bytes at {offset} outside pool of {}",
            self.len
        );

        // SAFETY: bounds checked above; the range is inside one live extent
        // whose bytes are immutable once written.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(offset), len) }
    }

    /// Copy `data` into the region at `offset`.
    #[inline]
    pub fn write(&self, offset: usize, data: &[u8]) {
        assert!(
            offset
                .checked_add(data.len())
                .is_some_and(|end| end <= self.len),
            "write of {} bytes at {offset} outside pool of {}",
            data.len(),
            self.len
        );

        // SAFETY: bounds checked above; the allocator hands this extent to
        // exactly one writer and no reader sees it before the index insert.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.base.as_ptr().add(offset), data.len());
        }
    }
}

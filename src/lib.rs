//! Volatile key-value cache over a fixed memory-mapped pool.
//!
//! This crate provides an embeddable byte-string cache with a hard memory
//! budget: a fixed region (anonymous memory, or an unlinked temporary file
//! on fast storage) is carved into variable-length extents by a best-fit
//! allocator, and a caller-selected replacement policy reclaims space
//! automatically once the region fills.
//!
//! # Architecture
//!
//! ```text
//! +---------------------------------------------+
//! |                PoolCache                    |
//! |                                             |
//! |  +---------------------------------------+  |
//! |  | KeyIndex (sharded RwLock maps)        |  |
//! |  | - key -> Arc<CacheEntry>              |  |
//! |  +---------------------------------------+  |
//! |        |                                    |
//! |        v                                    |
//! |  +-------------------+  +----------------+  |
//! |  | CacheEntry        |  | EvictionPolicy |  |
//! |  | - extent + refcnt |<-| - NONE / LRU   |  |
//! |  +-------------------+  +----------------+  |
//! |        |                                    |
//! |        v                                    |
//! |  +---------------------------------------+  |
//! |  | ExtentAllocator (best-fit, coalescing)|  |
//! |  +---------------------------------------+  |
//! |  | Pool (fixed mmap region)              |  |
//! |  +---------------------------------------+  |
//! +---------------------------------------------+
//! ```
//!
//! Reads are zero-copy: [`PoolCache::get`] hands out a [`ValueGuard`]
//! holding a reference-count share on the entry, so the bytes stay valid
//! and unchanged even if another thread concurrently replaces or evicts
//! the same key. The extent returns to the allocator only once the entry
//! is unlinked *and* the last share drops.
//!
//! The engine runs entirely on caller threads: it spawns none of its own
//! and blocks only briefly on internal locks.
//!
//! # Example
//!
//! ```ignore
//! use pool_cache::{PoolCache, Replacement};
//!
//! let cache = PoolCache::builder()
//!     .pool_size(64 * 1024 * 1024)
//!     .replacement(Replacement::Lru)
//!     .build()?;
//!
//! cache.put(b"key", b"value")?;
//!
//! let guard = cache.get(b"key")?;
//! assert_eq!(guard.value(), b"value");
//! drop(guard); // release obligation
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod alloc;
mod config;
mod entry;
mod error;
mod eviction;
mod extent;
mod index;
mod pool;
mod stats;
mod sync;

pub use config::{PoolBacking, DEFAULT_FRAGMENT_SIZE, MIN_FRAGMENT_SIZE, MIN_POOL_SIZE};
pub use error::{last_error_message, CacheError, CacheResult};
pub use eviction::Replacement;
pub use stats::StatsSnapshot;

use std::cell::Cell;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::alloc::ExtentAllocator;
use crate::config::{CacheConfig, DEFAULT_INDEX_SHARDS};
use crate::entry::CacheEntry;
use crate::error::fail;
use crate::eviction::EvictionPolicy;
use crate::extent::Extent;
use crate::index::KeyIndex;
use crate::pool::Pool;
use crate::stats::CacheStats;
use crate::sync::{AtomicU64, Ordering};

type EvictCallback = Arc<dyn Fn(&[u8], &[u8]) + Send + Sync>;
type MissCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

thread_local! {
    // Set while an eviction callback runs on this thread; cache calls
    // made under it fail with CallerMisuse instead of deadlocking.
    static IN_EVICTION_CALLBACK: Cell<bool> = const { Cell::new(false) };
}

/// RAII scope for the eviction-callback reentrancy flag.
struct CallbackScope;

impl CallbackScope {
    fn enter() -> Self {
        IN_EVICTION_CALLBACK.with(|flag| flag.set(true));
        Self
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        IN_EVICTION_CALLBACK.with(|flag| flag.set(false));
    }
}

/// Volatile key-value cache over a fixed pool region.
///
/// All operations take `&self` and are safe to call from many threads at
/// once. See the crate docs for the component layout.
pub struct PoolCache {
    /// The fixed backing region.
    pool: Pool,
    /// Best-fit extent allocator over the region.
    allocator: ExtentAllocator,
    /// Sharded key -> entry map.
    index: KeyIndex,
    /// Replacement policy state.
    policy: EvictionPolicy,
    /// Eviction callback, at most one active.
    evict_cb: RwLock<Option<EvictCallback>>,
    /// Miss callback, at most one active.
    miss_cb: RwLock<Option<MissCallback>>,
    /// Operation counters.
    stats: CacheStats,
    /// Outstanding [`ValueGuard`]s, for teardown misuse reporting.
    open_guards: AtomicU64,
    /// Max evictions one put may trigger before reporting OutOfSpace.
    eviction_budget: usize,
}

impl PoolCache {
    /// Create a builder with default configuration.
    pub fn builder() -> PoolCacheBuilder {
        PoolCacheBuilder::new()
    }

    /// Create a cache directly from the four construction parameters.
    ///
    /// Equivalent to the builder with no callbacks registered.
    pub fn new(
        backing: PoolBacking,
        pool_size: usize,
        fragment_size: usize,
        replacement: Replacement,
    ) -> CacheResult<Self> {
        PoolCacheBuilder::new()
            .backing(backing)
            .pool_size(pool_size)
            .fragment_size(fragment_size)
            .replacement(replacement)
            .build()
    }

    /// Store a value under a key, replacing any previous value.
    ///
    /// When the pool is full and the policy can name victims, entries are
    /// evicted (firing the eviction callback) and the allocation retried,
    /// up to an internal budget. A value that cannot fit even in an empty
    /// pool fails immediately without evicting anything.
    ///
    /// A replaced entry is unlinked at once but its extent is reclaimed
    /// only after outstanding readers release it. Replacement does not
    /// fire the eviction callback.
    pub fn put(&self, key: &[u8], value: &[u8]) -> CacheResult<()> {
        self.guard_reentrancy("put")?;
        self.stats.record_put();

        if key.is_empty() {
            return fail(CacheError::InvalidArgument, "zero-length key");
        }

        if self.allocator.round_up(value.len()) > self.allocator.capacity() {
            return fail(
                CacheError::OutOfSpace,
                format!(
                    "value of {} bytes exceeds usable pool capacity of {}",
                    value.len(),
                    self.allocator.capacity()
                ),
            );
        }

        let extent = self.reserve_with_eviction(value.len())?;
        self.pool.write(extent.offset, value);

        let entry = Arc::new(CacheEntry::new(
            key.to_vec().into_boxed_slice(),
            extent,
            value.len(),
        ));

        if let Some(previous) = self.index.insert(entry.clone()) {
            self.policy.detach(&previous);
            self.release_share(&previous);
        }
        self.policy.insert(&entry);

        Ok(())
    }

    /// Look up a key and return its bytes behind a release obligation.
    ///
    /// The returned guard keeps the bytes valid until dropped; dropping
    /// it is the release. On a miss the registered miss callback runs
    /// first (it may populate the key with [`put`](Self::put)) and the
    /// lookup is retried once before reporting [`CacheError::NotFound`].
    pub fn get(&self, key: &[u8]) -> CacheResult<ValueGuard<'_>> {
        self.guard_reentrancy("get")?;
        self.stats.record_get();

        if key.is_empty() {
            return fail(CacheError::InvalidArgument, "zero-length key");
        }

        if let Some(guard) = self.lookup_acquire(key) {
            self.stats.record_hit();
            return Ok(guard);
        }
        self.stats.record_miss();

        let callback = self.miss_cb.read().clone();
        if let Some(callback) = callback {
            callback(key);
            if let Some(guard) = self.lookup_acquire(key) {
                return Ok(guard);
            }
        }

        fail(CacheError::NotFound, "key not found")
    }

    /// Check whether a key is currently present.
    ///
    /// A point-in-time answer that may be stale by the time it returns;
    /// takes no reference count and records no access with the policy.
    pub fn exists(&self, key: &[u8]) -> bool {
        self.index.contains(key)
    }

    /// Evict one entry.
    ///
    /// With a key, evicts exactly that entry or reports
    /// [`CacheError::NotFound`]. With `None`, asks the policy for a
    /// victim and reports [`CacheError::NoVictim`] once there is nothing
    /// left to evict (always, under [`Replacement::None`]).
    ///
    /// Both forms fire the eviction callback with the key and value bytes
    /// before the extent is released, synchronously on this thread.
    pub fn evict(&self, key: Option<&[u8]>) -> CacheResult<()> {
        self.guard_reentrancy("evict")?;

        match key {
            Some(key) => {
                if key.is_empty() {
                    return fail(CacheError::InvalidArgument, "zero-length key");
                }
                match self.index.remove(key) {
                    Some(entry) => {
                        self.policy.detach(&entry);
                        self.finish_eviction(entry);
                        Ok(())
                    }
                    None => fail(CacheError::NotFound, "key not found"),
                }
            }
            None => self.evict_victim(),
        }
    }

    /// Register the eviction callback, replacing any previous one.
    ///
    /// The callback receives the evicted key and value and runs
    /// synchronously on the evicting thread with no engine lock held.
    /// It must not call back into this cache: such calls fail with
    /// [`CacheError::CallerMisuse`].
    pub fn on_evict(&self, callback: impl Fn(&[u8], &[u8]) + Send + Sync + 'static) {
        *self.evict_cb.write() = Some(Arc::new(callback));
    }

    /// Register the miss callback, replacing any previous one.
    ///
    /// The callback receives the missed key and may populate it with
    /// [`put`](Self::put); [`get`](Self::get) re-checks the index once
    /// after it returns.
    pub fn on_miss(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self.miss_cb.write() = Some(Arc::new(callback));
    }

    /// Tear the cache down.
    ///
    /// Reports [`CacheError::CallerMisuse`] if value guards are still
    /// outstanding (possible only by leaking them); the region is
    /// released either way when `self` drops.
    pub fn delete(self) -> CacheResult<()> {
        let outstanding = self.open_guards.load(Ordering::Relaxed);
        if outstanding != 0 {
            return fail(
                CacheError::CallerMisuse,
                format!("{outstanding} value guards still outstanding at delete"),
            );
        }

        self.index.drain(|entry| {
            self.policy.detach(&entry);
            self.release_share(&entry);
        });
        debug_assert_eq!(self.allocator.used_bytes(), 0);

        Ok(())
    }

    /// Point-in-time operation counters and occupancy.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(
            self.index.len() as u64,
            self.allocator.used_bytes() as u64,
            self.allocator.capacity() as u64,
        )
    }

    /// Description of the most recent failure on the calling thread.
    pub fn last_error_message(&self) -> String {
        error::last_error_message()
    }

    /// Usable pool capacity in bytes (pool size rounded down to the
    /// fragment size).
    pub fn capacity(&self) -> usize {
        self.allocator.capacity()
    }

    /// Allocation granularity in bytes.
    pub fn fragment_size(&self) -> usize {
        self.allocator.granularity()
    }

    fn guard_reentrancy(&self, op: &str) -> CacheResult<()> {
        if IN_EVICTION_CALLBACK.with(|flag| flag.get()) {
            return fail(
                CacheError::CallerMisuse,
                format!("{op} called from inside an eviction callback"),
            );
        }
        Ok(())
    }

    fn lookup_acquire(&self, key: &[u8]) -> Option<ValueGuard<'_>> {
        let entry = self.index.lookup(key)?;
        self.policy.record_access(&entry);
        self.open_guards.fetch_add(1, Ordering::Relaxed);
        Some(ValueGuard { cache: self, entry })
    }

    /// Reserve an extent, evicting through the policy on OutOfSpace.
    fn reserve_with_eviction(&self, size: usize) -> CacheResult<Extent> {
        let mut evicted = 0usize;
        loop {
            if let Ok(extent) = self.allocator.reserve(size) {
                return Ok(extent);
            }

            if evicted >= self.eviction_budget {
                return fail(
                    CacheError::OutOfSpace,
                    format!("no extent of {size} bytes after {evicted} evictions"),
                );
            }

            if self.evict_victim().is_err() {
                return fail(
                    CacheError::OutOfSpace,
                    format!("pool exhausted and no evictable entry for a {size} byte value"),
                );
            }
            evicted += 1;
        }
    }

    /// Evict the policy's victim, validating it against the index.
    fn evict_victim(&self) -> CacheResult<()> {
        loop {
            let victim = match self.policy.select_victim() {
                Some(victim) => victim,
                None => return fail(CacheError::NoVictim, "nothing to evict"),
            };

            if self.index.remove_if_same(victim.key(), &victim) {
                self.finish_eviction(victim);
                return Ok(());
            }
            // The key was concurrently replaced or removed; that path
            // owns the unlink. Pick another victim.
        }
    }

    /// Fire the eviction callback and drop the inherited index share.
    ///
    /// The caller has already unlinked `entry` from index and policy and
    /// owns the index's reference-count share, so the value bytes stay
    /// valid for the callback.
    fn finish_eviction(&self, entry: Arc<CacheEntry>) {
        self.stats.record_eviction();

        let callback = self.evict_cb.read().clone();
        if let Some(callback) = callback {
            let value = self.pool.read(entry.extent().offset, entry.value_len());
            let _scope = CallbackScope::enter();
            callback(entry.key(), value);
        }

        self.release_share(&entry);
    }

    /// Drop one reference-count share, reclaiming the extent at zero.
    fn release_share(&self, entry: &Arc<CacheEntry>) {
        if entry.release() {
            self.allocator.release(entry.extent());
        }
    }
}

impl Drop for PoolCache {
    fn drop(&mut self) {
        let outstanding = self.open_guards.load(Ordering::Relaxed);
        if outstanding != 0 {
            log::warn!("pool cache dropped with {outstanding} outstanding value guards");
        }
    }
}

/// Zero-copy view of a cached value, holding a reference-count share.
///
/// Dropping the guard is the release obligation from
/// [`PoolCache::get`]: the entry's extent can only return to the
/// allocator once every guard for it has dropped.
pub struct ValueGuard<'a> {
    cache: &'a PoolCache,
    entry: Arc<CacheEntry>,
}

impl ValueGuard<'_> {
    /// The entry's key.
    pub fn key(&self) -> &[u8] {
        self.entry.key()
    }

    /// The value bytes. Immutable for the life of the guard, even if the
    /// key is concurrently replaced or evicted.
    pub fn value(&self) -> &[u8] {
        self.cache
            .pool
            .read(self.entry.extent().offset, self.entry.value_len())
    }
}

impl std::ops::Deref for ValueGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.value()
    }
}

impl Drop for ValueGuard<'_> {
    fn drop(&mut self) {
        self.cache.open_guards.fetch_sub(1, Ordering::Relaxed);
        self.cache.release_share(&self.entry);
    }
}

/// Builder for [`PoolCache`].
pub struct PoolCacheBuilder {
    backing: PoolBacking,
    pool_size: usize,
    fragment_size: usize,
    replacement: Replacement,
    index_shards: usize,
    evict_cb: Option<EvictCallback>,
    miss_cb: Option<MissCallback>,
}

impl Default for PoolCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolCacheBuilder {
    /// Start from the defaults: anonymous backing, minimum pool size,
    /// default fragment size, LRU replacement.
    pub fn new() -> Self {
        Self {
            backing: PoolBacking::Anonymous,
            pool_size: MIN_POOL_SIZE,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            replacement: Replacement::Lru,
            index_shards: DEFAULT_INDEX_SHARDS,
            evict_cb: None,
            miss_cb: None,
        }
    }

    /// Select the backing storage for the pool region.
    pub fn backing(mut self, backing: PoolBacking) -> Self {
        self.backing = backing;
        self
    }

    /// Back the pool with an unlinked temporary file in `dir`.
    pub fn path(self, dir: impl Into<PathBuf>) -> Self {
        self.backing(PoolBacking::Directory(dir.into()))
    }

    /// Total pool size in bytes. Must be at least [`MIN_POOL_SIZE`].
    pub fn pool_size(mut self, bytes: usize) -> Self {
        self.pool_size = bytes;
        self
    }

    /// Allocation granularity in bytes. Must be at least
    /// [`MIN_FRAGMENT_SIZE`] and no larger than the pool.
    pub fn fragment_size(mut self, bytes: usize) -> Self {
        self.fragment_size = bytes;
        self
    }

    /// Replacement policy.
    pub fn replacement(mut self, replacement: Replacement) -> Self {
        self.replacement = replacement;
        self
    }

    /// Number of key index shards (power of two).
    pub fn index_shards(mut self, shards: usize) -> Self {
        self.index_shards = shards;
        self
    }

    /// Register the eviction callback at construction time.
    pub fn on_evict(mut self, callback: impl Fn(&[u8], &[u8]) + Send + Sync + 'static) -> Self {
        self.evict_cb = Some(Arc::new(callback));
        self
    }

    /// Register the miss callback at construction time.
    pub fn on_miss(mut self, callback: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.miss_cb = Some(Arc::new(callback));
        self
    }

    /// Validate the configuration and map the pool.
    pub fn build(self) -> CacheResult<PoolCache> {
        let config = CacheConfig {
            backing: self.backing,
            pool_size: self.pool_size,
            fragment_size: self.fragment_size,
            replacement: self.replacement,
            index_shards: self.index_shards,
        };
        config.validate()?;

        let pool = Pool::new(&config.backing, config.pool_size)?;
        let allocator = ExtentAllocator::new(config.pool_size, config.fragment_size);

        // Each retry frees at least one extent; more retries than the
        // region has granules cannot help.
        let eviction_budget = allocator.capacity() / allocator.granularity();

        log::debug!(
            "pool cache ready: {} bytes usable, {} byte fragments, {:?} replacement",
            allocator.capacity(),
            allocator.granularity(),
            config.replacement
        );

        Ok(PoolCache {
            pool,
            allocator,
            index: KeyIndex::new(config.index_shards),
            policy: EvictionPolicy::new(config.replacement),
            evict_cb: RwLock::new(self.evict_cb),
            miss_cb: RwLock::new(self.miss_cb),
            stats: CacheStats::default(),
            open_guards: AtomicU64::new(0),
            eviction_budget,
        })
    }
}

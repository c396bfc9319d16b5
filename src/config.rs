//! Construction configuration and limits.

use std::path::PathBuf;

use crate::error::{fail, CacheError, CacheResult};
use crate::eviction::Replacement;

/// Minimum pool size: 1MB.
pub const MIN_POOL_SIZE: usize = 1024 * 1024;

/// Minimum fragment size (allocation granularity): 8 bytes.
pub const MIN_FRAGMENT_SIZE: usize = 8;

/// Default fragment size: 256 bytes.
///
/// Larger values cut allocator bookkeeping at the cost of internal
/// fragmentation; smaller values do the opposite.
pub const DEFAULT_FRAGMENT_SIZE: usize = 256;

/// Default number of key index shards.
pub(crate) const DEFAULT_INDEX_SHARDS: usize = 16;

/// Backing storage for the pool region.
#[derive(Debug, Clone, Default)]
pub enum PoolBacking {
    /// Anonymous memory mapping.
    #[default]
    Anonymous,
    /// An unlinked temporary file created in this directory.
    ///
    /// Places the region on the directory's filesystem (typically fast
    /// persistent storage). Contents are still volatile: the file has no
    /// name and disappears with the cache.
    Directory(PathBuf),
}

/// Validated cache construction parameters.
#[derive(Debug, Clone)]
pub(crate) struct CacheConfig {
    /// Backing storage for the pool.
    pub backing: PoolBacking,
    /// Total pool size in bytes.
    pub pool_size: usize,
    /// Allocation granularity in bytes.
    pub fragment_size: usize,
    /// Replacement policy.
    pub replacement: Replacement,
    /// Number of key index shards (power of two).
    pub index_shards: usize,
}

impl CacheConfig {
    /// Check all parameters, reporting the first violation.
    pub fn validate(&self) -> CacheResult<()> {
        if self.pool_size < MIN_POOL_SIZE {
            return fail(
                CacheError::InvalidArgument,
                format!(
                    "pool size {} below minimum {MIN_POOL_SIZE}",
                    self.pool_size
                ),
            );
        }

        if self.fragment_size < MIN_FRAGMENT_SIZE {
            return fail(
                CacheError::InvalidArgument,
                format!(
                    "fragment size {} below minimum {MIN_FRAGMENT_SIZE}",
                    self.fragment_size
                ),
            );
        }

        if self.fragment_size > self.pool_size {
            return fail(
                CacheError::InvalidArgument,
                format!(
                    "fragment size {} larger than pool size {}",
                    self.fragment_size, self.pool_size
                ),
            );
        }

        if self.index_shards == 0 || !self.index_shards.is_power_of_two() {
            return fail(
                CacheError::InvalidArgument,
                format!(
                    "index shard count {} is not a power of two",
                    self.index_shards
                ),
            );
        }

        Ok(())
    }
}

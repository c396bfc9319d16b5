//! Error types for cache operations.
//!
//! Errors are a small `Copy` enum; human-readable detail for the most
//! recent failure travels through a thread-local message retrievable
//! with [`last_error_message`].

use std::cell::RefCell;
use std::fmt;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// Bad construction parameter or zero-length key.
    InvalidArgument,

    /// No space for the value, even after bounded eviction.
    /// For a value larger than the whole pool this is immediate.
    OutOfSpace,

    /// Key not found (GET or keyed EVICT on an absent key).
    NotFound,

    /// Keyless EVICT found nothing to evict.
    /// Reported once the cache is empty, or always under the NONE policy.
    NoVictim,

    /// Backing region creation or mapping failed.
    Io,

    /// Caller broke an API obligation (teardown with outstanding value
    /// guards, or a cache call from inside an eviction callback).
    CallerMisuse,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::OutOfSpace => write!(f, "out of space"),
            Self::NotFound => write!(f, "key not found"),
            Self::NoVictim => write!(f, "no evictable entry"),
            Self::Io => write!(f, "i/o error"),
            Self::CallerMisuse => write!(f, "caller misuse"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

thread_local! {
    static LAST_ERROR: RefCell<String> = const { RefCell::new(String::new()) };
}

/// Get a description of the most recent failure on the calling thread.
///
/// Every failing cache operation overwrites this message. The returned
/// string is empty if no operation has failed on this thread yet.
pub fn last_error_message() -> String {
    LAST_ERROR.with(|msg| msg.borrow().clone())
}

/// Record a failure message and return the error.
///
/// All fallible engine paths funnel through this so the thread-local
/// message and the returned error kind stay in sync.
pub(crate) fn fail<T>(kind: CacheError, detail: impl fmt::Display) -> CacheResult<T> {
    LAST_ERROR.with(|msg| {
        let mut msg = msg.borrow_mut();
        msg.clear();
        use fmt::Write;
        let _ = write!(msg, "{detail}");
    });
    Err(kind)
}

//! Error types for the cache store and key resolver.
//!
//! Cache faults are never fatal for playback: callers are expected to treat a
//! failing store as "slower but correct" and fall through to the live source.
//! The variants here exist so that callers can tell *why* a cache operation was
//! skipped, not so that they can abort on it.

use std::io;

/// Result type used by this crate.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised by [`CacheStore`](crate::CacheStore) and [`KeyResolver`](crate::KeyResolver).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backing storage could not be opened, written or read.
    #[error("cache unavailable: {0}")]
    Unavailable(#[from] io::Error),

    /// The store was released; a new one has to be obtained from the provider.
    #[error("cache store has been released")]
    Released,

    /// The locator is neither a remote URL nor a bundled asset name.
    #[error("cannot derive a cache key from locator '{0}'")]
    KeyResolutionAmbiguous(String),

    /// A single entry would exceed the whole byte budget.
    #[error("entry '{key}' needs {bytes} bytes, cache capacity is {capacity}")]
    EntryTooLarge {
        /// Key that was being written.
        key: String,
        /// Total bytes the entry would hold after the write.
        bytes: u64,
        /// Configured byte budget.
        capacity: u64,
    },

    /// `offset + len` does not fit in a `u64`.
    #[error("byte range at {offset} with length {len} overflows")]
    RangeOverflow { offset: u64, len: u64 },
}

impl CacheError {
    /// Whether the error means "no cache right now" rather than a bad input.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheError::Unavailable(_) | CacheError::Released)
    }
}

//! Bounded on-disk byte-range cache for feed media.
//!
//! Modules:
//! - [`key`]: locator to [`CacheKey`] resolution (content identity, not feed slot)
//! - [`store`]: the LRU-evicting, byte-budgeted [`CacheStore`]
//! - [`ranges`]: per-entry [`RangeSet`] bookkeeping
//! - [`config`]: [`CacheConfig`] and the [`MemoryClass`] capacity policy
//! - [`provider`]: context-owned store lifecycle ([`CacheProvider`])
//! - [`error`]: [`CacheError`] / [`CacheResult`]

pub mod config;
pub mod error;
pub mod key;
pub mod provider;
pub mod ranges;
pub mod store;

pub use config::{CONSTRAINED_CAPACITY_BYTES, CacheConfig, MemoryClass, NORMAL_CAPACITY_BYTES};
pub use error::{CacheError, CacheResult};
pub use key::{ASSET_SCHEME, CacheKey, DEFAULT_ASSET_NAMESPACE, KeyResolver};
pub use provider::CacheProvider;
pub use ranges::RangeSet;
pub use store::{CacheEntrySnapshot, CacheStore};

//! # In-memory caching of decoded resources
//!
//! The [`ResourceCache`] is a bounded, cost-weighted store mapping a [`ResourceKey`] to a
//! decoded value. It knows nothing about downloads, in-flight requests, or cancellation;
//! all of that lives in the [`CacheCoordinator`], which owns the cache and is the only
//! component writing into it.
//!
//! ## Cost accounting
//!
//! Every entry is weighted by the byte size of the payload it was decoded from. The cache is
//! bounded by the sum of these costs, configured via [`CacheConfig::capacity`]. Evictions are
//! delegated to `moka`, which evicts least recently used entries first, but the exact
//! eviction order is an implementation detail. Only the bound itself is guaranteed.
//!
//! Optionally, entries that have not been accessed for [`CacheConfig::max_unused_for`] are
//! expired.
//!
//! ### Metrics
//!
//! - `cache.weighted_size`: A gauge of the total cost of all entries, updated on every insert.
//!
//! [`ResourceKey`]: crate::types::ResourceKey
//! [`CacheCoordinator`]: crate::coordinator::CacheCoordinator
//! [`CacheConfig::capacity`]: crate::config::CacheConfig::capacity
//! [`CacheConfig::max_unused_for`]: crate::config::CacheConfig::max_unused_for

mod cache_error;
mod memory;

pub use cache_error::{FetchError, FetchResult};
pub use memory::{CachedEntry, ResourceCache};

use std::fmt;

use moka::policy::EvictionPolicy;

use crate::config::CacheConfig;
use crate::types::ResourceKey;

/// A decoded resource, together with the cost it is accounted with.
#[derive(Clone, Debug)]
pub struct CachedEntry<V> {
    value: V,
    cost: u32,
}

impl<V> CachedEntry<V> {
    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    /// The cost of this entry, which is the size of the payload it was decoded from.
    pub fn cost(&self) -> u32 {
        self.cost
    }
}

type InMemoryCache<V> = moka::sync::Cache<ResourceKey, CachedEntry<V>>;

/// A bounded, cost-weighted in-memory store of decoded resources.
///
/// This is pure storage without any notion of in-flight work. It is cheap to clone, all
/// clones share the same underlying storage, and it is safe to use from multiple threads
/// concurrently.
///
/// The total cost of all entries is bounded by the configured capacity. Which entries are
/// evicted to respect that bound is not part of the contract.
#[derive(Clone)]
pub struct ResourceCache<V> {
    cache: InMemoryCache<V>,
    capacity: u64,
}

impl<V: Clone + Send + Sync + 'static> fmt::Debug for ResourceCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("capacity", &self.capacity)
            .field("weighted_size", &self.cache.weighted_size())
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl<V> ResourceCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: &CacheConfig) -> Self {
        let mut builder = InMemoryCache::builder()
            .name("resources")
            .max_capacity(config.capacity)
            .eviction_policy(EvictionPolicy::lru())
            .weigher(|_key, entry: &CachedEntry<V>| entry.cost);

        if let Some(max_unused_for) = config.max_unused_for {
            builder = builder.time_to_idle(max_unused_for);
        }

        Self {
            cache: builder.build(),
            capacity: config.capacity,
        }
    }

    /// Creates a cache bounded to `capacity` total cost, without idle expiration.
    pub fn with_capacity(capacity: u64) -> Self {
        Self::new(&CacheConfig {
            capacity,
            max_unused_for: None,
        })
    }

    /// Returns the entry for `key`, if present.
    pub fn get(&self, key: &ResourceKey) -> Option<CachedEntry<V>> {
        self.cache.get(key)
    }

    /// Inserts or overwrites the entry for `key`.
    ///
    /// Once this returns, the total cost of the cache is back within its capacity. An entry
    /// whose cost alone exceeds the capacity is not retained.
    pub fn put(&self, key: ResourceKey, value: V, cost: u64) {
        let cost = u32::try_from(cost).unwrap_or(u32::MAX);
        self.cache.insert(key, CachedEntry { value, cost });
        // moka applies evictions lazily, flush them so the bound holds right away.
        self.cache.run_pending_tasks();

        metric!(gauge("cache.weighted_size") = self.cache.weighted_size());
    }

    /// The configured total cost budget.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The total cost of all entries.
    ///
    /// Pending maintenance is flushed before reading.
    pub fn weighted_size(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.weighted_size()
    }

    /// The number of entries.
    ///
    /// Pending maintenance is flushed before reading.
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}
